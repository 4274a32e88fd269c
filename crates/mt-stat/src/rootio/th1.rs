//! TH1D serialization.
//!
//! Layout written:
//! ```text
//! TH1D v3
//!   ├─ TH1 v8
//!   │    ├─ TNamed (name, title)
//!   │    ├─ TAttLine v2, TAttFill v2, TAttMarker v2
//!   │    ├─ fNcells
//!   │    ├─ fXaxis, fYaxis, fZaxis (TAxis v10)
//!   │    ├─ fBarOffset, fBarWidth, fEntries, fTsumw, fTsumw2, fTsumwx, fTsumwx2
//!   │    ├─ fMaximum, fMinimum, fNormFactor
//!   │    ├─ fContour, fSumw2 (TArrayD), fOption
//!   │    ├─ fFunctions (empty TList)
//!   │    └─ fBufferSize, fBuffer, fBinStatErrOpt, fStatOverflows
//!   └─ TArrayD bin contents (flow included)
//! ```

use mt_analysis::Hist;
use mt_core::{Error, Result};

use super::wbuffer::{BYTE_COUNT_MASK, NEW_CLASS_TAG, TOBJECT_BITS, WBuffer};

/// A one-dimensional histogram ready to be streamed as `TH1D`.
#[derive(Debug, Clone, PartialEq)]
pub struct Th1d {
    /// Object name (key name).
    pub name: String,
    /// Title.
    pub title: String,
    /// Bin edges, `n + 1` values.
    pub edges: Vec<f64>,
    /// Σw per cell, underflow and overflow included (`n + 2` values).
    pub sumw: Vec<f64>,
    /// Σw² per cell, same layout as `sumw`.
    pub sumw2: Vec<f64>,
}

impl Th1d {
    /// Build from explicit cells.
    pub fn new(name: impl Into<String>, edges: Vec<f64>, sumw: Vec<f64>, sumw2: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation(format!("TH1D '{name}' needs increasing edges")));
        }
        let n_cells = edges.len() + 1;
        if sumw.len() != n_cells || sumw2.len() != n_cells {
            return Err(Error::Validation(format!(
                "TH1D '{name}' expects {n_cells} cells, got {} / {}",
                sumw.len(),
                sumw2.len()
            )));
        }
        Ok(Self { title: name.clone(), name, edges, sumw, sumw2 })
    }

    /// Slice `category`/`variation` of a 1D histogram; a slice never filled
    /// gives an empty histogram.
    pub fn from_hist(name: impl Into<String>, hist: &Hist, category: &str, variation: &str) -> Result<Self> {
        let name = name.into();
        let [axis] = hist.axes.as_slice() else {
            return Err(Error::Validation(format!(
                "shape '{name}' needs a one-dimensional histogram, got {} axes",
                hist.axes.len()
            )));
        };
        let n_cells = hist.n_cells();
        let (sumw, sumw2) = match hist.get(category, variation) {
            Some(c) => (c.sumw.clone(), c.sumw2.clone()),
            None => (vec![0.0; n_cells], vec![0.0; n_cells]),
        };
        Self::new(name, axis.binning.edges(), sumw, sumw2)
    }

    /// Add the cells of a histogram with the same binning.
    pub fn accumulate(&mut self, other: &Th1d) -> Result<()> {
        if self.edges != other.edges {
            return Err(Error::Validation(format!(
                "cannot add '{}' to '{}': binnings differ",
                other.name, self.name
            )));
        }
        self.sumw.iter_mut().zip(&other.sumw).for_each(|(a, b)| *a += b);
        self.sumw2.iter_mut().zip(&other.sumw2).for_each(|(a, b)| *a += b);
        Ok(())
    }

    /// Same content under another name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.title = self.name.clone();
        self
    }

    /// Number of regular bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Σw over the regular bins.
    pub fn integral(&self) -> f64 {
        self.sumw[1..=self.n_bins()].iter().sum()
    }

    fn is_uniform(&self) -> bool {
        let n = self.n_bins() as f64;
        let width = (self.edges[self.edges.len() - 1] - self.edges[0]) / n;
        self.edges.windows(2).all(|w| ((w[1] - w[0]) - width).abs() <= 1e-9 * width.abs().max(1.0))
    }

    /// Serialize the object payload (what a key points at).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WBuffer::new();
        let th1d = w.begin_version(3);
        self.write_th1(&mut w);
        w.write_array_f64(&self.sumw);
        w.end_version(th1d);
        w.into_inner()
    }

    fn write_th1(&self, w: &mut WBuffer) {
        let n = self.n_bins();
        let inner = 1..=n;
        let centers: Vec<f64> = self.edges.windows(2).map(|e| 0.5 * (e[0] + e[1])).collect();
        let tsumw: f64 = self.sumw[inner.clone()].iter().sum();
        let tsumw2: f64 = self.sumw2[inner.clone()].iter().sum();
        let tsumwx: f64 = self.sumw[inner.clone()].iter().zip(&centers).map(|(w, x)| w * x).sum();
        let tsumwx2: f64 = self.sumw[inner].iter().zip(&centers).map(|(w, x)| w * x * x).sum();
        let entries: f64 = self.sumw.iter().sum();

        let th1 = w.begin_version(8);
        w.write_tnamed(&self.name, &self.title);

        // TAttLine
        let v = w.begin_version(2);
        w.write_i16(602);
        w.write_i16(1);
        w.write_i16(1);
        w.end_version(v);
        // TAttFill
        let v = w.begin_version(2);
        w.write_i16(0);
        w.write_i16(1001);
        w.end_version(v);
        // TAttMarker
        let v = w.begin_version(2);
        w.write_i16(1);
        w.write_i16(1);
        w.write_f32(1.0);
        w.end_version(v);

        w.write_i32((n + 2) as i32);
        let xbins: &[f64] = if self.is_uniform() { &[] } else { &self.edges };
        write_axis(w, "xaxis", n, self.edges[0], self.edges[n], xbins);
        write_axis(w, "yaxis", 1, 0.0, 1.0, &[]);
        write_axis(w, "zaxis", 1, 0.0, 1.0, &[]);

        w.write_i16(0); // fBarOffset
        w.write_i16(1000); // fBarWidth
        w.write_f64(entries);
        w.write_f64(tsumw);
        w.write_f64(tsumw2);
        w.write_f64(tsumwx);
        w.write_f64(tsumwx2);
        w.write_f64(-1111.0); // fMaximum
        w.write_f64(-1111.0); // fMinimum
        w.write_f64(0.0); // fNormFactor
        w.write_array_f64(&[]); // fContour
        w.write_array_f64(&self.sumw2);
        w.write_string(""); // fOption
        write_empty_list_pointer(w);
        w.write_i32(0); // fBufferSize
        w.write_u8(0); // fBuffer: null pointer marker
        w.write_i32(0); // fBinStatErrOpt
        w.write_i32(2); // fStatOverflows: kNeutral
        w.end_version(th1);
    }
}

fn write_axis(w: &mut WBuffer, name: &str, n_bins: usize, xmin: f64, xmax: f64, xbins: &[f64]) {
    let axis = w.begin_version(10);
    w.write_tnamed(name, "");

    let att = w.begin_version(4);
    w.write_i32(510); // fNdivisions
    w.write_i16(1); // fAxisColor
    w.write_i16(1); // fLabelColor
    w.write_i16(42); // fLabelFont
    w.write_f32(0.005); // fLabelOffset
    w.write_f32(0.035); // fLabelSize
    w.write_f32(0.03); // fTickLength
    w.write_f32(1.0); // fTitleOffset
    w.write_f32(0.035); // fTitleSize
    w.write_i16(1); // fTitleColor
    w.write_i16(42); // fTitleFont
    w.end_version(att);

    w.write_i32(n_bins as i32);
    w.write_f64(xmin);
    w.write_f64(xmax);
    w.write_array_f64(xbins);
    w.write_i32(0); // fFirst
    w.write_i32(0); // fLast
    w.write_u16(0); // fBits2
    w.write_u8(0); // fTimeDisplay
    w.write_string(""); // fTimeFormat
    w.write_u32(0); // fLabels
    w.write_u32(0); // fModLabs
    w.end_version(axis);
}

/// `fFunctions`: a pointer to an empty `TList`, tagged with its class name.
fn write_empty_list_pointer(w: &mut WBuffer) {
    let start = w.pos();
    w.write_u32(0);
    w.write_u32(NEW_CLASS_TAG);
    w.write_cstring("TList");
    write_empty_list(w);
    let count = (w.pos() - start - 4) as u32;
    w.patch_u32(start, count | BYTE_COUNT_MASK);
}

/// An empty `TList` body (also used for the streamer-info record).
pub(crate) fn write_empty_list(w: &mut WBuffer) {
    let list = w.begin_version(5);
    w.write_tobject(TOBJECT_BITS);
    w.write_string("");
    w.write_i32(0);
    w.end_version(list);
}
