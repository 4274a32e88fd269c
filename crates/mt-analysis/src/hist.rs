//! Dense N-dimensional histograms keyed by category and variation.
//!
//! Each axis carries an underflow and an overflow cell, so an axis with `n`
//! bins has `n + 2` cells; cells are stored row-major with the last axis
//! fastest. Weights and squared weights are kept per
//! `category → variation → cell`.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Axis binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binning {
    /// `bins` equal-width bins in `[start, stop)`.
    Regular {
        /// Number of bins.
        bins: usize,
        /// Lower edge.
        start: f64,
        /// Upper edge.
        stop: f64,
    },
    /// Explicit increasing edges.
    Variable {
        /// Bin edges.
        edges: Vec<f64>,
    },
}

impl Binning {
    /// Check the binning is usable.
    pub fn validate(&self) -> Result<()> {
        match self {
            Binning::Regular { bins, start, stop } => {
                if *bins == 0 || !(stop > start) {
                    return Err(Error::Config(format!(
                        "regular binning needs bins > 0 and stop > start (got {bins}, [{start}, {stop}))"
                    )));
                }
            }
            Binning::Variable { edges } => {
                if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(Error::Config(format!("variable binning needs increasing edges (got {edges:?})")));
                }
            }
        }
        Ok(())
    }

    /// Number of regular (non-flow) bins.
    pub fn n_bins(&self) -> usize {
        match self {
            Binning::Regular { bins, .. } => *bins,
            Binning::Variable { edges } => edges.len() - 1,
        }
    }

    /// Bin edges.
    pub fn edges(&self) -> Vec<f64> {
        match self {
            Binning::Regular { bins, start, stop } => {
                let w = (stop - start) / *bins as f64;
                (0..=*bins).map(|i| if i == *bins { *stop } else { start + w * i as f64 }).collect()
            }
            Binning::Variable { edges } => edges.clone(),
        }
    }

    /// Bin centres.
    pub fn centers(&self) -> Vec<f64> {
        self.edges().windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Cell index of `x`: 0 is underflow, `n + 1` overflow. NaN goes to overflow.
    pub fn cell(&self, x: f64) -> usize {
        let n = self.n_bins();
        if x.is_nan() {
            return n + 1;
        }
        match self {
            Binning::Regular { bins, start, stop } => {
                if x < *start {
                    0
                } else if x >= *stop {
                    n + 1
                } else {
                    let k = ((x - start) / (stop - start) * *bins as f64) as usize;
                    k.min(n - 1) + 1
                }
            }
            Binning::Variable { edges } => {
                let k = edges.partition_point(|e| *e <= x);
                if k == edges.len() { n + 1 } else { k }
            }
        }
    }
}

/// A named histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistAxis {
    /// Axis name.
    pub name: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Binning.
    pub binning: Binning,
}

/// Weight sums of one (category, variation) slice, flow cells included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cells {
    /// Σw per cell
    pub sumw: Vec<f64>,
    /// Σw² per cell
    pub sumw2: Vec<f64>,
}

impl Cells {
    fn zeros(n: usize) -> Self {
        Self { sumw: vec![0.0; n], sumw2: vec![0.0; n] }
    }

    fn add(&mut self, other: &Cells) {
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
    }
}

/// Dense histogram with category and variation keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist {
    /// Dense axes.
    pub axes: Vec<HistAxis>,
    /// `category → variation → cells`.
    pub values: BTreeMap<String, BTreeMap<String, Cells>>,
}

impl Hist {
    /// Empty histogram over `axes`.
    pub fn new(axes: Vec<HistAxis>) -> Self {
        Self { axes, values: BTreeMap::new() }
    }

    /// Number of cells including flow.
    pub fn n_cells(&self) -> usize {
        self.axes.iter().map(|a| a.binning.n_bins() + 2).product()
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.axes.len()];
        for i in (0..self.axes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * (self.axes[i + 1].binning.n_bins() + 2);
        }
        strides
    }

    /// Flat cell index of a coordinate tuple.
    pub fn cell_index(&self, coords: &[f64]) -> Result<usize> {
        if coords.len() != self.axes.len() {
            return Err(Error::Validation(format!(
                "histogram has {} axes, got {} coordinates",
                self.axes.len(),
                coords.len()
            )));
        }
        Ok(self.strides().iter().zip(&self.axes).zip(coords).map(|((s, a), &x)| s * a.binning.cell(x)).sum())
    }

    /// Add weight `w` at `coords` in the given slice.
    pub fn fill(&mut self, category: &str, variation: &str, coords: &[f64], w: f64) -> Result<()> {
        let idx = self.cell_index(coords)?;
        let n = self.n_cells();
        let cells = self
            .values
            .entry(category.to_string())
            .or_default()
            .entry(variation.to_string())
            .or_insert_with(|| Cells::zeros(n));
        cells.sumw[idx] += w;
        cells.sumw2[idx] += w * w;
        Ok(())
    }

    /// Add another histogram with identical axes.
    pub fn merge(&mut self, other: &Hist) -> Result<()> {
        if self.axes != other.axes {
            return Err(Error::Validation("cannot merge histograms with different axes".into()));
        }
        for (cat, vars) in &other.values {
            let mine = self.values.entry(cat.clone()).or_default();
            for (var, cells) in vars {
                match mine.get_mut(var) {
                    Some(c) => c.add(cells),
                    None => {
                        mine.insert(var.clone(), cells.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Multiply all weights by `k` (squared weights by `k²`).
    pub fn scale(&mut self, k: f64) {
        for cells in self.values.values_mut().flat_map(|v| v.values_mut()) {
            cells.sumw.iter_mut().for_each(|x| *x *= k);
            cells.sumw2.iter_mut().for_each(|x| *x *= k * k);
        }
    }

    /// Cells of one slice.
    pub fn get(&self, category: &str, variation: &str) -> Option<&Cells> {
        self.values.get(category)?.get(variation)
    }

    /// Categories with at least one fill.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Variations filled in `category`.
    pub fn variations(&self, category: &str) -> Vec<&str> {
        self.values.get(category).map(|v| v.keys().map(String::as_str).collect()).unwrap_or_default()
    }

    /// Flat indices of the non-flow cells, row-major.
    fn inner_indices(&self) -> Vec<usize> {
        let strides = self.strides();
        let mut out = vec![0usize];
        for (axis, stride) in self.axes.iter().zip(&strides) {
            let n = axis.binning.n_bins();
            out = out.iter().flat_map(|base| (1..=n).map(move |k| base + k * stride)).collect();
        }
        out
    }

    /// Σw and Σw² of the non-flow cells of a slice (zeros if never filled).
    pub fn inner(&self, category: &str, variation: &str) -> (Vec<f64>, Vec<f64>) {
        let idx = self.inner_indices();
        match self.get(category, variation) {
            Some(c) => (idx.iter().map(|&i| c.sumw[i]).collect(), idx.iter().map(|&i| c.sumw2[i]).collect()),
            None => (vec![0.0; idx.len()], vec![0.0; idx.len()]),
        }
    }

    /// Σw over all cells of a slice, flow included.
    pub fn total(&self, category: &str, variation: &str) -> f64 {
        self.get(category, variation).map(|c| c.sumw.iter().sum()).unwrap_or(0.0)
    }

    /// Σw along one axis: non-flow bins of `axis`, every cell of the other axes summed.
    pub fn project(&self, category: &str, variation: &str, axis: usize) -> Option<Vec<f64>> {
        let target = self.axes.get(axis)?;
        let cells = self.get(category, variation)?;
        let n = target.binning.n_bins();
        let stride = self.strides()[axis];
        let mut out = vec![0.0; n];
        for (i, w) in cells.sumw.iter().enumerate() {
            let k = (i / stride) % (n + 2);
            if (1..=n).contains(&k) {
                out[k - 1] += w;
            }
        }
        Some(out)
    }

    /// Index of the axis called `name`.
    pub fn axis_index(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|a| a.name == name)
    }
}

/// One axis of a histogram definition: which object field to read and how to bin it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConf {
    /// Collection (`FatJetGood`, `MuonGood`, `events`, ...).
    pub coll: String,
    /// Field name within the collection.
    pub field: String,
    /// Axis name (defaults to `{coll}_{field}`).
    #[serde(default)]
    pub name: Option<String>,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Binning.
    #[serde(flatten)]
    pub binning: Binning,
    /// Only use the object at this position in the collection.
    #[serde(default)]
    pub pos: Option<usize>,
}

impl AxisConf {
    /// Regular axis.
    pub fn regular(coll: &str, field: &str, bins: usize, start: f64, stop: f64) -> Self {
        Self {
            coll: coll.into(),
            field: field.into(),
            name: None,
            label: String::new(),
            binning: Binning::Regular { bins, start, stop },
            pos: None,
        }
    }

    /// Variable-width axis.
    pub fn variable(coll: &str, field: &str, edges: Vec<f64>) -> Self {
        Self {
            coll: coll.into(),
            field: field.into(),
            name: None,
            label: String::new(),
            binning: Binning::Variable { edges },
            pos: None,
        }
    }

    /// Restrict to one position.
    pub fn at(mut self, pos: Option<usize>) -> Self {
        self.pos = pos;
        self
    }

    /// Axis name in the produced histogram.
    pub fn axis_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("{}_{}", self.coll, self.field))
    }

    /// Whether the axis reads an event-level quantity.
    pub fn is_event_level(&self) -> bool {
        self.coll == "events"
    }
}

/// Histogram definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistConf {
    /// Axes.
    pub axes: Vec<AxisConf>,
    /// Restrict filling to these categories (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub only_categories: Vec<String>,
}

impl HistConf {
    /// Definition with the given axes.
    pub fn new(axes: Vec<AxisConf>) -> Self {
        Self { axes, only_categories: Vec::new() }
    }

    /// Empty histogram with these axes.
    pub fn build(&self) -> Hist {
        Hist::new(
            self.axes
                .iter()
                .map(|a| HistAxis { name: a.axis_name(), label: a.label.clone(), binning: a.binning.clone() })
                .collect(),
        )
    }

    /// Jet position the histogram is restricted to, if any axis sets one.
    pub fn position(&self) -> Option<usize> {
        self.axes.iter().find_map(|a| a.pos)
    }

    /// Whether the histogram is filled in `category`.
    pub fn fills(&self, category: &str) -> bool {
        self.only_categories.is_empty() || self.only_categories.iter().any(|c| c == category)
    }
}

/// Named shortcut generating a group of histogram definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum HistPreset {
    /// Standard kinematics of a fat-jet collection.
    Fatjet {
        /// Collection
        coll: String,
        /// Optional position
        #[serde(default)]
        pos: Option<usize>,
    },
    /// Secondary-vertex observables attached to a fat-jet collection.
    Sv {
        /// Collection
        coll: String,
        /// Optional position
        #[serde(default)]
        pos: Option<usize>,
    },
    /// Object multiplicity.
    Count {
        /// Collection counted
        coll: String,
        /// Histogram name (defaults to `n{coll}`)
        #[serde(default)]
        name: Option<String>,
        /// Number of bins
        bins: usize,
        /// Lower edge
        start: f64,
        /// Upper edge
        stop: f64,
    },
}

impl HistPreset {
    /// Expand into named definitions.
    pub fn expand(&self) -> BTreeMap<String, HistConf> {
        match self {
            HistPreset::Fatjet { coll, pos } => fatjet_hists(coll, *pos),
            HistPreset::Sv { coll, pos } => sv_hists(coll, *pos),
            HistPreset::Count { coll, name, bins, start, stop } => {
                count_hist(name.as_deref(), coll, *bins, *start, *stop)
            }
        }
    }
}

fn hist_name(coll: &str, field: &str, pos: Option<usize>) -> String {
    match pos {
        Some(p) => format!("{coll}_{field}_{}", p + 1),
        None => format!("{coll}_{field}"),
    }
}

fn single(coll: &str, field: &str, pos: Option<usize>, binning: Binning) -> (String, HistConf) {
    let axis = AxisConf {
        coll: coll.into(),
        field: field.into(),
        name: Some(hist_name(coll, field, pos)),
        label: String::new(),
        binning,
        pos,
    };
    (hist_name(coll, field, pos), HistConf::new(vec![axis]))
}

/// Kinematics and substructure of a fat-jet collection.
pub fn fatjet_hists(coll: &str, pos: Option<usize>) -> BTreeMap<String, HistConf> {
    let r = |bins, start, stop| Binning::Regular { bins, start, stop };
    [
        single(coll, "pt", pos, r(150, 0.0, 1500.0)),
        single(coll, "eta", pos, r(50, -2.5, 2.5)),
        single(coll, "phi", pos, r(64, -PI, PI)),
        single(coll, "mass", pos, r(80, 0.0, 400.0)),
        single(coll, "msoftdrop", pos, r(80, 0.0, 400.0)),
        single(coll, "tau21", pos, r(20, 0.0, 1.0)),
        single(coll, "nMuonGoodMatchedToFatJetGood", pos, r(10, 0.0, 10.0)),
    ]
    .into_iter()
    .collect()
}

/// Secondary-vertex mass observables of a fat-jet collection.
pub fn sv_hists(coll: &str, pos: Option<usize>) -> BTreeMap<String, HistConf> {
    let r = |bins, start, stop| Binning::Regular { bins, start, stop };
    [
        single(coll, "nSVMatchedToFatJetGood", pos, r(10, 0.0, 10.0)),
        single(coll, "sumcorrSVmass", pos, r(50, 0.0, 50.0)),
        single(coll, "logsumcorrSVmass", pos, r(42, -2.4, 6.0)),
        single(coll, "sv1mass", pos, r(50, 0.0, 50.0)),
        single(coll, "logsv1mass", pos, r(42, -2.4, 6.0)),
    ]
    .into_iter()
    .collect()
}

/// Multiplicity of a collection, read from the event-level counter `n{coll}`.
pub fn count_hist(name: Option<&str>, coll: &str, bins: usize, start: f64, stop: f64) -> BTreeMap<String, HistConf> {
    let name = name.map(str::to_string).unwrap_or_else(|| format!("n{coll}"));
    let axis = AxisConf {
        coll: "events".into(),
        field: format!("n{coll}"),
        name: Some(name.clone()),
        label: String::new(),
        binning: Binning::Regular { bins, start, stop },
        pos: None,
    };
    BTreeMap::from([(name, HistConf::new(vec![axis]))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn axis(name: &str, binning: Binning) -> HistAxis {
        HistAxis { name: name.into(), label: String::new(), binning }
    }

    #[test]
    fn cells_include_flow() {
        let b = Binning::Regular { bins: 4, start: 0.0, stop: 4.0 };
        assert_eq!(b.cell(-0.1), 0);
        assert_eq!(b.cell(0.0), 1);
        assert_eq!(b.cell(3.999), 4);
        assert_eq!(b.cell(4.0), 5);
        assert_eq!(b.cell(f64::NAN), 5);

        let v = Binning::Variable { edges: vec![0.0, 0.2, 0.5, 1.0] };
        assert_eq!(v.cell(-1.0), 0);
        assert_eq!(v.cell(0.2), 2);
        assert_eq!(v.cell(0.99), 3);
        assert_eq!(v.cell(1.0), 4);
        assert_eq!(v.edges(), vec![0.0, 0.2, 0.5, 1.0]);
    }

    #[test]
    fn fills_conserve_total_weight() {
        let mut h = Hist::new(vec![
            axis("x", Binning::Regular { bins: 3, start: 0.0, stop: 3.0 }),
            axis("y", Binning::Variable { edges: vec![0.0, 1.0, 10.0] }),
        ]);
        let pts = [(0.5, 0.5, 1.0), (2.5, 5.0, 2.0), (-1.0, 0.5, 0.5), (1.5, 100.0, 0.25), (9.0, -3.0, 3.0)];
        for (x, y, w) in pts {
            h.fill("inclusive", "nominal", &[x, y], w).unwrap();
        }
        assert_relative_eq!(h.total("inclusive", "nominal"), 6.75);
        let (inner, inner2) = h.inner("inclusive", "nominal");
        assert_eq!(inner.len(), 6);
        assert_relative_eq!(inner.iter().sum::<f64>(), 3.0);
        assert_relative_eq!(inner[0], 1.0);
        assert_relative_eq!(inner[5], 2.0);
        assert_relative_eq!(inner2[5], 4.0);
        assert_eq!(h.project("inclusive", "nominal", 0).unwrap(), vec![1.0, 0.25, 2.0]);
        assert!(h.fill("inclusive", "nominal", &[1.0], 1.0).is_err());
    }

    #[test]
    fn merge_and_scale() {
        let mk = || Hist::new(vec![axis("x", Binning::Regular { bins: 2, start: 0.0, stop: 2.0 })]);
        let mut a = mk();
        a.fill("c", "nominal", &[0.5], 2.0).unwrap();
        let mut b = mk();
        b.fill("c", "nominal", &[0.5], 1.0).unwrap();
        b.fill("c", "pileupUp", &[1.5], 1.0).unwrap();
        a.merge(&b).unwrap();
        a.scale(0.5);
        assert_eq!(a.inner("c", "nominal").0, vec![1.5, 0.0]);
        assert_eq!(a.inner("c", "nominal").1, vec![1.25, 0.0]);
        assert_eq!(a.variations("c"), vec!["nominal", "pileupUp"]);
        assert_eq!(a.inner("missing", "nominal").0, vec![0.0, 0.0]);

        let other = Hist::new(vec![axis("x", Binning::Regular { bins: 3, start: 0.0, stop: 2.0 })]);
        assert!(a.merge(&other).is_err());
    }

    #[test]
    fn presets_and_yaml_axes() {
        let hs = fatjet_hists("FatJetGood", Some(0));
        assert!(hs.contains_key("FatJetGood_pt_1"));
        assert_eq!(hs["FatJetGood_pt_1"].position(), Some(0));
        let c = count_hist(None, "FatJetGood", 10, 0.0, 10.0);
        assert!(c["nFatJetGood"].axes[0].is_event_level());

        let yaml = "axes:\n  - {coll: FatJetGood, field: logsumcorrSVmass, bins: 42, start: -2.4, stop: 6}\n  - {coll: FatJetGood, field: tau21, edges: [0, 0.2, 0.3, 1]}\n";
        let conf: HistConf = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(conf.axes[1].binning.n_bins(), 3);
        assert_eq!(conf.build().axes[0].name, "FatJetGood_logsumcorrSVmass");
    }
}
