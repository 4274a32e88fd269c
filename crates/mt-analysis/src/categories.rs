//! Fit-template categories.
//!
//! Template categories are the cartesian product of an msd window, pT bins,
//! tagger working points, τ21 cuts and the pass/fail split of the tagger:
//!
//! `msd-80to170_Pt-350to425_particleNet_XbbVsQCD-HHbbtt_tau21_0p30_pass`
//!
//! The part before `_tau21_` is the template *group*, `tau21_0p30` the *cut*
//! and the suffix the *region*. Datacards are produced per group and cut,
//! with one card per region.

use std::collections::BTreeMap;

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::cuts::{Cut, Selection};

/// Generator settings for template categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCategories {
    /// Soft-drop mass window `[lo, hi]`
    pub msd: [f64; 2],
    /// pT bin edges; the last bin is open-ended
    pub pt_bins: Vec<f64>,
    /// Tagger score → working-point name → threshold
    pub taggers: BTreeMap<String, BTreeMap<String, f64>>,
    /// τ21 upper cuts
    pub tau21: Vec<f64>,
    /// Minimum jet pt applied together with the msd window
    #[serde(default)]
    pub pt_min: f64,
}

/// Format a number the way it appears in category names: integers without
/// decimals, anything else with `.` replaced by `p`.
pub fn fmt_edge(x: f64) -> String {
    if x.fract() == 0.0 { format!("{x:.0}") } else { x.to_string().replace('.', "p") }
}

/// Cut label of a τ21 threshold (`0.3` → `tau21_0p30`).
pub fn tau21_label(t: f64) -> String {
    format!("tau21_{t:.2}").replace('.', "p")
}

/// Parsed template category name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCategory {
    /// `msd-.._Pt-.._{tagger}-{wp}`
    pub group: String,
    /// `tau21_0p30`
    pub cut: String,
    /// Pass (true) or fail region
    pub pass: bool,
}

/// Split a template category name into group, cut and region.
pub fn parse_template_category(name: &str) -> Option<TemplateCategory> {
    let (rest, pass) = if let Some(r) = name.strip_suffix("_pass") {
        (r, true)
    } else {
        (name.strip_suffix("_fail")?, false)
    };
    let idx = rest.rfind("_tau21_")?;
    Some(TemplateCategory { group: rest[..idx].to_string(), cut: rest[idx + 1..].to_string(), pass })
}

impl TemplateCategories {
    /// Check the generator settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.msd[1] > self.msd[0]) {
            return Err(Error::Config(format!("template msd window {:?} is empty", self.msd)));
        }
        if self.pt_bins.is_empty() || self.pt_bins.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Config("template pt_bins must be increasing and non-empty".into()));
        }
        if self.taggers.values().all(BTreeMap::is_empty) {
            return Err(Error::Config("template categories need at least one tagger working point".into()));
        }
        if self.tau21.is_empty() {
            return Err(Error::Config("template categories need at least one tau21 cut".into()));
        }
        Ok(())
    }

    /// Template group names, in generation order.
    pub fn groups(&self) -> Vec<String> {
        let mut out = Vec::new();
        let msd = format!("msd-{}to{}", fmt_edge(self.msd[0]), fmt_edge(self.msd[1]));
        for (i, lo) in self.pt_bins.iter().enumerate() {
            let hi = self.pt_bins.get(i + 1).map(|h| fmt_edge(*h)).unwrap_or_else(|| "Inf".into());
            for (tagger, wps) in &self.taggers {
                for wp in wps.keys() {
                    out.push(format!("{msd}_Pt-{}to{hi}_{tagger}-{wp}", fmt_edge(*lo)));
                }
            }
        }
        out
    }

    /// All template categories as selections.
    pub fn selections(&self) -> Vec<Selection> {
        let msd = format!("msd-{}to{}", fmt_edge(self.msd[0]), fmt_edge(self.msd[1]));
        let mut out = Vec::new();
        for (i, lo) in self.pt_bins.iter().enumerate() {
            let hi = self.pt_bins.get(i + 1).copied();
            let pt_name = format!("Pt-{}to{}", fmt_edge(*lo), hi.map(fmt_edge).unwrap_or_else(|| "Inf".into()));
            for (tagger, wps) in &self.taggers {
                for (wp_name, wp) in wps {
                    for t in &self.tau21 {
                        let base = format!("{msd}_{pt_name}_{tagger}-{wp_name}_{}", tau21_label(*t));
                        let common = vec![
                            Cut::PtMsdWindow { pt: self.pt_min, msd_lo: self.msd[0], msd_hi: self.msd[1] },
                            Cut::PtBin { lo: *lo, hi },
                            Cut::Tau21Max { max: *t },
                        ];
                        let mut pass = common.clone();
                        pass.push(Cut::TaggerPass { tagger: tagger.clone(), wp: *wp });
                        let mut fail = common;
                        fail.push(Cut::TaggerFail { tagger: tagger.clone(), wp: *wp });
                        out.push(Selection::new(format!("{base}_pass"), pass));
                        out.push(Selection::new(format!("{base}_fail"), fail));
                    }
                }
            }
        }
        out
    }
}
