//! Analysis configuration.
//!
//! A configuration is one YAML (or `.json`) document. The literal
//! `${config_dir:}` is replaced by the directory of the configuration file
//! before parsing, and relative paths to dataset definitions and correction
//! files are resolved against the same directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mt_core::{Error, Flavor, Result};
use serde::{Deserialize, Serialize};

use crate::categories::TemplateCategories;
use crate::cuts::{Cut, Selection};
use crate::hist::{HistConf, HistPreset};
use crate::selection::{FatJetCuts, LeptonCuts};

/// Placeholder replaced by the configuration directory.
pub const CONFIG_DIR_PLACEHOLDER: &str = "${config_dir:}";

/// Processing workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Fat-jet preselection with SV observables
    FatjetBase,
    /// Leading two pt>350, msd>40 jets with per-jet reweighting
    Mutag,
    /// `mutag` with muon-tagged jets only
    MutagOneMuAk8,
    /// Derivation inputs of the (pt, eta, tau21) reweighting
    PtReweighting,
}

/// Histograms receiving the per-jet reweighting, by jet-position bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramsToReweigh {
    /// Bucket (`all`, `1`, `2`) → histogram names
    pub by_pos: BTreeMap<String, Vec<String>>,
}

fn default_reweighting_samples() -> Vec<String> {
    vec!["QCD_MuEnriched".into(), "QCD_HT".into()]
}

/// Workflow-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Histograms filled with the per-jet reweighting
    #[serde(default)]
    pub histograms_to_reweigh: Option<HistogramsToReweigh>,
    /// Samples the per-jet reweighting applies to
    #[serde(default = "default_reweighting_samples")]
    pub reweighting_samples: Vec<String>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self { histograms_to_reweigh: None, reweighting_samples: default_reweighting_samples() }
    }
}

/// Dataset filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetFilter {
    /// Samples to keep (empty = all)
    #[serde(default)]
    pub samples: Vec<String>,
    /// Samples to drop
    #[serde(default)]
    pub samples_exclude: Vec<String>,
    /// Periods to keep (empty = all)
    #[serde(default)]
    pub year: Vec<String>,
}

/// Dataset section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetsConfig {
    /// Dataset definition files
    pub jsons: Vec<PathBuf>,
    /// Filters
    #[serde(default)]
    pub filter: DatasetFilter,
    /// Explicit subsamples: sample → subsample → cuts
    #[serde(default)]
    pub subsamples: BTreeMap<String, BTreeMap<String, Vec<Cut>>>,
    /// Samples split into `{sample}_{l,c,b,cc,bb}` by jet flavour
    #[serde(default)]
    pub flavor_split: Vec<String>,
}

fn default_muon() -> LeptonCuts {
    LeptonCuts { pt: 5.0, eta: 2.4, iso: 0.15, id: "looseId".into() }
}

fn default_electron() -> LeptonCuts {
    LeptonCuts { pt: 15.0, eta: 2.5, iso: 0.15, id: "mvaIso_WP90".into() }
}

fn default_fatjet() -> FatJetCuts {
    FatJetCuts { pt: 250.0, eta: 2.4, jet_id: 2, msd: 20.0, dr: None, nmu: 1 }
}

/// Object preselection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPreselection {
    /// Muons
    #[serde(rename = "Muon", default = "default_muon")]
    pub muon: LeptonCuts,
    /// Electrons
    #[serde(rename = "Electron", default = "default_electron")]
    pub electron: LeptonCuts,
    /// AK8 jets
    #[serde(rename = "FatJet", default = "default_fatjet")]
    pub fatjet: FatJetCuts,
}

impl Default for ObjectPreselection {
    fn default() -> Self {
        Self { muon: default_muon(), electron: default_electron(), fatjet: default_fatjet() }
    }
}

/// A named correction inside a correction file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRef {
    /// correctionlib JSON file
    pub file: PathBuf,
    /// Correction name
    pub name: String,
}

fn default_jet_type() -> String {
    "AK8PFPuppi".into()
}

/// Jet calibration of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetCalibrationConfig {
    /// JERC correctionlib file
    pub file: PathBuf,
    /// JEC tag for simulation (`Summer22_22Sep2023_V2_MC`)
    #[serde(default)]
    pub jec_mc: Option<String>,
    /// JEC tag for data, by era
    #[serde(default)]
    pub jec_data: BTreeMap<String, String>,
    /// JER tag (`Summer22_22Sep2023_JRV1_MC`); smearing is skipped when unset
    #[serde(default)]
    pub jer: Option<String>,
    /// Jet algorithm suffix of the correction names
    #[serde(default = "default_jet_type")]
    pub jet_type: String,
}

/// Analysis parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Object preselection thresholds
    #[serde(default)]
    pub object_preselection: ObjectPreselection,
    /// Period → family → trigger paths
    #[serde(default, rename = "HLT_triggers")]
    pub hlt_triggers: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Period → family → path → prescale
    #[serde(default, rename = "HLT_triggers_prescales")]
    pub hlt_prescales: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// Sample → period → (pt, eta, tau21) reweighting file
    #[serde(default)]
    pub ptetatau21_reweighting: BTreeMap<String, BTreeMap<String, PathBuf>>,
    /// Period → leading-jet pt reweighting file
    #[serde(default)]
    pub pt_reweighting: BTreeMap<String, PathBuf>,
    /// Period → leading-jet (pt, eta) reweighting file
    #[serde(default)]
    pub pteta_reweighting: BTreeMap<String, PathBuf>,
    /// Period → integrated luminosity (pb⁻¹)
    #[serde(default)]
    pub lumi: BTreeMap<String, f64>,
    /// Period → pileup weight correction (inputs: NumTrueInteractions, weights)
    #[serde(default)]
    pub pileup: BTreeMap<String, CorrectionRef>,
    /// Period → event filter flags
    #[serde(default)]
    pub event_flags: BTreeMap<String, Vec<String>>,
    /// Period → additional filter flags for data
    #[serde(default)]
    pub event_flags_data: BTreeMap<String, Vec<String>>,
    /// Period → golden JSON
    #[serde(default)]
    pub lumi_mask: BTreeMap<String, PathBuf>,
    /// Period → jet calibration
    #[serde(default)]
    pub jets_calibration: BTreeMap<String, JetCalibrationConfig>,
}

/// Weights applied to every event, plus per-sample extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Applied to all samples
    #[serde(default)]
    pub common: Vec<String>,
    /// Sample → extra weights
    #[serde(default)]
    pub by_sample: BTreeMap<String, Vec<String>>,
}

/// Systematic variations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationsConfig {
    /// Weights whose Up/Down variations are filled
    #[serde(default)]
    pub weights: Vec<String>,
    /// Shape variations (`JES_Total_AK8PFPuppi`, `JER_AK8PFPuppi`)
    #[serde(default)]
    pub shape: Vec<String>,
}

fn default_chunk() -> usize {
    100_000
}

/// Execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Events per chunk
    #[serde(default = "default_chunk")]
    pub chunk: usize,
    /// Worker threads (rayon default when unset)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Files per dataset to process (all when unset)
    #[serde(default)]
    pub limit_files: Option<usize>,
    /// Chunks per file to process (all when unset)
    #[serde(default)]
    pub limit_chunks: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { chunk: default_chunk(), workers: None, limit_files: None, limit_chunks: None }
    }
}

/// Complete analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Workflow
    pub workflow: WorkflowKind,
    /// Workflow options
    #[serde(default)]
    pub workflow_options: WorkflowOptions,
    /// Datasets
    pub datasets: DatasetsConfig,
    /// Parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Skim cuts (before object preselection)
    #[serde(default)]
    pub skim: Vec<Cut>,
    /// Preselection cuts (after object preselection)
    #[serde(default)]
    pub preselections: Vec<Cut>,
    /// Explicit categories
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<Cut>>,
    /// Generated fit-template categories
    #[serde(default)]
    pub template_categories: Option<TemplateCategories>,
    /// Weights
    #[serde(default)]
    pub weights: WeightsConfig,
    /// Variations
    #[serde(default)]
    pub variations: VariationsConfig,
    /// Histograms
    #[serde(default)]
    pub variables: BTreeMap<String, HistConf>,
    /// Histogram presets
    #[serde(default)]
    pub variable_presets: Vec<HistPreset>,
    /// Execution options
    #[serde(default)]
    pub run_options: RunOptions,
}

/// Read a configuration file (`.json` as JSON, anything else as YAML).
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let text = text.replace(CONFIG_DIR_PLACEHOLDER, &dir.to_string_lossy());
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let mut cfg: AnalysisConfig = if ext == "json" {
        serde_json::from_str(&text)?
    } else {
        serde_yaml_ng::from_str(&text)?
    };
    cfg.resolve_paths(dir);
    cfg.validate()?;
    tracing::debug!(path = %path.display(), workflow = ?cfg.workflow, "loaded analysis configuration");
    Ok(cfg)
}

fn resolve(base: &Path, p: &mut PathBuf) {
    if p.is_relative() {
        *p = base.join(&*p);
    }
}

impl AnalysisConfig {
    /// Make every relative file path relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.datasets.jsons.iter_mut().for_each(|p| resolve(base, p));
        let p = &mut self.parameters;
        p.ptetatau21_reweighting.values_mut().flat_map(|m| m.values_mut()).for_each(|f| resolve(base, f));
        p.pt_reweighting.values_mut().for_each(|f| resolve(base, f));
        p.pteta_reweighting.values_mut().for_each(|f| resolve(base, f));
        p.pileup.values_mut().for_each(|c| resolve(base, &mut c.file));
        p.lumi_mask.values_mut().for_each(|f| resolve(base, f));
        p.jets_calibration.values_mut().for_each(|c| resolve(base, &mut c.file));
    }

    /// Structural checks that do not depend on the workflow.
    pub fn validate(&self) -> Result<()> {
        if self.datasets.jsons.is_empty() {
            return Err(Error::Config("datasets.jsons is empty".into()));
        }
        if self.run_options.chunk == 0 {
            return Err(Error::Config("run_options.chunk must be positive".into()));
        }
        if let Some(t) = &self.template_categories {
            t.validate()?;
        }
        for (name, h) in self.histograms() {
            if h.axes.is_empty() {
                return Err(Error::Config(format!("histogram '{name}' has no axes")));
            }
            for a in &h.axes {
                a.binning.validate().map_err(|e| Error::Config(format!("histogram '{name}': {e}")))?;
            }
        }
        let categories = self.categories();
        if categories.is_empty() {
            return Err(Error::Config("no categories defined".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for c in &categories {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::Config(format!("category '{}' defined twice", c.name)));
            }
        }
        for name in &self.variations.shape {
            if !(name.starts_with("JES_") || name.starts_with("JER_")) {
                return Err(Error::Config(format!("unsupported shape variation '{name}'")));
            }
        }
        Ok(())
    }

    /// Explicit and generated categories.
    pub fn categories(&self) -> Vec<Selection> {
        let mut out: Vec<Selection> =
            self.categories.iter().map(|(n, c)| Selection::new(n.clone(), c.clone())).collect();
        if let Some(t) = &self.template_categories {
            out.extend(t.selections());
        }
        out
    }

    /// Histogram definitions, presets expanded (explicit entries win).
    pub fn histograms(&self) -> BTreeMap<String, HistConf> {
        let mut out = BTreeMap::new();
        for p in &self.variable_presets {
            out.extend(p.expand());
        }
        out.extend(self.variables.clone());
        out
    }

    /// Subsamples of `sample`; a sample with none is its own subsample.
    pub fn subsamples(&self, sample: &str) -> Vec<Selection> {
        let mut out: Vec<Selection> = self
            .datasets
            .subsamples
            .get(sample)
            .map(|m| m.iter().map(|(n, c)| Selection::new(n.clone(), c.clone())).collect())
            .unwrap_or_default();
        if self.datasets.flavor_split.iter().any(|s| s == sample) {
            out.extend(
                Flavor::ALL
                    .iter()
                    .map(|f| Selection::new(format!("{sample}_{f}"), vec![Cut::Flavor { flavor: *f }])),
            );
        }
        if out.is_empty() {
            out.push(Selection::new(sample, Vec::new()));
        }
        out
    }

    /// Weights for `sample`: common ones, then sample-specific ones.
    pub fn weights_for(&self, sample: &str) -> Vec<String> {
        let mut out = self.weights.common.clone();
        if let Some(extra) = self.weights.by_sample.get(sample) {
            out.extend(extra.iter().cloned());
        }
        out
    }
}
