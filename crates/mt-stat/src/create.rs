//! Datacard production from a run output.
//!
//! Per year, template group and τ21 cut the pass and fail cards are written
//! to `{out}/{year}/{group}/{cut}/{pass,fail}/`, next to a `combine_cards.sh`
//! that merges them and builds the workspace.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use mt_analysis::{Output, parse_template_category};
use mt_core::{Error, ProcessKind, Result, sample_flavor};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::datacard::{CardLayout, DataProcess, Datacard, DatacardMutag, McProcess, Systematic, passfail_ratio};

/// Fit observable used when none is given.
pub const DEFAULT_VARIABLE: &str = "FatJetGood_logsumcorrSVmass";

/// Card and shapes file names inside each region directory.
pub const CARD_NAME: &str = "datacard.txt";
/// Shapes file name.
pub const SHAPES_NAME: &str = "shapes.root";
/// Combination script written in each cut directory.
pub const COMBINE_SCRIPT: &str = "combine_cards.sh";

/// Settings of [`create_datacards`].
#[derive(Debug, Clone)]
pub struct DatacardOptions {
    /// Root of the card tree
    pub output_dir: PathBuf,
    /// Histogram used as fit template
    pub variable: String,
    /// Periods to produce; all periods of the output when empty
    pub years: Vec<String>,
    /// Shape nuisances taken from histogram variations
    pub shape_systematics: Vec<String>,
    /// Emit `autoMCStats`
    pub mcstat: bool,
    /// Output file recorded (with its digest) in the manifest
    pub input: Option<PathBuf>,
}

impl DatacardOptions {
    /// Defaults for a given output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            variable: DEFAULT_VARIABLE.into(),
            years: Vec::new(),
            shape_systematics: Vec::new(),
            mcstat: true,
            input: None,
        }
    }
}

/// Subsamples grouped by datacard process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleGroups {
    /// Light-flavour subsamples
    pub light: Vec<String>,
    /// Charm subsamples
    pub c: Vec<String>,
    /// Bottom subsamples
    pub b: Vec<String>,
    /// Data subsamples
    pub data_obs: Vec<String>,
}

impl SampleGroups {
    fn of(&self, kind: ProcessKind) -> &[String] {
        match kind {
            ProcessKind::Light => &self.light,
            ProcessKind::C => &self.c,
            ProcessKind::B => &self.b,
        }
    }
}

/// Group subsample names: `DATA_*` is data, flavour suffixes pick the process.
pub fn categorize_samples<'a>(subsamples: impl IntoIterator<Item = &'a str>) -> SampleGroups {
    let mut groups = SampleGroups::default();
    for s in subsamples {
        if s.starts_with("DATA_") {
            groups.data_obs.push(s.to_string());
            continue;
        }
        match sample_flavor(s).map(|f| f.process()) {
            Some(ProcessKind::Light) => groups.light.push(s.to_string()),
            Some(ProcessKind::C) => groups.c.push(s.to_string()),
            Some(ProcessKind::B) => groups.b.push(s.to_string()),
            None => tracing::debug!(subsample = %s, "subsample has no flavour; not used in datacards"),
        }
    }
    for v in [&mut groups.light, &mut groups.c, &mut groups.b, &mut groups.data_obs] {
        v.sort();
        v.dedup();
    }
    groups
}

/// light and c float freely; b is the signal measured through `r`.
pub fn define_processes(samples: &SampleGroups) -> (Vec<McProcess>, Vec<DataProcess>) {
    let mc = [ProcessKind::Light, ProcessKind::C, ProcessKind::B]
        .into_iter()
        .filter(|k| !samples.of(*k).is_empty())
        .map(|k| McProcess {
            name: k.name().to_string(),
            samples: samples.of(k).to_vec(),
            is_signal: k == ProcessKind::B,
            has_rate_param: k != ProcessKind::B,
        })
        .collect();
    let data = if samples.data_obs.is_empty() {
        Vec::new()
    } else {
        vec![DataProcess { name: "data_obs".into(), samples: samples.data_obs.clone() }]
    };
    (mc, data)
}

/// Normalization nuisances, then one shape nuisance per requested variation.
pub fn define_systematics(mc_processes: &[&str], shape_systematics: &[String]) -> Vec<Systematic> {
    let has = |p: &str| mc_processes.contains(&p);
    let mut systs = vec![Systematic::lnn("lumi", 1.025, mc_processes), Systematic::lnn("pileup", 1.01, mc_processes)];
    if has("light") {
        systs.push(Systematic::lnn("light_norm", 1.10, &["light"]));
    }
    if has("c") {
        systs.push(Systematic::lnn("c_norm", 1.15, &["c"]));
    }
    systs.extend(shape_systematics.iter().map(|s| Systematic::shape(s, mc_processes)));
    systs
}

/// A written pass/fail card pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardRecord {
    /// Period
    pub year: String,
    /// Template group
    pub category: String,
    /// τ21 cut label
    pub cut: String,
    /// Cut directory holding `pass/`, `fail/` and the combination script
    pub folder: PathBuf,
}

/// A card pair that could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardFailure {
    /// Period
    pub year: String,
    /// `{group}/{cut}`
    pub category: String,
    /// Error message
    pub error: String,
}

/// Outcome of [`create_datacards`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatacardReport {
    /// Written card pairs
    pub successful: Vec<CardRecord>,
    /// Failed card pairs
    pub failed: Vec<CardFailure>,
}

impl DatacardReport {
    /// Log one line per card pair and a summary.
    pub fn log(&self) {
        for s in &self.successful {
            tracing::info!(year = %s.year, category = %s.category, cut = %s.cut, folder = %s.folder.display(), "datacard ok");
        }
        for f in &self.failed {
            tracing::error!(year = %f.year, category = %f.category, error = %f.error, "datacard failed");
        }
        let total = self.successful.len() + self.failed.len();
        tracing::info!(total, successful = self.successful.len(), failed = self.failed.len(), "datacard summary");
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    tool: &'static str,
    version: &'static str,
    created: String,
    input: Option<String>,
    input_sha256: Option<String>,
    variable: &'a str,
    years: &'a [String],
    samples: &'a SampleGroups,
    report: &'a DatacardReport,
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io_at(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io_at(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

/// Combination commands for one cut directory.
pub fn combine_script() -> String {
    [
        "#!/usr/bin/env bash",
        "set -e",
        &format!("combineCards.py pass=pass/{CARD_NAME} fail=fail/{CARD_NAME} > datacard_combined.txt"),
        "text2workspace.py datacard_combined.txt -o workspace.root",
        "",
    ]
    .join("\n")
}

/// Template groups and cuts found in the output, with their regions.
fn template_cuts(output: &Output) -> BTreeMap<(String, String), BTreeSet<bool>> {
    let mut cuts: BTreeMap<(String, String), BTreeSet<bool>> = BTreeMap::new();
    for cat in output.cutflow.keys() {
        if let Some(t) = parse_template_category(cat) {
            cuts.entry((t.group, t.cut)).or_default().insert(t.pass);
        }
    }
    cuts
}

fn region_name(group: &str, cut: &str, pass: bool) -> String {
    format!("{group}_{cut}_{}", if pass { "pass" } else { "fail" })
}

/// Write the pass/fail cards and combination script for every year, group
/// and cut. Failures of single card pairs are collected, not propagated.
pub fn create_datacards(output: &Output, opts: &DatacardOptions) -> Result<DatacardReport> {
    let histograms = output.variables.get(&opts.variable).ok_or_else(|| {
        Error::Validation(format!(
            "histogram '{}' not found in the output (available: {})",
            opts.variable,
            output.variables.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })?;
    let samples = categorize_samples(histograms.keys().map(String::as_str));
    let (mc_processes, data_processes) = define_processes(&samples);
    if mc_processes.is_empty() {
        return Err(Error::Validation(format!("no flavour-split subsamples in '{}'", opts.variable)));
    }
    let mc_names: Vec<&str> = mc_processes.iter().map(|p| p.name.as_str()).collect();
    let systematics = define_systematics(&mc_names, &opts.shape_systematics);
    tracing::info!(light = samples.light.len(), c = samples.c.len(), b = samples.b.len(), data = samples.data_obs.len(), "grouped subsamples");

    let years: Vec<String> = if opts.years.is_empty() {
        output.datasets_metadata.by_datataking_period.keys().cloned().collect()
    } else {
        opts.years.clone()
    };
    let cuts = template_cuts(output);
    if cuts.is_empty() {
        return Err(Error::Validation("no template categories in the output cutflow".into()));
    }

    let mut report = DatacardReport::default();
    for year in &years {
        for ((group, cut), regions) in &cuts {
            let folder = opts.output_dir.join(year).join(group).join(cut);
            let layout = |pass: bool| CardLayout {
                category: region_name(group, cut, pass),
                years: vec![year.clone()],
                mc_processes: mc_processes.clone(),
                data_processes: data_processes.clone(),
                systematics: systematics.clone(),
                bin_prefix: None,
                bin_suffix: None,
                mcstat: opts.mcstat,
            };
            let attempt = || -> Result<()> {
                if regions.len() != 2 {
                    let missing = if regions.contains(&true) { "fail" } else { "pass" };
                    return Err(Error::Validation(format!("{missing} region missing")));
                }
                let pass = Datacard::new(histograms, &output.datasets_metadata, layout(true))?;
                let fail = Datacard::new(histograms, &output.datasets_metadata, layout(false))?;
                let ratios = passfail_ratio(&pass, &fail);
                DatacardMutag::new(fail, Some(ratios)).dump(&folder.join("fail"), CARD_NAME, SHAPES_NAME)?;
                DatacardMutag::new(pass, None).dump(&folder.join("pass"), CARD_NAME, SHAPES_NAME)?;
                let script = folder.join(COMBINE_SCRIPT);
                std::fs::write(&script, combine_script()).map_err(|e| Error::io_at(&script, e))?;
                Ok(())
            };
            match attempt() {
                Ok(()) => report.successful.push(CardRecord {
                    year: year.clone(),
                    category: group.clone(),
                    cut: cut.clone(),
                    folder,
                }),
                Err(e) => {
                    tracing::warn!(year = %year, category = %group, cut = %cut, error = %e, "datacard failed");
                    report.failed.push(CardFailure {
                        year: year.clone(),
                        category: format!("{group}/{cut}"),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    let input_sha256 = opts.input.as_deref().map(sha256_file).transpose()?;
    let manifest = Manifest {
        tool: "mutag",
        version: mt_core::VERSION,
        created: chrono::Utc::now().to_rfc3339(),
        input: opts.input.as_ref().map(|p| p.display().to_string()),
        input_sha256,
        variable: &opts.variable,
        years: &years,
        samples: &samples,
        report: &report,
    };
    std::fs::create_dir_all(&opts.output_dir).map_err(|e| Error::io_at(&opts.output_dir, e))?;
    let path = opts.output_dir.join("manifest.json");
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?).map_err(|e| Error::io_at(&path, e))?;
    report.log();
    Ok(report)
}
