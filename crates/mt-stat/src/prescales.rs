//! Trigger prescale tables: parsing of `prescaleWeight` corrections,
//! per-path/per-run statistics and the averaged prescale YAML.
//!
//! The prescale configuration lists the correction files as
//! `HLT_triggers_prescales: {year: {group: {trigger: file}}}`. A file
//! referenced more than once is read only the first time.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use mt_analysis::config::CONFIG_DIR_PLACEHOLDER;
use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correction holding the per-run prescale weights.
pub const PRESCALE_CORRECTION: &str = "prescaleWeight";
/// Weight given to open-ended lumi ranges in the averages.
pub const OPEN_RANGE_WEIGHT: f64 = 1000.0;

/// Output file names of [`write_analysis`].
pub const RAW_CSV: &str = "prescale_raw_data.csv";
/// Per HLT path statistics.
pub const BY_PATH_CSV: &str = "averages_by_hlt_path.csv";
/// Per run statistics.
pub const BY_RUN_CSV: &str = "averages_by_run.csv";
/// Per run and HLT path statistics.
pub const BY_RUN_PATH_CSV: &str = "averages_by_run_and_path.csv";
/// Overall statistics.
pub const OVERALL_JSON: &str = "overall_statistics.json";

/// One prescale value valid for a lumi-section range of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrescaleEntry {
    /// Run number
    pub run: i64,
    /// HLT path
    pub hlt_path: String,
    /// First lumi section
    pub lumi_start: f64,
    /// Upper edge of the range (infinite when open-ended)
    pub lumi_end: f64,
    /// Prescale
    pub weight: f64,
    /// `lumi_end - lumi_start`
    pub lumi_range_size: f64,
    /// Data-taking period
    pub year: String,
    /// Trigger group in the configuration
    pub trigger_group: String,
    /// Trigger name in the configuration
    pub trigger_name: String,
    /// Source file name
    pub json_file: String,
}

#[derive(Debug, Default, Deserialize)]
struct PrescaleConfig {
    #[serde(rename = "HLT_triggers_prescales", default)]
    prescales: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// A prescale file referenced by the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescaleSource {
    /// Period
    pub year: String,
    /// Trigger group
    pub trigger_group: String,
    /// Trigger name
    pub trigger_name: String,
    /// Resolved file path
    pub path: PathBuf,
}

/// Read the prescale configuration, keeping the sources of `year` and
/// `group` when given. Placeholders are resolved against the config
/// directory and missing files are skipped with a warning.
pub fn prescale_sources(config: &Path, year: Option<&str>, group: Option<&str>) -> Result<Vec<PrescaleSource>> {
    let text = std::fs::read_to_string(config).map_err(|e| Error::io_at(config, e))?;
    let dir = config.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let text = text.replace(CONFIG_DIR_PLACEHOLDER, &dir.to_string_lossy());
    let cfg: PrescaleConfig = if config.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text)?
    } else {
        serde_yaml_ng::from_str(&text)?
    };
    if cfg.prescales.is_empty() {
        return Err(Error::Config(format!("{}: no HLT_triggers_prescales section", config.display())));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (y, groups) in &cfg.prescales {
        if year.is_some_and(|want| want != y) {
            continue;
        }
        for (g, triggers) in groups {
            if group.is_some_and(|want| want != g) {
                continue;
            }
            for (t, file) in triggers {
                let path = PathBuf::from(file);
                if !path.exists() {
                    tracing::warn!(path = %path.display(), trigger = %t, "prescale file not found");
                    continue;
                }
                if !seen.insert(path.clone()) {
                    tracing::debug!(path = %path.display(), "prescale file already read");
                    continue;
                }
                out.push(PrescaleSource {
                    year: y.clone(),
                    trigger_group: g.clone(),
                    trigger_name: t.clone(),
                    path,
                });
            }
        }
    }
    Ok(out)
}

fn as_run(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str()?.parse().ok())
}

/// Entries of the `prescaleWeight` correction of a correctionlib document.
/// The metadata fields are left empty.
pub fn parse_prescale_doc(doc: &Value) -> Result<Vec<PrescaleEntry>> {
    let bad = |what: &str| Error::Input(format!("malformed prescale correction: {what}"));
    let mut out = Vec::new();
    let corrections = doc.get("corrections").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    for corr in corrections.iter().filter(|c| c.get("name").and_then(Value::as_str) == Some(PRESCALE_CORRECTION)) {
        let runs = corr.pointer("/data/content").and_then(Value::as_array).ok_or_else(|| bad("no run content"))?;
        for run_entry in runs {
            let run = run_entry.get("key").and_then(as_run).ok_or_else(|| bad("run key"))?;
            let paths =
                run_entry.pointer("/value/content").and_then(Value::as_array).ok_or_else(|| bad("no path content"))?;
            for path_entry in paths {
                let hlt_path = path_entry.get("key").and_then(Value::as_str).ok_or_else(|| bad("path key"))?;
                let value = path_entry.get("value").ok_or_else(|| bad("path value"))?;
                let mut push = |lumi_start: f64, lumi_end: f64, weight: f64| {
                    out.push(PrescaleEntry {
                        run,
                        hlt_path: hlt_path.to_string(),
                        lumi_start,
                        lumi_end,
                        weight,
                        lumi_range_size: lumi_end - lumi_start,
                        year: String::new(),
                        trigger_group: String::new(),
                        trigger_name: String::new(),
                        json_file: String::new(),
                    })
                };
                if let Some(w) = value.as_f64() {
                    push(1.0, f64::INFINITY, w);
                } else if value.get("nodetype").and_then(Value::as_str) == Some("binning") {
                    let edges: Vec<f64> = value
                        .get("edges")
                        .and_then(Value::as_array)
                        .ok_or_else(|| bad("binning edges"))?
                        .iter()
                        .map(|e| e.as_f64().ok_or_else(|| bad("binning edge")))
                        .collect::<Result<_>>()?;
                    let content = value.get("content").and_then(Value::as_array).ok_or_else(|| bad("binning content"))?;
                    for (i, w) in content.iter().enumerate() {
                        let w = w.as_f64().ok_or_else(|| bad("binned weight"))?;
                        let start = edges.get(i).copied().ok_or_else(|| bad("fewer edges than weights"))?;
                        push(start, edges.get(i + 1).copied().unwrap_or(f64::INFINITY), w);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Read and parse every source, attaching its metadata. Unreadable files are
/// logged and skipped.
pub fn collect_entries(sources: &[PrescaleSource]) -> Vec<PrescaleEntry> {
    let mut all = Vec::new();
    for src in sources {
        let parsed = std::fs::read_to_string(&src.path)
            .map_err(|e| Error::io_at(&src.path, e))
            .and_then(|t| Ok(serde_json::from_str::<Value>(&t)?))
            .and_then(|doc| parse_prescale_doc(&doc));
        let entries = match parsed {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(path = %src.path.display(), error = %e, "failed to read prescale file");
                continue;
            }
        };
        let file = src.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        tracing::info!(file = %file, trigger = %src.trigger_name, entries = entries.len(), "read prescale file");
        all.extend(entries.into_iter().map(|mut e| {
            e.year = src.year.clone();
            e.trigger_group = src.trigger_group.clone();
            e.trigger_name = src.trigger_name.clone();
            e.json_file = file.clone();
            e
        }));
    }
    all
}

/// Mean, sample standard deviation (undefined for one value) and count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    /// Mean
    pub mean: f64,
    /// Sample standard deviation
    pub std: Option<f64>,
    /// Number of values
    pub count: usize,
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let k = 10f64.powi(decimals);
    (x * k).round() / k
}

fn mean_std(values: &[f64]) -> (f64, Option<f64>) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.len() > 1)
        .then(|| (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt());
    (mean, std)
}

impl Stats {
    fn of(values: &[f64]) -> Self {
        let (mean, std) = mean_std(values);
        Self { mean: round_to(mean, 4), std: std.map(|s| round_to(s, 4)), count: values.len() }
    }
}

fn grouped<K: Ord>(entries: &[PrescaleEntry], key: impl Fn(&PrescaleEntry) -> K) -> BTreeMap<K, Stats> {
    let mut groups: BTreeMap<K, Vec<f64>> = BTreeMap::new();
    for e in entries {
        groups.entry(key(e)).or_default().push(e.weight);
    }
    groups.into_iter().map(|(k, v)| (k, Stats::of(&v))).collect()
}

/// Statistics over all entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallStats {
    /// Number of entries
    pub total_entries: usize,
    /// Distinct runs
    pub unique_runs: usize,
    /// Distinct HLT paths
    pub unique_hlt_paths: usize,
    /// Mean prescale
    pub overall_mean: f64,
    /// Sample standard deviation
    pub overall_std: Option<f64>,
    /// Smallest prescale
    pub min_weight: f64,
    /// Largest prescale
    pub max_weight: f64,
    /// Fraction of zero prescales
    pub zero_weight_fraction: f64,
}

/// Grouped statistics of a set of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescaleAnalysis {
    /// By HLT path
    pub by_hlt_path: BTreeMap<String, Stats>,
    /// By run
    pub by_run: BTreeMap<i64, Stats>,
    /// By run and HLT path
    pub by_run_and_path: BTreeMap<(i64, String), Stats>,
    /// Overall
    pub overall: OverallStats,
}

/// Group the entries by path, run and run+path.
pub fn analyze(entries: &[PrescaleEntry]) -> Result<PrescaleAnalysis> {
    if entries.is_empty() {
        return Err(Error::Input("no prescale entries found".into()));
    }
    let weights: Vec<f64> = entries.iter().map(|e| e.weight).collect();
    let (overall_mean, overall_std) = mean_std(&weights);
    let overall = OverallStats {
        total_entries: entries.len(),
        unique_runs: entries.iter().map(|e| e.run).collect::<BTreeSet<_>>().len(),
        unique_hlt_paths: entries.iter().map(|e| e.hlt_path.as_str()).collect::<BTreeSet<_>>().len(),
        overall_mean,
        overall_std,
        min_weight: weights.iter().copied().fold(f64::INFINITY, f64::min),
        max_weight: weights.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        zero_weight_fraction: weights.iter().filter(|w| **w == 0.0).count() as f64 / weights.len() as f64,
    };
    Ok(PrescaleAnalysis {
        by_hlt_path: grouped(entries, |e| e.hlt_path.clone()),
        by_run: grouped(entries, |e| e.run),
        by_run_and_path: grouped(entries, |e| (e.run, e.hlt_path.clone())),
        overall,
    })
}

impl PrescaleAnalysis {
    /// Log the summary: overall numbers, per-path means, the ten runs with
    /// the largest mean and the runs whose mean is zero.
    pub fn log(&self) {
        let o = &self.overall;
        tracing::info!(
            entries = o.total_entries,
            runs = o.unique_runs,
            paths = o.unique_hlt_paths,
            mean = o.overall_mean,
            min = o.min_weight,
            max = o.max_weight,
            zero_fraction = o.zero_weight_fraction,
            "prescale summary"
        );
        for (path, s) in &self.by_hlt_path {
            tracing::info!(path = %path, mean = s.mean, std = ?s.std, count = s.count, "prescale by path");
        }
        let mut runs: Vec<_> = self.by_run.iter().collect();
        runs.sort_by(|a, b| b.1.mean.total_cmp(&a.1.mean));
        for (run, s) in runs.iter().take(10) {
            tracing::info!(run = **run, mean = s.mean, count = s.count, "highest average prescale");
        }
        for (run, s) in self.by_run.iter().filter(|(_, s)| s.mean == 0.0) {
            tracing::warn!(run = *run, count = s.count, "run with zero average prescale");
        }
    }
}

fn opt(x: Option<f64>) -> String {
    x.map(|v| v.to_string()).unwrap_or_default()
}

/// Write the raw entries, the grouped statistics and the overall numbers
/// into `dir`.
pub fn write_analysis(dir: &Path, entries: &[PrescaleEntry], analysis: &PrescaleAnalysis) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io_at(dir, e))?;

    let path = dir.join(RAW_CSV);
    let mut w = csv::Writer::from_path(&path)?;
    for e in entries {
        w.serialize(e)?;
    }
    w.flush().map_err(|e| Error::io_at(&path, e))?;

    let path = dir.join(BY_PATH_CSV);
    let mut w = csv::Writer::from_path(&path)?;
    w.write_record(["hlt_path", "mean", "std", "count"])?;
    for (p, s) in &analysis.by_hlt_path {
        w.write_record([p.clone(), s.mean.to_string(), opt(s.std), s.count.to_string()])?;
    }
    w.flush().map_err(|e| Error::io_at(&path, e))?;

    let path = dir.join(BY_RUN_CSV);
    let mut w = csv::Writer::from_path(&path)?;
    w.write_record(["run", "mean", "std", "count"])?;
    for (r, s) in &analysis.by_run {
        w.write_record([r.to_string(), s.mean.to_string(), opt(s.std), s.count.to_string()])?;
    }
    w.flush().map_err(|e| Error::io_at(&path, e))?;

    let path = dir.join(BY_RUN_PATH_CSV);
    let mut w = csv::Writer::from_path(&path)?;
    w.write_record(["run", "hlt_path", "mean", "std", "count"])?;
    for ((r, p), s) in &analysis.by_run_and_path {
        w.write_record([r.to_string(), p.clone(), s.mean.to_string(), opt(s.std), s.count.to_string()])?;
    }
    w.flush().map_err(|e| Error::io_at(&path, e))?;

    let path = dir.join(OVERALL_JSON);
    std::fs::write(&path, serde_json::to_string_pretty(&analysis.overall)?).map_err(|e| Error::io_at(&path, e))?;
    tracing::info!(dir = %dir.display(), "wrote prescale analysis");
    Ok(())
}

/// Prescale averaged over lumi ranges, each weighted by its length
/// ([`OPEN_RANGE_WEIGHT`] when open-ended). Zero for no entries.
pub fn weighted_average<'a>(entries: impl IntoIterator<Item = &'a PrescaleEntry>) -> f64 {
    let (mut sum, mut norm) = (0.0, 0.0);
    for e in entries {
        let size = if e.lumi_range_size.is_finite() { e.lumi_range_size } else { OPEN_RANGE_WEIGHT };
        sum += e.weight * size;
        norm += size;
    }
    if norm == 0.0 { 0.0 } else { sum / norm }
}

fn yaml_number(x: f64) -> serde_yaml_ng::Value {
    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        serde_yaml_ng::Value::from(x as i64)
    } else {
        serde_yaml_ng::Value::from(round_to(x, 3))
    }
}

/// `HLT_triggers_prescales: {year: {group: {path: average}}}` with whole
/// averages written as integers.
pub fn prescale_yaml(entries: &[PrescaleEntry]) -> serde_yaml_ng::Value {
    use serde_yaml_ng::{Mapping, Value as Y};

    let mut grouped: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, Vec<&PrescaleEntry>>>> = BTreeMap::new();
    for e in entries {
        grouped
            .entry(&e.year)
            .or_default()
            .entry(&e.trigger_group)
            .or_default()
            .entry(&e.hlt_path)
            .or_default()
            .push(e);
    }
    let mut years = Mapping::new();
    for (year, groups) in grouped {
        let mut gm = Mapping::new();
        for (group, paths) in groups {
            let mut pm = Mapping::new();
            for (path, list) in paths {
                let avg = weighted_average(list.iter().copied());
                tracing::info!(year, group, path, average = avg, entries = list.len(), "average prescale");
                pm.insert(Y::from(path), yaml_number(avg));
            }
            gm.insert(Y::from(group), Y::Mapping(pm));
        }
        years.insert(Y::from(year), Y::Mapping(gm));
    }
    let mut root = Mapping::new();
    root.insert(Y::from("HLT_triggers_prescales"), Y::Mapping(years));
    Y::Mapping(root)
}
