//! Auxiliary derivations: reweighting maps, pT quantiles, prescales,
//! trigger discovery and the SF summary.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use mt_analysis::Output;
use mt_events::{TriggerPaths, TriggerTable, discover_triggers, load_datasets};
use mt_stat::reweighting::REWEIGHTING_MAPS;
use mt_stat::{SfType, prescales, quantiles, sf_summary};

use crate::write_json;

fn load_output(input: &Path) -> Result<Output> {
    Output::load(input).with_context(|| format!("failed to read {}", input.display()))
}

pub fn cmd_reweighting(input: &Path, output_dir: &Path, hists: Vec<String>, overwrite: bool) -> Result<()> {
    let output = load_output(input)?;
    let hists = if hists.is_empty() { REWEIGHTING_MAPS.iter().map(|s| s.to_string()).collect() } else { hists };
    let mut written = Vec::new();
    for hist in &hists {
        if !output.variables.contains_key(hist) {
            tracing::warn!(hist = %hist, "histogram not in the output; skipped");
            continue;
        }
        written.extend(mt_stat::compute_reweighting(&output, hist, output_dir, overwrite)?);
    }
    if written.is_empty() {
        bail!("no reweighting map written");
    }
    write_json(None, serde_json::json!(written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()))
}

pub fn cmd_pt_quantiles(
    input: &Path,
    output: &Path,
    hist: &str,
    sample: &str,
    category: &str,
    qs: &[f64],
) -> Result<()> {
    let out = load_output(input)?;
    let results = quantiles::quantiles_by_year(&out, hist, sample, category, qs)?;
    if results.is_empty() {
        bail!("no dataset of sample '{sample}' found in the output");
    }
    quantiles::write_quantiles(output, &results)?;
    let summary: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(year, q)| {
            let by_q: serde_json::Map<String, serde_json::Value> =
                q.iter().map(|(p, v)| (p.to_string(), serde_json::json!(v))).collect();
            (year.clone(), serde_json::Value::Object(by_q))
        })
        .collect();
    write_json(None, serde_json::Value::Object(summary))
}

fn collect_prescales(config: &Path, year: Option<&str>, group: Option<&str>) -> Result<Vec<prescales::PrescaleEntry>> {
    let sources = prescales::prescale_sources(config, year, group)
        .with_context(|| format!("failed to read prescale configuration {}", config.display()))?;
    let entries = prescales::collect_entries(&sources);
    if entries.is_empty() {
        bail!("no prescale data found");
    }
    Ok(entries)
}

pub fn cmd_prescales_analyze(config: &Path, output_dir: &Path, year: Option<&str>, group: Option<&str>) -> Result<()> {
    let entries = collect_prescales(config, year, group)?;
    let analysis = prescales::analyze(&entries)?;
    analysis.log();
    prescales::write_analysis(output_dir, &entries, &analysis)?;
    write_json(None, serde_json::to_value(&analysis.overall)?)
}

pub fn cmd_prescales_yaml(config: &Path, output: &Path) -> Result<()> {
    let entries = collect_prescales(config, None, None)?;
    let text = serde_yaml_ng::to_string(&prescales::prescale_yaml(&entries))?;
    std::fs::write(output, &text).with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), "wrote average prescales");
    Ok(())
}

pub fn cmd_triggers(datasets: &[PathBuf], years: &[String], select: &str, output: Option<&PathBuf>) -> Result<()> {
    let collections = datasets
        .iter()
        .map(|p| load_datasets(std::slice::from_ref(p)))
        .collect::<mt_core::Result<Vec<_>>>()?;
    let refs: Vec<_> = collections.iter().collect();
    let found = discover_triggers(&refs, years)?;
    let pick = |p: &TriggerPaths| -> Vec<String> {
        match select {
            "ak4" => p.ak4.iter().cloned().collect(),
            "ak8" => p.ak8.iter().cloned().collect(),
            _ => p.all(),
        }
    };
    let table = TriggerTable::from_paths(&found, pick);
    let text = serde_yaml_ng::to_string(&table)?;
    match output {
        Some(path) => std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

pub fn cmd_sf_summary(base: &Path, output_dir: &Path, sf: SfType, categories: &[String]) -> Result<()> {
    let summaries = sf_summary::collect_summaries(base, sf, categories)?;
    if summaries.is_empty() {
        bail!("no fit results with a central tau21 point under {}", base.display());
    }
    sf_summary::write_summaries(output_dir, sf, &summaries)?;
    write_json(None, serde_json::to_value(&summaries)?)
}
