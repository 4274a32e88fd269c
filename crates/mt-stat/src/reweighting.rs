//! Derivation of the (pt, eta[, τ21]) data/MC reweighting maps.
//!
//! Per period the map is `(data − (V+jets + top)) / QCD` in every category
//! and MC shape variation, stored with its statistical variations as a
//! correction `{hist}_corr_{year}` keyed by `cat`, `shape_variation` and
//! `variation` (`nominal`, `statUp`, `statDown`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use mt_analysis::{Hist, Output};
use mt_core::{Error, Result};
use mt_correction::schema::CorrectionSetDoc;
use mt_correction::{DenseMap, from_histogram};

pub use mt_analysis::workflow::pt_reweighting::REWEIGHTING_MAPS;

/// QCD subsamples contain this.
pub const QCD_SAMPLE: &str = "QCD_MuEnriched";
/// Subsamples subtracted from data.
pub const SUBTRACTED_SAMPLES: [&str; 3] = ["VJets", "SingleTop", "TTto4Q"];

const DESCRIPTION: &str = "Reweighting SF matching the leading fatjet pT and eta MC distribution to data.";
const SET_DESCRIPTION: &str = "MC to data reweighting SF";

/// Ratio and its statistical uncertainty per cell.
///
/// `unc = sqrt(σ²_num/den² + num²/den⁴·σ²_den)` with `num = data − diff`,
/// `σ²_num = σ²_data + σ²_diff`; a non-finite ratio becomes 1 and a
/// non-finite uncertainty 0. This includes `±inf` from an empty QCD cell,
/// so such cells are left unweighted rather than saturated.
pub fn data_mc_ratio(
    data: (&[f64], &[f64]),
    qcd: (&[f64], &[f64]),
    diff: (&[f64], &[f64]),
) -> (Vec<f64>, Vec<f64>) {
    let n = qcd.0.len();
    let mut ratio = Vec::with_capacity(n);
    let mut unc = Vec::with_capacity(n);
    for i in 0..n {
        let num = data.0[i] - diff.0[i];
        let den = qcd.0[i];
        let var_num = data.1[i] + diff.1[i];
        let var_den = qcd.1[i];
        let r = num / den;
        let u = (var_num / den.powi(2) + num.powi(2) / den.powi(4) * var_den).sqrt();
        ratio.push(if r.is_finite() { r } else { 1.0 });
        unc.push(if u.is_finite() { u } else { 0.0 });
    }
    (ratio, unc)
}

/// Sum of the histograms of the subsamples selected by `keep`, over the
/// datasets of `year`.
fn sum_hists(output: &Output, hist_name: &str, year: &str, keep: impl Fn(&str) -> bool) -> Result<Option<Hist>> {
    let Some(by_sub) = output.variables.get(hist_name) else { return Ok(None) };
    let mut total: Option<Hist> = None;
    for (sub, by_ds) in by_sub {
        if !keep(sub) {
            continue;
        }
        for (ds, h) in by_ds {
            let in_year = output.datasets_metadata.by_dataset.get(ds).is_some_and(|m| m.year == year);
            if !in_year {
                continue;
            }
            match total.as_mut() {
                Some(t) => t.merge(h)?,
                None => total = Some(h.clone()),
            }
        }
    }
    Ok(total)
}

fn is_data(sub: &str) -> bool {
    sub.contains("DATA")
}

/// The reweighting map of one histogram and period, or `None` when QCD or
/// data is missing for the period.
pub fn reweighting_map(output: &Output, hist_name: &str, year: &str) -> Result<Option<DenseMap>> {
    let qcd = sum_hists(output, hist_name, year, |s| !is_data(s) && s.contains(QCD_SAMPLE))?;
    let data = sum_hists(output, hist_name, year, is_data)?;
    let (Some(qcd), Some(data)) = (qcd, data) else {
        tracing::warn!(hist = %hist_name, year = %year, "missing QCD or data; no reweighting map");
        return Ok(None);
    };
    let diff = sum_hists(output, hist_name, year, |s| {
        !is_data(s) && SUBTRACTED_SAMPLES.iter().any(|p| s.contains(p))
    })?
    .unwrap_or_else(|| Hist::new(qcd.axes.clone()));
    if data.axes != qcd.axes || diff.axes != qcd.axes {
        return Err(Error::Validation(format!("'{hist_name}': data and simulation axes differ")));
    }

    let categories: Vec<String> = qcd.categories().map(str::to_string).collect();
    if categories.is_empty() {
        return Err(Error::Validation(format!("'{hist_name}' has no filled category in {year}")));
    }
    let shape_variations: Vec<String> = categories
        .iter()
        .flat_map(|c| qcd.variations(c))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let stat = ["nominal", "statUp", "statDown"];

    let mut values = Vec::new();
    for cat in &categories {
        let (d, d2) = data.inner(cat, "nominal");
        for var in &shape_variations {
            let (q, q2) = qcd.inner(cat, var);
            let (x, x2) = diff.inner(cat, var);
            let (ratio, unc) = data_mc_ratio((&d, &d2), (&q, &q2), (&x, &x2));
            values.extend_from_slice(&ratio);
            values.extend(ratio.iter().zip(&unc).map(|(r, u)| r + u));
            values.extend(ratio.iter().zip(&unc).map(|(r, u)| r - u));
        }
    }

    Ok(Some(DenseMap {
        name: format!("{hist_name}_corr_{year}"),
        description: Some(DESCRIPTION.into()),
        output: "out".into(),
        categories: vec![
            ("cat".into(), categories),
            ("shape_variation".into(), shape_variations),
            ("variation".into(), stat.iter().map(|s| s.to_string()).collect()),
        ],
        dense: qcd.axes.iter().map(|a| (a.name.clone(), a.binning.edges())).collect(),
        values,
    }))
}

/// Write `{hist}_{year}_reweighting.json` for every period of the output.
/// Existing files are refused unless `overwrite` is set.
pub fn compute_reweighting(output: &Output, hist_name: &str, out_dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    if !output.variables.contains_key(hist_name) {
        return Err(Error::Validation(format!("histogram '{hist_name}' not found in the output")));
    }
    std::fs::create_dir_all(out_dir).map_err(|e| Error::io_at(out_dir, e))?;
    let mut written = Vec::new();
    for year in output.datasets_metadata.by_datataking_period.keys() {
        let path = out_dir.join(format!("{hist_name}_{year}_reweighting.json"));
        if path.exists() && !overwrite {
            return Err(Error::Validation(format!(
                "output file {} already exists; pass the overwrite flag to replace it",
                path.display()
            )));
        }
        let Some(map) = reweighting_map(output, hist_name, year)? else { continue };
        let doc = CorrectionSetDoc::new(SET_DESCRIPTION, vec![from_histogram(&map)?]);
        std::fs::write(&path, serde_json::to_string(&doc)?).map_err(|e| Error::io_at(&path, e))?;
        tracing::info!(path = %path.display(), correction = %map.name, "saved reweighting map");
        written.push(path);
    }
    Ok(written)
}
