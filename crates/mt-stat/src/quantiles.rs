//! Quantiles of the leading-jet pT spectrum in data.

use std::collections::BTreeMap;
use std::path::Path;

use mt_analysis::{Hist, Output};
use mt_core::{Error, Result};
use serde_yaml_ng::{Mapping, Value};

/// Histogram read by default.
pub const DEFAULT_HIST: &str = "FatJetGood_pt";
/// Data sample read by default.
pub const DEFAULT_SAMPLE: &str = "DATA_BTagMu";
/// Category read by default.
pub const DEFAULT_CATEGORY: &str = "inclusive";
/// Quantiles computed by default.
pub const DEFAULT_QUANTILES: [f64; 3] = [0.34, 0.67, 1.0];

/// Linear interpolation of `x` on the increasing grid `xp`, clamped to the
/// end values outside the grid.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let j = xp.iter().rposition(|&v| v <= x).unwrap_or(0);
    let (x0, x1) = (xp[j], xp[j + 1]);
    fp[j] + (fp[j + 1] - fp[j]) * (x - x0) / (x1 - x0)
}

/// Quantiles of the first axis of `hist` in `category` (nominal), read off
/// the cumulative distribution interpolated at the bin centers.
pub fn pt_quantiles(hist: &Hist, category: &str, quantiles: &[f64]) -> Result<Vec<(f64, f64)>> {
    let axis = hist.axes.first().ok_or_else(|| Error::Validation("histogram has no axis".into()))?;
    let values = hist
        .project(category, "nominal", 0)
        .ok_or_else(|| Error::Validation(format!("no nominal entries in category '{category}'")))?;
    let cdf: Vec<f64> = values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect();
    let total = cdf.last().copied().unwrap_or(0.0);
    if total == 0.0 {
        return Err(Error::Computation(format!("empty histogram for category '{category}'")));
    }
    let cdf: Vec<f64> = cdf.iter().map(|c| c / total).collect();
    let centers = axis.binning.centers();

    quantiles
        .iter()
        .map(|&q| {
            if !(0.0..=1.0).contains(&q) {
                return Err(Error::Validation(format!("quantile {q} must be between 0 and 1")));
            }
            Ok((q, interp(q, &cdf, &centers)))
        })
        .collect()
}

/// Per-period quantiles of `hist_name` summed over the datasets of `sample`.
pub fn quantiles_by_year(
    output: &Output,
    hist_name: &str,
    sample: &str,
    category: &str,
    quantiles: &[f64],
) -> Result<BTreeMap<String, Vec<(f64, f64)>>> {
    let by_ds = output
        .variables
        .get(hist_name)
        .and_then(|h| h.get(sample))
        .ok_or_else(|| Error::Validation(format!("no '{hist_name}' histograms for sample '{sample}'")))?;
    let mut out = BTreeMap::new();
    for year in output.datasets_metadata.by_datataking_period.keys() {
        let mut total: Option<Hist> = None;
        for ds in output.datasets_of(year, sample) {
            let Some(h) = by_ds.get(ds) else { continue };
            match total.as_mut() {
                Some(t) => t.merge(h)?,
                None => total = Some(h.clone()),
            }
        }
        let Some(total) = total else { continue };
        let q = pt_quantiles(&total, category, quantiles)?;
        for (p, v) in &q {
            tracing::info!(year = %year, quantile = *p, pt = *v, "pT quantile");
        }
        out.insert(year.clone(), q);
    }
    Ok(out)
}

/// `year → {quantile: pT}` YAML document.
pub fn quantiles_yaml(results: &BTreeMap<String, Vec<(f64, f64)>>) -> Value {
    let mut root = Mapping::new();
    for (year, q) in results {
        let mut m = Mapping::new();
        for (p, v) in q {
            m.insert(Value::from(*p), Value::from(*v));
        }
        root.insert(Value::from(year.clone()), Value::Mapping(m));
    }
    Value::Mapping(root)
}

/// Write [`quantiles_yaml`] to `path`.
pub fn write_quantiles(path: &Path, results: &BTreeMap<String, Vec<(f64, f64)>>) -> Result<()> {
    let text = serde_yaml_ng::to_string(&quantiles_yaml(results))?;
    std::fs::write(path, text).map_err(|e| Error::io_at(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mt_analysis::{Binning, HistAxis};

    fn pt_hist(fills: &[(f64, f64)]) -> Hist {
        let mut h = Hist::new(vec![HistAxis {
            name: "pt".into(),
            label: "pt".into(),
            binning: Binning::Regular { bins: 4, start: 300.0, stop: 700.0 },
        }]);
        for (x, w) in fills {
            h.fill("inclusive", "nominal", &[*x], *w).unwrap();
        }
        h
    }

    #[test]
    fn interpolates_on_cdf() {
        // centers 350, 450, 550, 650; cdf 0.25, 0.5, 0.75, 1
        let h = pt_hist(&[(350.0, 1.0), (450.0, 1.0), (550.0, 1.0), (650.0, 1.0)]);
        let q = pt_quantiles(&h, "inclusive", &[0.1, 0.5, 0.625, 1.0]).unwrap();
        assert_relative_eq!(q[0].1, 350.0);
        assert_relative_eq!(q[1].1, 450.0);
        assert_relative_eq!(q[2].1, 500.0);
        assert_relative_eq!(q[3].1, 650.0);
    }

    #[test]
    fn rejects_bad_input() {
        let h = pt_hist(&[(350.0, 1.0)]);
        assert!(pt_quantiles(&h, "inclusive", &[1.5]).is_err());
        assert!(pt_quantiles(&h, "missing", &[0.5]).is_err());
        // only overflow entries
        let empty = pt_hist(&[(900.0, 1.0)]);
        assert!(pt_quantiles(&empty, "inclusive", &[0.5]).is_err());
    }

    #[test]
    fn sums_datasets_per_year() {
        let mut out = Output::new();
        for (ds, year) in [("DATA_2022C", "2022_preEE"), ("DATA_2022D", "2022_preEE"), ("DATA_2023D", "2023_postBPix")] {
            let md = serde_json::from_value(serde_json::json!({"sample": DEFAULT_SAMPLE, "year": year, "isMC": false}))
                .unwrap();
            out.add_dataset(ds, &md);
        }
        let by_ds = out.variables.entry(DEFAULT_HIST.into()).or_default().entry(DEFAULT_SAMPLE.into()).or_default();
        by_ds.insert("DATA_2022C".into(), pt_hist(&[(350.0, 1.0)]));
        by_ds.insert("DATA_2022D".into(), pt_hist(&[(650.0, 1.0)]));
        by_ds.insert("DATA_2023D".into(), pt_hist(&[(450.0, 2.0)]));

        let res = quantiles_by_year(&out, DEFAULT_HIST, DEFAULT_SAMPLE, DEFAULT_CATEGORY, &[0.5, 1.0]).unwrap();
        assert_eq!(res.len(), 2);
        assert_relative_eq!(res["2022_preEE"][0].1, 350.0);
        assert_relative_eq!(res["2022_preEE"][1].1, 650.0);
        // a single filled bin: cdf 0, 1, 1, 1
        assert_relative_eq!(res["2023_postBPix"][0].1, 400.0);
        assert_relative_eq!(res["2023_postBPix"][1].1, 650.0);

        let yaml = serde_yaml_ng::to_string(&quantiles_yaml(&res)).unwrap();
        assert!(yaml.contains("2023_postBPix:\n  0.5: 400.0\n  1.0: 650.0"), "{yaml}");
    }
}
