//! Scale-factor summary over the τ21 working points.
//!
//! For every period and template group the central fit (τ21 < 0.30) gives
//! the scale factor; the spread over the other cuts gives the τ21
//! systematic, added in quadrature to the fit uncertainty.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use mt_core::{Error, Result};
use serde::Serialize;

use crate::fit_results::{FitRow, RESULTS_JSON};

/// τ21 cuts scanned by the calibration.
pub const TAU21_VALUES: [f64; 5] = [0.20, 0.25, 0.30, 0.35, 0.40];
/// Working point quoted as the central result.
pub const TAU21_CENTRAL: f64 = 0.30;

/// Which scale factor to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfType {
    /// b-tagging SF (`r`)
    B,
    /// c-mistag SF (`SF_c`)
    C,
}

impl SfType {
    /// Parameter of interest carrying this SF.
    pub fn poi(self) -> &'static str {
        match self {
            SfType::B => "r",
            SfType::C => "SF_c",
        }
    }
}

impl fmt::Display for SfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SfType::B => "b",
            SfType::C => "c",
        })
    }
}

impl FromStr for SfType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "b" => Ok(SfType::B),
            "c" => Ok(SfType::C),
            other => Err(Error::Validation(format!("unknown SF type '{other}' (expected b or c)"))),
        }
    }
}

/// Directory name of a τ21 cut (`0.30` → `tau21_0p30`).
pub fn tau21_dir(t: f64) -> String {
    format!("tau21_{t:.2}").replace('.', "p")
}

/// Legend label of a template group: `p_{T} = [lo, hi]` or `p_{T} \geq lo`.
/// Names without a `Pt-{lo}to{hi}` token are returned unchanged.
pub fn pt_label(category: &str) -> String {
    let parsed = category.match_indices("Pt-").find_map(|(i, _)| {
        let rest = &category[i + 3..];
        let lo_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (lo, rest) = rest.split_at(lo_len);
        let rest = rest.strip_prefix("to")?;
        if lo.is_empty() {
            return None;
        }
        if rest.starts_with("Inf") {
            return Some((lo, None));
        }
        let hi_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        (hi_len > 0).then(|| (lo, Some(&rest[..hi_len])))
    });
    match parsed {
        Some((lo, None)) => format!("p_{{T}} \\geq {lo}"),
        Some((lo, Some(hi))) => format!("p_{{T}} = [{lo}, {hi}]"),
        None => category.to_string(),
    }
}

/// SF of one group at one τ21 cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TauPoint {
    /// τ21 cut
    pub tau21: f64,
    /// Best fit
    pub value: f64,
    /// Upper fit error
    pub err_up: f64,
    /// Lower fit error
    pub err_down: f64,
}

/// Summary of one period and template group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SfSummary {
    /// Period
    pub year: String,
    /// Template group
    pub category: String,
    /// Legend label
    pub pt_label: String,
    /// SF at the central cut
    pub value: f64,
    /// Fit error, up
    pub fit_err_up: f64,
    /// Fit error, down
    pub fit_err_down: f64,
    /// τ21 systematic
    pub tau21_syst: f64,
    /// Combined error, up
    pub total_err_up: f64,
    /// Combined error, down
    pub total_err_down: f64,
    /// All scanned cuts
    #[serde(skip)]
    pub points: Vec<TauPoint>,
}

/// Largest deviation from the central point (0 with no other cut).
pub fn tau21_systematic(points: &[TauPoint]) -> Option<f64> {
    let central = points.iter().find(|p| (p.tau21 - TAU21_CENTRAL).abs() < 1e-9)?;
    Some(
        points
            .iter()
            .filter(|p| (p.tau21 - TAU21_CENTRAL).abs() >= 1e-9)
            .map(|p| (p.value - central.value).abs())
            .fold(0.0, f64::max),
    )
}

fn summarize(year: &str, category: &str, points: Vec<TauPoint>) -> Option<SfSummary> {
    let syst = tau21_systematic(&points)?;
    let c = points.iter().find(|p| (p.tau21 - TAU21_CENTRAL).abs() < 1e-9)?;
    Some(SfSummary {
        year: year.to_string(),
        category: category.to_string(),
        pt_label: pt_label(category),
        value: c.value,
        fit_err_up: c.err_up,
        fit_err_down: c.err_down,
        tau21_syst: syst,
        total_err_up: c.err_up.hypot(syst),
        total_err_down: c.err_down.hypot(syst),
        points,
    })
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let entry = entry.map_err(|e| Error::io_at(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Collect the fit results under `base/{year}/{category}/tau21_*` and
/// summarize them. A non-empty `allowed` restricts the template groups.
pub fn collect_summaries(base: &Path, sf: SfType, allowed: &[String]) -> Result<Vec<SfSummary>> {
    let mut out = Vec::new();
    for year in sorted_subdirs(base)? {
        let year_dir = base.join(&year);
        for category in sorted_subdirs(&year_dir)? {
            if !allowed.is_empty() && !allowed.contains(&category) {
                continue;
            }
            let mut points = Vec::new();
            for t in TAU21_VALUES {
                let file = year_dir.join(&category).join(tau21_dir(t)).join(RESULTS_JSON);
                if !file.exists() {
                    continue;
                }
                let row = FitRow::from_json_file(&file)?;
                let Some(v) = row.pois.get(sf.poi()) else {
                    tracing::warn!(file = %file.display(), poi = sf.poi(), "POI missing from fit results");
                    continue;
                };
                points.push(TauPoint { tau21: t, value: v.value, err_up: v.err_up, err_down: v.err_down });
            }
            if points.is_empty() {
                continue;
            }
            match summarize(&year, &category, points) {
                Some(s) => out.push(s),
                None => tracing::warn!(year = %year, category = %category, "no central tau21 fit; skipped"),
            }
        }
    }
    Ok(out)
}

/// Write `{out}/{year}/SF{type}_tau21_sys.json` (group → systematic) and the
/// per-point and per-group CSV tables.
pub fn write_summaries(out_dir: &Path, sf: SfType, summaries: &[SfSummary]) -> Result<()> {
    let mut by_year: BTreeMap<&str, Vec<&SfSummary>> = BTreeMap::new();
    for s in summaries {
        by_year.entry(&s.year).or_default().push(s);
    }
    for (year, list) in by_year {
        let dir = out_dir.join(year);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;

        let syst: BTreeMap<&str, f64> = list.iter().map(|s| (s.category.as_str(), s.tau21_syst)).collect();
        let path = dir.join(format!("SF{sf}_tau21_sys.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&syst)?).map_err(|e| Error::io_at(&path, e))?;

        let path = dir.join(format!("SF{sf}_summary.csv"));
        let mut w = csv::Writer::from_path(&path)?;
        for s in &list {
            w.serialize(s)?;
        }
        w.flush().map_err(|e| Error::io_at(&path, e))?;

        let path = dir.join(format!("SF{sf}_vs_tau21.csv"));
        let mut w = csv::Writer::from_path(&path)?;
        w.write_record(["category", "tau21", "value", "err_up", "err_down"])?;
        for s in &list {
            for p in &s.points {
                w.write_record([
                    s.category.clone(),
                    format!("{:.2}", p.tau21),
                    p.value.to_string(),
                    p.err_up.to_string(),
                    p.err_down.to_string(),
                ])?;
            }
        }
        w.flush().map_err(|e| Error::io_at(&path, e))?;
        tracing::info!(year, groups = list.len(), "wrote SF summary");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn labels_and_dirs() {
        assert_eq!(tau21_dir(0.3), "tau21_0p30");
        assert_eq!(tau21_dir(0.25), "tau21_0p25");
        assert_eq!(pt_label("msd-80to170_Pt-350to425_particleNet_XbbVsQCD-HHbbtt"), "p_{T} = [350, 425]");
        assert_eq!(pt_label("msd-80to170_Pt-425toInf_particleNet"), "p_{T} \\geq 425");
        assert_eq!(pt_label("inclusive"), "inclusive");
        assert_eq!("c".parse::<SfType>().unwrap(), SfType::C);
        assert!("x".parse::<SfType>().is_err());
    }

    #[test]
    fn systematic_is_largest_deviation() {
        let p = |t, v| TauPoint { tau21: t, value: v, err_up: 0.1, err_down: 0.2 };
        let points = vec![p(0.20, 0.9), p(0.30, 1.0), p(0.40, 1.15)];
        assert_relative_eq!(tau21_systematic(&points).unwrap(), 0.15, epsilon = 1e-12);
        assert_eq!(tau21_systematic(&[p(0.20, 0.9)]), None);
        assert_eq!(tau21_systematic(&[p(0.30, 0.9)]), Some(0.0));

        let s = summarize("2018", "msd-80to170_Pt-300to350_x", points).unwrap();
        assert_relative_eq!(s.total_err_up, (0.01f64 + 0.0225).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(s.total_err_down, (0.04f64 + 0.0225).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn collects_from_fit_tree() {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let base = std::env::temp_dir().join(format!("mutag_sfsum_{}_{}", std::process::id(), nanos));
        let cat = "msd-80to170_Pt-350to425_particleNet_XbbVsQCD-HHbbtt";
        for (t, r) in [(0.25, 0.97), (0.30, 1.02), (0.35, 1.06)] {
            let dir = base.join("2018").join(cat).join(tau21_dir(t));
            std::fs::create_dir_all(&dir).unwrap();
            let json = serde_json::json!({
                "year": "2018", "category": cat, "cut": tau21_dir(t),
                "r": r, "r_errUp": 0.05, "r_errDown": 0.04,
            });
            std::fs::write(dir.join(RESULTS_JSON), json.to_string()).unwrap();
        }
        std::fs::create_dir_all(base.join("2018").join("other_group")).unwrap();

        let all = collect_summaries(&base, SfType::B, &[]).unwrap();
        assert_eq!(all.len(), 1);
        assert_relative_eq!(all[0].value, 1.02);
        assert_relative_eq!(all[0].tau21_syst, 0.05, epsilon = 1e-12);
        assert!(collect_summaries(&base, SfType::C, &[]).unwrap().is_empty());
        let only = [String::from("other_group")];
        assert!(collect_summaries(&base, SfType::B, &only).unwrap().is_empty());

        let out = base.join("summary");
        write_summaries(&out, SfType::B, &all).unwrap();
        let sys: BTreeMap<String, f64> =
            serde_json::from_str(&std::fs::read_to_string(out.join("2018").join("SFb_tau21_sys.json")).unwrap()).unwrap();
        assert_relative_eq!(sys[cat], 0.05, epsilon = 1e-12);
        let table = std::fs::read_to_string(out.join("2018").join("SFb_vs_tau21.csv")).unwrap();
        assert_eq!(table.lines().count(), 4);
        let _ = std::fs::remove_dir_all(&base);
    }
}
