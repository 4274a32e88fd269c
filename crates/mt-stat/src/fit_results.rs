//! Parameters of interest extracted from combine logs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mt_core::{Error, Result};
use serde_json::{Map, Value};

/// Parameters of interest of the calibration fit.
pub const POIS: [&str; 3] = ["r", "SF_c", "SF_light"];

/// Per-directory results file names.
pub const RESULTS_JSON: &str = "fitResults.json";
/// CSV twin of [`RESULTS_JSON`].
pub const RESULTS_CSV: &str = "fitResults.csv";

/// Best-fit value with asymmetric errors (both positive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoiValue {
    /// Best fit
    pub value: f64,
    /// Upper error
    pub err_up: f64,
    /// Lower error, absolute
    pub err_down: f64,
}

fn parse_value_and_errors(rest: &str) -> Option<PoiValue> {
    let mut tokens = rest.split_whitespace();
    let value: f64 = tokens.next()?.parse().ok()?;
    let (lo, hi) = tokens.next()?.split_once('/')?;
    let lo: f64 = lo.parse().ok()?;
    let hi: f64 = hi.parse().ok()?;
    Some(PoiValue { value, err_up: hi, err_down: lo.abs() })
}

/// Read `name : +v -lo/+hi (68%)` and `Best fit name: v -lo/+hi` lines.
/// Later lines override earlier ones.
pub fn parse_poi_lines(text: &str) -> BTreeMap<String, PoiValue> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let t = line.trim();
        let parsed = if let Some(rest) = t.strip_prefix("Best fit ") {
            rest.split_once(':').and_then(|(name, r)| Some((name.trim(), parse_value_and_errors(r)?)))
        } else if t.contains("(68%)") {
            t.split_once(':').and_then(|(name, r)| {
                let name = name.trim();
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return None;
                }
                Some((name, parse_value_and_errors(r)?))
            })
        } else {
            None
        };
        if let Some((name, v)) = parsed {
            out.insert(name.to_string(), v);
        }
    }
    out
}

/// Fit results of one `year/category/cut` directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRow {
    /// Period
    pub year: String,
    /// Template group
    pub category: String,
    /// τ21 cut label
    pub cut: String,
    /// Found parameters of interest
    pub pois: BTreeMap<String, PoiValue>,
}

impl FitRow {
    /// Flat JSON object: `year, category, cut, {poi}, {poi}_errUp, {poi}_errDown`.
    pub fn to_json(&self) -> Value {
        let mut m = Map::new();
        m.insert("year".into(), Value::from(self.year.clone()));
        m.insert("category".into(), Value::from(self.category.clone()));
        m.insert("cut".into(), Value::from(self.cut.clone()));
        for poi in POIS {
            if let Some(v) = self.pois.get(poi) {
                m.insert(poi.into(), Value::from(v.value));
                m.insert(format!("{poi}_errUp"), Value::from(v.err_up));
                m.insert(format!("{poi}_errDown"), Value::from(v.err_down));
            }
        }
        Value::Object(m)
    }

    /// Read back a [`RESULTS_JSON`] file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let v: Value = serde_json::from_str(&text)?;
        let s = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        let f = |k: &str| v.get(k).and_then(Value::as_f64);
        let mut pois = BTreeMap::new();
        for poi in POIS {
            if let Some(value) = f(poi) {
                let err_up = f(&format!("{poi}_errUp")).unwrap_or(0.0);
                let err_down = f(&format!("{poi}_errDown")).unwrap_or(0.0);
                pois.insert(poi.to_string(), PoiValue { value, err_up, err_down });
            }
        }
        Ok(Self { year: s("year"), category: s("category"), cut: s("cut"), pois })
    }
}

fn csv_header(pois: &[&str]) -> Vec<String> {
    let mut h: Vec<String> = ["year", "category", "cut"].iter().map(|s| s.to_string()).collect();
    for p in pois {
        h.extend([p.to_string(), format!("{p}_errUp"), format!("{p}_errDown")]);
    }
    h
}

/// Write rows as CSV; POI columns appear when at least one row has them.
pub fn write_rows_csv(path: &Path, rows: &[FitRow]) -> Result<()> {
    let pois: Vec<&str> = POIS.into_iter().filter(|p| rows.iter().any(|r| r.pois.contains_key(*p))).collect();
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(csv_header(&pois))?;
    for r in rows {
        let mut rec = vec![r.year.clone(), r.category.clone(), r.cut.clone()];
        for p in &pois {
            match r.pois.get(*p) {
                Some(v) => rec.extend([v.value.to_string(), v.err_up.to_string(), v.err_down.to_string()]),
                None => rec.extend([String::new(), String::new(), String::new()]),
            }
        }
        w.write_record(&rec)?;
    }
    w.flush().map_err(|e| Error::io_at(path, e))?;
    Ok(())
}

fn logs_matching(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_at(dir, e))? {
        let path = entry.map_err(|e| Error::io_at(dir, e))?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with(prefix) && name.ends_with(".log") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn name_of(p: Option<&Path>) -> String {
    p.and_then(Path::file_name).and_then(|n| n.to_str()).unwrap_or_default().to_string()
}

/// Parse the fit logs of a cut directory (`{year}/{category}/{cut}`) and
/// write [`RESULTS_JSON`] and [`RESULTS_CSV`] into it.
pub fn extract_fit_results(cut_dir: &Path) -> Result<FitRow> {
    let diag = logs_matching(cut_dir, "fitDiagnostics.")?;
    if diag.len() != 1 {
        return Err(Error::Validation(format!(
            "expected one fitDiagnostics log in {}, found {}",
            cut_dir.display(),
            diag.len()
        )));
    }
    let mut pois = BTreeMap::new();
    // MultiDimFit values override the FitDiagnostics summary
    for log in diag.iter().chain(logs_matching(cut_dir, "multiDimFit.")?.iter()) {
        let text = std::fs::read_to_string(log).map_err(|e| Error::io_at(log, e))?;
        pois.extend(parse_poi_lines(&text));
    }
    pois.retain(|k, _| POIS.contains(&k.as_str()));
    for poi in POIS {
        if !pois.contains_key(poi) {
            tracing::warn!(dir = %cut_dir.display(), poi, "POI not found in fit logs");
        }
    }

    let row = FitRow {
        cut: name_of(Some(cut_dir)),
        category: name_of(cut_dir.parent()),
        year: name_of(cut_dir.parent().and_then(Path::parent)),
        pois,
    };
    let json = cut_dir.join(RESULTS_JSON);
    std::fs::write(&json, serde_json::to_string_pretty(&row.to_json())?).map_err(|e| Error::io_at(&json, e))?;
    write_rows_csv(&cut_dir.join(RESULTS_CSV), std::slice::from_ref(&row))?;
    tracing::info!(dir = %cut_dir.display(), pois = row.pois.len(), "saved fit results");
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MULTIDIM: &str = "\
 --- MultiDimFit ---
best fit parameter values and profile-likelihood uncertainties:
   r :    +0.950   -0.080/+0.090 (68%)
   SF_c :    +1.200   -0.300/+0.250 (68%)
Done in 0.01 min (cpu), 0.01 min (real)
";

    const DIAG: &str = "\
 --- FitDiagnostics ---
Best fit r: 0.94 -0.1/+0.1  (68% CL)
";

    #[test]
    fn parses_both_line_styles() {
        let p = parse_poi_lines(MULTIDIM);
        assert_relative_eq!(p["r"].value, 0.95);
        assert_relative_eq!(p["r"].err_down, 0.08);
        assert_relative_eq!(p["SF_c"].err_up, 0.25);
        assert!(!p.contains_key("SF_light"));

        let d = parse_poi_lines(DIAG);
        assert_relative_eq!(d["r"].value, 0.94);
        assert_relative_eq!(d["r"].err_up, 0.1);
        assert!(parse_poi_lines("Done in 0.01 min (cpu)\nrandom: text").is_empty());
    }

    #[test]
    fn extracts_into_cut_directory() {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let base = std::env::temp_dir().join(format!("mutag_fitres_{}_{}", std::process::id(), nanos));
        let dir = base.join("2018").join("msd-80to170_Pt-350to425_particleNet_XbbVsQCD-HHbbtt").join("tau21_0p30");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(extract_fit_results(&dir).is_err());

        std::fs::write(dir.join("fitDiagnostics.msd.log"), DIAG).unwrap();
        std::fs::write(dir.join("multiDimFit.msd.log"), MULTIDIM).unwrap();
        let row = extract_fit_results(&dir).unwrap();
        assert_eq!(row.year, "2018");
        assert_eq!(row.category, "msd-80to170_Pt-350to425_particleNet_XbbVsQCD-HHbbtt");
        assert_eq!(row.cut, "tau21_0p30");
        assert_relative_eq!(row.pois["r"].value, 0.95);

        let back = FitRow::from_json_file(&dir.join(RESULTS_JSON)).unwrap();
        assert_eq!(back, row);
        let csv = std::fs::read_to_string(dir.join(RESULTS_CSV)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "year,category,cut,r,r_errUp,r_errDown,SF_c,SF_c_errUp,SF_c_errDown");
        assert!(lines.next().unwrap().starts_with("2018,msd-80to170"));
        let _ = std::fs::remove_dir_all(&base);
    }
}
