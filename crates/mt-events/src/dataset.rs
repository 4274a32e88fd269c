//! Dataset definition files.
//!
//! A definition file is a JSON object keyed by dataset name:
//!
//! ```json
//! {"QCD_Pt-300to470_2018": {"metadata": {"sample": "QCD_MuEnriched", "year": "2018",
//!   "isMC": "True", "xsec": 1.2e4}, "files": ["qcd_0.parquet"]}}
//! ```
//!
//! Relative file paths are resolved against the definition file's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mt_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Per-dataset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Physics sample the dataset belongs to (`QCD_MuEnriched`, `DATA_BTagMu`, ...)
    pub sample: String,
    /// Data-taking period (`2018`, `2022_preEE`, ...)
    pub year: String,
    /// Simulation flag
    #[serde(rename = "isMC", deserialize_with = "bool_or_string")]
    pub is_mc: bool,
    /// Cross section in pb (simulation only)
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub xsec: Option<f64>,
    /// Data era (data only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<String>,
}

/// One dataset: metadata plus event files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name (the key in the definition file)
    #[serde(skip)]
    pub name: String,
    /// Metadata
    pub metadata: DatasetMetadata,
    /// Event files
    pub files: Vec<PathBuf>,
}

fn bool_or_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Bool(b) => Ok(b),
        Raw::Str(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(serde::de::Error::custom(format!("invalid boolean '{s}'"))),
        },
    }
}

fn opt_number_or_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Num(x)) => Ok(Some(x)),
        Some(Raw::Str(s)) => {
            s.trim().parse::<f64>().map(Some).map_err(|_| serde::de::Error::custom(format!("invalid xsec '{s}'")))
        }
    }
}

/// Load and merge dataset definition files.
///
/// Duplicate dataset names across files are an error.
pub fn load_datasets(paths: &[PathBuf]) -> Result<BTreeMap<String, Dataset>> {
    let mut out = BTreeMap::new();
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let parsed: BTreeMap<String, Dataset> = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: invalid dataset definition: {e}", path.display())))?;
        let base = path.parent().unwrap_or(Path::new("."));
        for (name, mut ds) in parsed {
            if out.contains_key(&name) {
                return Err(Error::Config(format!("dataset '{name}' defined twice (again in {})", path.display())));
            }
            ds.name = name.clone();
            ds.files = ds.files.into_iter().map(|f| if f.is_relative() { base.join(f) } else { f }).collect();
            out.insert(name, ds);
        }
    }
    tracing::debug!(n = out.len(), "loaded dataset definitions");
    Ok(out)
}

/// Keep datasets whose sample is in `samples` and year in `years`.
///
/// An empty filter list keeps everything.
pub fn filter_datasets(
    datasets: BTreeMap<String, Dataset>,
    samples: &[String],
    years: &[String],
) -> BTreeMap<String, Dataset> {
    datasets
        .into_iter()
        .filter(|(_, d)| samples.is_empty() || samples.contains(&d.metadata.sample))
        .filter(|(_, d)| years.is_empty() || years.contains(&d.metadata.year))
        .collect()
}

/// First file of the first dataset (by name) taken in `year`.
pub fn first_file_for_year<'a>(datasets: &'a BTreeMap<String, Dataset>, year: &str) -> Option<&'a Path> {
    datasets.values().filter(|d| d.metadata.year == year).find_map(|d| d.files.first().map(PathBuf::as_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_flags_and_resolves_paths() {
        let dir = std::env::temp_dir().join(format!("mt_ds_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let p = dir.join("datasets.json");
        std::fs::write(
            &p,
            r#"{
              "QCD_2018": {"metadata": {"sample": "QCD_MuEnriched", "year": "2018", "isMC": "True", "xsec": "1250.5"},
                           "files": ["qcd.jsonl", "/abs/qcd2.jsonl"]},
              "DATA_2018A": {"metadata": {"sample": "DATA_BTagMu", "year": "2018", "isMC": false, "era": "A"},
                             "files": []}
            }"#,
        )
        .unwrap();
        let ds = load_datasets(std::slice::from_ref(&p)).unwrap();
        let qcd = &ds["QCD_2018"];
        assert_eq!(qcd.name, "QCD_2018");
        assert!(qcd.metadata.is_mc);
        assert_eq!(qcd.metadata.xsec, Some(1250.5));
        assert_eq!(qcd.files[0], dir.join("qcd.jsonl"));
        assert_eq!(qcd.files[1], PathBuf::from("/abs/qcd2.jsonl"));
        assert!(!ds["DATA_2018A"].metadata.is_mc);
        assert_eq!(first_file_for_year(&ds, "2018"), Some(dir.join("qcd.jsonl").as_path()));

        let only_data = filter_datasets(ds.clone(), &["DATA_BTagMu".to_string()], &[]);
        assert_eq!(only_data.len(), 1);

        let err = load_datasets(&[p.clone(), p.clone()]).unwrap_err().to_string();
        assert!(err.contains("defined twice"), "{err}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
