//! Correction set loading.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use mt_core::{Error, Result};

use crate::eval::{CompoundCorrection, Correction};
use crate::schema::{CorrectionSetDoc, SCHEMA_VERSION};

/// A compiled correctionlib document.
#[derive(Debug, Clone)]
pub struct CorrectionSet {
    description: Option<String>,
    corrections: HashMap<String, Correction>,
    compound: HashMap<String, CompoundCorrection>,
    order: Vec<String>,
}

impl CorrectionSet {
    /// Load from `.json` or `.json.gz`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| Error::io_at(path, e))?;
        let text = if path.extension().is_some_and(|e| e == "gz") {
            let mut out = String::new();
            GzDecoder::new(raw.as_slice())
                .read_to_string(&mut out)
                .map_err(|e| Error::io_at(path, e))?;
            out
        } else {
            String::from_utf8(raw)
                .map_err(|e| Error::Correction(format!("{}: not UTF-8: {e}", path.display())))?
        };
        let set = Self::from_json_str(&text)
            .map_err(|e| Error::Correction(format!("{}: {e}", path.display())))?;
        tracing::debug!(
            path = %path.display(),
            corrections = set.corrections.len(),
            compound = set.compound.len(),
            "loaded correction set"
        );
        Ok(set)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: CorrectionSetDoc = serde_json::from_str(text)?;
        Self::from_doc(&doc)
    }

    /// Compile a parsed document.
    pub fn from_doc(doc: &CorrectionSetDoc) -> Result<Self> {
        if doc.schema_version != SCHEMA_VERSION {
            return Err(Error::Correction(format!(
                "unsupported schema_version {} (expected {SCHEMA_VERSION})",
                doc.schema_version
            )));
        }
        let mut corrections = HashMap::with_capacity(doc.corrections.len());
        for c in &doc.corrections {
            if corrections.insert(c.name.clone(), Correction::compile(c)?).is_some() {
                return Err(Error::Correction(format!("duplicate correction '{}'", c.name)));
            }
        }
        let mut compound = HashMap::with_capacity(doc.compound_corrections.len());
        for cc in &doc.compound_corrections {
            compound.insert(cc.name.clone(), CompoundCorrection::compile(cc, &corrections)?);
        }
        let order = doc.corrections.iter().map(|c| c.name.clone()).collect();
        Ok(Self { description: doc.description.clone(), corrections, compound, order })
    }

    /// Document description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Look up a correction.
    pub fn get(&self, name: &str) -> Result<&Correction> {
        self.corrections.get(name).ok_or_else(|| {
            Error::Correction(format!("no correction named '{name}' (available: {})", self.listing()))
        })
    }

    /// First correction in document order.
    pub fn first(&self) -> Result<&Correction> {
        let name = self.order.first().ok_or_else(|| Error::Correction("correction set is empty".into()))?;
        self.get(name)
    }

    /// Look up a compound correction.
    pub fn compound(&self, name: &str) -> Result<&CompoundCorrection> {
        self.compound.get(name).ok_or_else(|| {
            Error::Correction(format!("no compound correction named '{name}'"))
        })
    }

    /// Sorted names of all plain corrections.
    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.corrections.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    fn listing(&self) -> String {
        let names = self.names();
        if names.len() > 8 {
            format!("{} and {} more", names[..8].join(", "), names.len() - 8)
        } else {
            names.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InputBag, Value};
    use std::io::Write;

    const JEC_SET: &str = r#"{
        "schema_version": 2,
        "corrections": [
            {"name": "L1", "inputs": [{"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
             "output": {"name": "c", "type": "real"},
             "data": {"nodetype": "formula", "expression": "1-[0]*y/x", "parser": "TFormula",
                      "variables": ["JetPt", "Rho"], "parameters": [2.0]}},
            {"name": "L2", "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"}],
             "output": {"name": "c", "type": "real"},
             "data": {"nodetype": "binning", "input": "JetEta", "edges": [-5, 0, 5],
                      "content": [1.1, {"nodetype": "formula", "expression": "1+10/x", "parser": "TFormula",
                                        "variables": ["JetPt"]}], "flow": "clamp"}}
        ],
        "compound_corrections": [
            {"name": "L1L2", "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"},
                                         {"name": "Rho", "type": "real"}],
             "output": {"name": "c", "type": "real"},
             "inputs_update": ["JetPt"], "input_op": "*", "output_op": "*", "stack": ["L1", "L2"]}
        ]
    }"#;

    #[test]
    fn compound_matches_sequential_stages() {
        let set = CorrectionSet::from_json_str(JEC_SET).unwrap();
        let (eta, pt, rho) = (0.7, 200.0, 20.0);
        let l1 = set.get("L1").unwrap().evaluate(&[pt.into(), rho.into()]).unwrap();
        let pt1 = pt * l1;
        let l2 = set.get("L2").unwrap().evaluate(&[eta.into(), pt1.into()]).unwrap();
        let compound = set.compound("L1L2").unwrap();
        let c = compound.evaluate(&[eta.into(), pt.into(), rho.into()]).unwrap();
        assert!((c - l1 * l2).abs() < 1e-12, "{c} vs {}", l1 * l2);

        let bag = InputBag::new().real("JetEta", eta).real("JetPt", pt).real("Rho", rho).real("JetA", 2.0);
        assert_eq!(compound.evaluate_named(&bag).unwrap(), c);
    }

    #[test]
    fn missing_names_are_reported() {
        let set = CorrectionSet::from_json_str(JEC_SET).unwrap();
        let err = set.get("L3").unwrap_err().to_string();
        assert!(err.contains("L3") && err.contains("L1, L2"), "{err}");
        assert!(set.compound("L1L2L3").is_err());
        assert_eq!(set.names(), vec!["L1", "L2"]);
        assert_eq!(set.first().unwrap().name(), "L1");
    }

    #[test]
    fn rejects_wrong_schema_and_unknown_stage() {
        let bad = JEC_SET.replace("\"schema_version\": 2", "\"schema_version\": 1");
        assert!(CorrectionSet::from_json_str(&bad).is_err());
        let bad = JEC_SET.replace("[\"L1\", \"L2\"]", "[\"L1\", \"L9\"]");
        let err = CorrectionSet::from_json_str(&bad).unwrap_err().to_string();
        assert!(err.contains("L9"), "{err}");
    }

    #[test]
    fn reads_gzipped_files() {
        let mut p = std::env::temp_dir();
        p.push(format!("mt_correction_{}_jec.json.gz", std::process::id()));
        let f = std::fs::File::create(&p).unwrap();
        let mut enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        enc.write_all(JEC_SET.as_bytes()).unwrap();
        enc.finish().unwrap();

        let set = CorrectionSet::from_file(&p).unwrap();
        let v = set.get("L2").unwrap().evaluate(&[Value::Real(-1.0), Value::Real(50.0)]).unwrap();
        assert_eq!(v, 1.1);
        let _ = std::fs::remove_file(&p);

        let err = CorrectionSet::from_file(&p).unwrap_err().to_string();
        assert!(err.contains("mt_correction_"), "{err}");
    }
}
