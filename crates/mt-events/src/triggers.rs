//! Discovery of the `HLT_BTagMu*` trigger paths stored in event files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use mt_core::Result;
use serde::Serialize;

use crate::dataset::{Dataset, first_file_for_year};
use crate::ingest::{parquet, read_events};

/// Trigger family looked for.
pub const TRIGGER_FAMILY: &str = "BTagMu";

/// BTagMu paths split by jet type, names without the `HLT_` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerPaths {
    /// Paths seeded by AK4 jets
    pub ak4: BTreeSet<String>,
    /// Paths seeded by AK8 jets
    pub ak8: BTreeSet<String>,
    /// Anything else in the family
    pub other: BTreeSet<String>,
}

impl TriggerPaths {
    fn insert(&mut self, raw: &str) {
        let Some(name) = raw.strip_prefix("HLT_") else { return };
        let name = name.split('/').next().unwrap_or(name);
        if !name.starts_with(TRIGGER_FAMILY) {
            return;
        }
        let set = if name.contains("AK4") {
            &mut self.ak4
        } else if name.contains("AK8") {
            &mut self.ak8
        } else {
            &mut self.other
        };
        set.insert(name.to_string());
    }

    fn extend(&mut self, other: TriggerPaths) {
        self.ak4.extend(other.ak4);
        self.ak8.extend(other.ak8);
        self.other.extend(other.other);
    }

    /// Union of all three groups, sorted.
    pub fn all(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.ak4.iter().chain(&self.ak8).chain(&self.other).collect();
        all.into_iter().cloned().collect()
    }

    /// Whether nothing was found.
    pub fn is_empty(&self) -> bool {
        self.ak4.is_empty() && self.ak8.is_empty() && self.other.is_empty()
    }
}

/// Trigger paths present in one event file.
///
/// Parquet files are inspected through their schema; JSON-lines files
/// through the union of the `HLT` maps of their events.
pub fn file_triggers(path: &Path) -> Result<TriggerPaths> {
    let mut out = TriggerPaths::default();
    if path.to_string_lossy().ends_with(".parquet") {
        for col in parquet::parquet_columns(path)? {
            out.insert(&col);
        }
    } else {
        for ev in read_events(path)? {
            for name in ev.hlt.keys() {
                out.insert(&format!("HLT_{name}"));
            }
        }
    }
    Ok(out)
}

/// Per-period trigger paths from the first file of each period in every
/// dataset collection. Periods with no file are skipped with a warning.
pub fn discover_triggers(
    collections: &[&BTreeMap<String, Dataset>],
    years: &[String],
) -> Result<BTreeMap<String, TriggerPaths>> {
    let mut out = BTreeMap::new();
    for year in years {
        let mut paths = TriggerPaths::default();
        for datasets in collections {
            match first_file_for_year(datasets, year) {
                Some(file) => {
                    let found = file_triggers(file)?;
                    tracing::info!(
                        year = %year,
                        file = %file.display(),
                        ak4 = found.ak4.len(),
                        ak8 = found.ak8.len(),
                        other = found.other.len(),
                        "found trigger paths"
                    );
                    paths.extend(found);
                }
                None => tracing::warn!(year = %year, "no file for period"),
            }
        }
        if !paths.is_empty() {
            out.insert(year.clone(), paths);
        }
    }
    Ok(out)
}

/// YAML layout consumed by the analysis configuration:
/// `HLT_triggers: {year: {BTagMu: [paths]}}`.
#[derive(Debug, Serialize)]
pub struct TriggerTable {
    /// Paths per period and family
    #[serde(rename = "HLT_triggers")]
    pub hlt_triggers: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl TriggerTable {
    /// Build a table from discovered paths, choosing one group.
    pub fn from_paths(
        found: &BTreeMap<String, TriggerPaths>,
        select: impl Fn(&TriggerPaths) -> Vec<String>,
    ) -> Self {
        let hlt_triggers = found
            .iter()
            .filter_map(|(year, p)| {
                let list = select(p);
                (!list.is_empty()).then(|| (year.clone(), BTreeMap::from([(TRIGGER_FAMILY.to_string(), list)])))
            })
            .collect();
        Self { hlt_triggers }
    }
}
