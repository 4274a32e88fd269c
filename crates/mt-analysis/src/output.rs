//! Run accumulator: histograms, cutflows and bookkeeping of one run.
//!
//! Chunks produce partial [`Output`]s that are merged in any order; all maps
//! are ordered so the merged result and its serialization do not depend on
//! the scheduling.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use mt_core::{Error, Result};
use mt_events::DatasetMetadata;
use serde::{Deserialize, Serialize};

use crate::hist::Hist;

/// Metadata of the processed datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetsMetadata {
    /// Dataset → metadata
    pub by_dataset: BTreeMap<String, DatasetMetadata>,
    /// Period → sample → datasets
    pub by_datataking_period: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

/// Accumulated results of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Histogram → subsample → dataset → histogram
    pub variables: BTreeMap<String, BTreeMap<String, BTreeMap<String, Hist>>>,
    /// Category → dataset → subsample → Σw
    pub cutflow: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    /// Category → dataset → subsample → event count
    pub cutflow_raw: BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>,
    /// Dataset → Σ genWeight
    pub sum_genweights: BTreeMap<String, f64>,
    /// Dataset bookkeeping
    pub datasets_metadata: DatasetsMetadata,
    /// Chunk key → JER seed
    pub seed_fatjet_chunk: BTreeMap<String, u64>,
}

impl Output {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset in the bookkeeping.
    pub fn add_dataset(&mut self, name: &str, metadata: &DatasetMetadata) {
        self.datasets_metadata.by_dataset.insert(name.to_string(), metadata.clone());
        self.datasets_metadata
            .by_datataking_period
            .entry(metadata.year.clone())
            .or_default()
            .entry(metadata.sample.clone())
            .or_default()
            .insert(name.to_string());
    }

    /// Count one event (weight `w`) in a cutflow step.
    pub fn count(&mut self, step: &str, dataset: &str, subsample: &str, w: f64) {
        *self
            .cutflow
            .entry(step.to_string())
            .or_default()
            .entry(dataset.to_string())
            .or_default()
            .entry(subsample.to_string())
            .or_default() += w;
        *self
            .cutflow_raw
            .entry(step.to_string())
            .or_default()
            .entry(dataset.to_string())
            .or_default()
            .entry(subsample.to_string())
            .or_default() += 1;
    }

    /// Histogram slot, created from `template` on first use.
    pub fn hist_mut(&mut self, name: &str, subsample: &str, dataset: &str, template: impl FnOnce() -> Hist) -> &mut Hist {
        self.variables
            .entry(name.to_string())
            .or_default()
            .entry(subsample.to_string())
            .or_default()
            .entry(dataset.to_string())
            .or_insert_with(template)
    }

    /// Add another accumulator.
    pub fn merge(mut self, other: Output) -> Result<Output> {
        for (name, by_sub) in other.variables {
            for (sub, by_ds) in by_sub {
                for (ds, h) in by_ds {
                    let slot = self.variables.entry(name.clone()).or_default().entry(sub.clone()).or_default();
                    match slot.get_mut(&ds) {
                        Some(mine) => mine
                            .merge(&h)
                            .map_err(|e| Error::Validation(format!("histogram '{name}' / {sub} / {ds}: {e}")))?,
                        None => {
                            slot.insert(ds, h);
                        }
                    }
                }
            }
        }
        for (step, by_ds) in other.cutflow {
            for (ds, by_sub) in by_ds {
                for (sub, w) in by_sub {
                    *self.cutflow.entry(step.clone()).or_default().entry(ds.clone()).or_default().entry(sub).or_default() += w;
                }
            }
        }
        for (step, by_ds) in other.cutflow_raw {
            for (ds, by_sub) in by_ds {
                for (sub, n) in by_sub {
                    *self
                        .cutflow_raw
                        .entry(step.clone())
                        .or_default()
                        .entry(ds.clone())
                        .or_default()
                        .entry(sub)
                        .or_default() += n;
                }
            }
        }
        for (ds, w) in other.sum_genweights {
            *self.sum_genweights.entry(ds).or_default() += w;
        }
        for (ds, md) in other.datasets_metadata.by_dataset {
            self.add_dataset(&ds, &md);
        }
        self.seed_fatjet_chunk.extend(other.seed_fatjet_chunk);
        Ok(self)
    }

    /// Divide the histograms and weighted cutflows of every simulated
    /// dataset by its Σ genWeight.
    pub fn normalize_mc(&mut self) {
        let mut factors = BTreeMap::new();
        for (ds, md) in &self.datasets_metadata.by_dataset {
            if !md.is_mc {
                continue;
            }
            let sumw = self.sum_genweights.get(ds).copied().unwrap_or(0.0);
            if sumw == 0.0 {
                tracing::warn!(dataset = %ds, "sum of genWeight is zero; dataset left unnormalized");
                continue;
            }
            factors.insert(ds.clone(), 1.0 / sumw);
        }
        for by_ds in self.variables.values_mut().flat_map(|s| s.values_mut()) {
            for (ds, h) in by_ds.iter_mut() {
                if let Some(k) = factors.get(ds) {
                    h.scale(*k);
                }
            }
        }
        for (step, by_ds) in self.cutflow.iter_mut() {
            // the unweighted steps stay in genWeight units
            if step == "initial" || step == "skim" {
                continue;
            }
            for (ds, by_sub) in by_ds.iter_mut() {
                if let Some(k) = factors.get(ds) {
                    by_sub.values_mut().for_each(|w| *w *= k);
                }
            }
        }
    }

    /// Write as JSON, gzipped when the name ends in `.gz`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| Error::io_at(path, e))?;
        if is_gz(path) {
            let mut enc = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut enc, self)?;
            enc.finish().map_err(|e| Error::io_at(path, e))?.flush().map_err(|e| Error::io_at(path, e))?;
        } else {
            let mut w = std::io::BufWriter::new(file);
            serde_json::to_writer(&mut w, self)?;
            w.flush().map_err(|e| Error::io_at(path, e))?;
        }
        tracing::info!(path = %path.display(), histograms = self.variables.len(), "wrote output");
        Ok(())
    }

    /// Read an output written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Output> {
        let file = std::fs::File::open(path).map_err(|e| Error::io_at(path, e))?;
        let mut text = String::new();
        if is_gz(path) {
            GzDecoder::new(file).read_to_string(&mut text).map_err(|e| Error::io_at(path, e))?;
        } else {
            std::io::BufReader::new(file).read_to_string(&mut text).map_err(|e| Error::io_at(path, e))?;
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Datasets of `sample` taken in `year`.
    pub fn datasets_of(&self, year: &str, sample: &str) -> Vec<&str> {
        self.datasets_metadata
            .by_datataking_period
            .get(year)
            .and_then(|m| m.get(sample))
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}
