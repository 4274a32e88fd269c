//! Certified luminosity ("golden JSON") masks.

use std::collections::HashMap;
use std::path::Path;

use mt_core::{Error, Result};

/// Certified luminosity sections per run.
#[derive(Debug, Clone, Default)]
pub struct LumiMask {
    runs: HashMap<u32, Vec<(u32, u32)>>,
}

impl LumiMask {
    /// Parse `{"run": [[first, last], ...], ...}`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<[u32; 2]>> = serde_json::from_str(text)?;
        let mut runs = HashMap::with_capacity(raw.len());
        for (run, ranges) in raw {
            let run: u32 = run.parse().map_err(|_| Error::Config(format!("lumi mask: invalid run number '{run}'")))?;
            let mut ranges: Vec<(u32, u32)> = ranges.into_iter().map(|[a, b]| (a, b)).collect();
            ranges.sort_unstable();
            runs.insert(run, ranges);
        }
        Ok(Self { runs })
    }

    /// Load a golden JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        Self::from_json_str(&text)
    }

    /// Whether `(run, lumi)` is certified. Range bounds are inclusive.
    pub fn contains(&self, run: u32, lumi: u32) -> bool {
        self.runs.get(&run).is_some_and(|ranges| ranges.iter().any(|&(a, b)| a <= lumi && lumi <= b))
    }
}
