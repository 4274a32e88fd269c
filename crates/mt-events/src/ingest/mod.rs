//! Event file readers.
//!
//! The format is chosen from the file name:
//! - `*.parquet`: NanoAOD-flattened columns (see [`parquet`])
//! - `*.jsonl`, `*.jsonl.gz`: one serialized [`Event`](crate::Event) per line

pub mod jsonl;
pub mod parquet;

use std::ops::Range;
use std::path::Path;

use mt_core::{Error, Result};

use crate::model::Event;

/// Read all events of a file.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let events = if name.ends_with(".parquet") {
        parquet::read_parquet_events(path)?
    } else if name.ends_with(".jsonl") || name.ends_with(".jsonl.gz") {
        jsonl::read_jsonl_events(path)?
    } else {
        return Err(Error::Input(format!(
            "{}: unsupported event file (expected .parquet, .jsonl or .jsonl.gz)",
            path.display()
        )));
    };
    tracing::debug!(path = %path.display(), events = events.len(), "read events");
    Ok(events)
}

/// Read the events with entry numbers in `range` (clamped to the file size).
pub fn read_events_range(path: &Path, range: Range<usize>) -> Result<Vec<Event>> {
    let mut all = read_events(path)?;
    let stop = range.end.min(all.len());
    let start = range.start.min(stop);
    all.truncate(stop);
    Ok(all.split_off(start))
}
