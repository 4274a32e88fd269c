//! JSON-lines event files.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use mt_core::{Error, Result};

use crate::model::Event;

fn open(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let inner: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(f))
    } else {
        Box::new(f)
    };
    Ok(Box::new(BufReader::new(inner)))
}

/// Read every non-empty line as an [`Event`].
pub fn read_jsonl_events(path: &Path) -> Result<Vec<Event>> {
    let reader = open(path)?;
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io_at(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: Event = serde_json::from_str(trimmed).map_err(|e| {
            Error::Input(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        out.push(ev);
    }
    Ok(out)
}

/// Write events as JSON lines (uncompressed).
pub fn write_jsonl_events(path: &Path, events: &[Event]) -> Result<()> {
    let f = File::create(path).map_err(|e| Error::io_at(path, e))?;
    let mut w = BufWriter::new(f);
    for ev in events {
        serde_json::to_writer(&mut w, ev)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FatJet;

    #[test]
    fn writes_and_reads_back_with_line_errors() {
        let mut p = std::env::temp_dir();
        p.push(format!("mt_events_{}_ev.jsonl", std::process::id()));
        let events = vec![
            Event { run: 1, event: 10, ..Default::default() },
            Event {
                run: 1,
                event: 11,
                fatjets: vec![FatJet { pt: 500.0, ..Default::default() }],
                ..Default::default()
            },
        ];
        write_jsonl_events(&p, &events).unwrap();
        let back = read_jsonl_events(&p).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].event, 11);
        assert_eq!(back[1].fatjets[0].pt, 500.0);
        assert_eq!(back[1].fatjets[0].gen_jet_idx, -1);

        std::fs::write(&p, "{\"run\": 1, \"luminosityBlock\": 1, \"event\": 1}\n\nnot json\n").unwrap();
        let err = read_jsonl_events(&p).unwrap_err().to_string();
        assert!(err.contains(":3:"), "{err}");
        let _ = std::fs::remove_file(&p);
    }
}
