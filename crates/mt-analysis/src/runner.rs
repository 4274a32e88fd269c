//! Chunked, parallel execution of a configuration over its datasets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Instant;

use mt_core::{Error, Result};
use mt_events::{Dataset, filter_datasets, load_datasets, read_events};
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::output::Output;
use crate::processor::{ChunkId, Processor};
use crate::resources::Resources;

/// Datasets selected by the configuration's filters.
pub fn select_datasets(cfg: &AnalysisConfig) -> Result<BTreeMap<String, Dataset>> {
    let all = load_datasets(&cfg.datasets.jsons)?;
    let f = &cfg.datasets.filter;
    let selected: BTreeMap<String, Dataset> = filter_datasets(all, &f.samples, &f.year)
        .into_iter()
        .filter(|(_, d)| !f.samples_exclude.contains(&d.metadata.sample))
        .collect();
    if selected.is_empty() {
        return Err(Error::Config("no dataset passes the dataset filters".into()));
    }
    Ok(selected)
}

/// One file of one dataset.
struct FileTask<'d> {
    dataset: &'d Dataset,
    file: PathBuf,
}

fn process_file(processor: &Processor<'_>, task: &FileTask<'_>, chunk_size: usize, limit_chunks: Option<usize>) -> Result<Output> {
    let events = read_events(&task.file)?;
    let n_chunks = events.len().div_ceil(chunk_size);
    let n_chunks = limit_chunks.map_or(n_chunks, |l| l.min(n_chunks));
    let empty = || {
        let mut out = Output::new();
        out.add_dataset(&task.dataset.name, &task.dataset.metadata);
        out
    };
    events
        .par_chunks(chunk_size)
        .take(n_chunks)
        .enumerate()
        .map(|(i, chunk)| {
            let start = i * chunk_size;
            let id = ChunkId::new(&task.file, start, start + chunk.len());
            processor.process_chunk(task.dataset, &id, chunk)
        })
        .try_reduce(empty, Output::merge)
}

/// Process every selected dataset and return the normalized output.
pub fn run(cfg: &AnalysisConfig) -> Result<Output> {
    let started = Instant::now();
    let datasets = select_datasets(cfg)?;
    let years: BTreeSet<String> = datasets.values().map(|d| d.metadata.year.clone()).collect();
    let resources = Resources::load(cfg, &years)?;
    let processor = Processor::new(cfg, &resources)?;

    let opts = &cfg.run_options;
    let tasks: Vec<FileTask<'_>> = datasets
        .values()
        .flat_map(|d| {
            let n = opts.limit_files.map_or(d.files.len(), |l| l.min(d.files.len()));
            d.files[..n].iter().map(move |f| FileTask { dataset: d, file: f.clone() })
        })
        .collect();
    tracing::info!(
        workflow = ?processor.workflow().kind(),
        datasets = datasets.len(),
        files = tasks.len(),
        chunk = opts.chunk,
        "starting run"
    );

    let execute = || -> Result<Output> {
        tasks
            .par_iter()
            .map(|t| process_file(&processor, t, opts.chunk, opts.limit_chunks))
            .try_reduce(Output::new, Output::merge)
    };
    let mut output = match opts.workers {
        Some(n) if n > 0 => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
            pool.install(execute)?
        }
        _ => execute()?,
    };
    // datasets whose files were all skipped still appear in the metadata
    for d in datasets.values() {
        output.add_dataset(&d.name, &d.metadata);
    }
    output.normalize_mc();
    tracing::info!(elapsed_s = started.elapsed().as_secs_f64(), "run finished");
    Ok(output)
}
