//! # mt-analysis
//!
//! Event processing of the mutag calibration: object preselection, ΔR
//! matching, secondary-vertex observables, fat-jet calibration, cuts and
//! categories, event weights, histogramming, the processing workflows and
//! the chunked parallel runner producing the run [`Output`].
//!
//! ```no_run
//! use std::path::Path;
//!
//! let cfg = mt_analysis::load_config(Path::new("config.yaml")).unwrap();
//! let output = mt_analysis::run(&cfg).unwrap();
//! output.save(Path::new("output.json.gz")).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod categories;
pub mod config;
pub mod cuts;
pub mod hist;
pub mod jec;
pub mod lumimask;
pub mod matching;
pub mod objects;
pub mod output;
pub mod processor;
pub mod resources;
pub mod runner;
pub mod selection;
pub mod sv;
pub mod weights;
pub mod workflow;

pub use categories::{TemplateCategories, TemplateCategory, parse_template_category};
pub use config::{AnalysisConfig, WorkflowKind, load_config};
pub use cuts::{Cut, Selection};
pub use hist::{Binning, Hist, HistAxis, HistConf};
pub use jec::{JetCalibrator, ShapeVariation};
pub use output::Output;
pub use processor::Processor;
pub use resources::Resources;
pub use runner::{run, select_datasets};
pub use weights::WeightKind;
pub use workflow::{Workflow, workflow_for};
