//! # mt-stat
//!
//! Statistical stage of the mutag calibration, run on a saved [`Output`]:
//! pass/fail datacards with their ROOT shape files, the `combine` card
//! merging and fits, extraction of the fitted scale factors, and the
//! auxiliary derivations (data/MC reweighting maps, pT quantiles, trigger
//! prescale averages, τ21 summary).
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use mt_stat::{DatacardOptions, create_datacards};
//!
//! let output = mt_analysis::Output::load(Path::new("output.json.gz")).unwrap();
//! let opts = DatacardOptions::new(PathBuf::from("datacards"));
//! let report = create_datacards(&output, &opts).unwrap();
//! report.log();
//! ```
//!
//! [`Output`]: mt_analysis::Output

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod combine;
pub mod create;
pub mod datacard;
pub mod fit_results;
pub mod prescales;
pub mod quantiles;
pub mod reweighting;
pub mod rootio;
pub mod sf_summary;

pub use combine::{FitOptions, FitStatus, fit_all, run_combine_cards, run_fit};
pub use create::{DatacardOptions, DatacardReport, create_datacards};
pub use datacard::{CardLayout, Datacard, DatacardMutag};
pub use fit_results::{FitRow, PoiValue, extract_fit_results};
pub use reweighting::compute_reweighting;
pub use rootio::{RootFileWriter, Th1d};
pub use sf_summary::SfType;
