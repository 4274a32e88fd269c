//! # mt-events
//!
//! Row-wise event model for the mutag calibration: large-radius jets, their
//! soft-drop subjets, muons, electrons, secondary vertices and generator jets,
//! together with the HLT decisions and event filter flags of each event.
//!
//! Events are read from NanoAOD-flattened Parquet files (one list column per
//! collection field, e.g. `FatJet_pt`) or from JSON lines of serialized
//! [`Event`]s.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
pub mod ingest;
pub mod kinematics;
pub mod model;
pub mod triggers;

pub use dataset::{Dataset, DatasetMetadata, filter_datasets, load_datasets};
pub use ingest::{read_events, read_events_range};
pub use kinematics::{Candidate, LorentzVector, delta_phi, delta_r};
pub use model::{Electron, Event, FatJet, GenJet, Muon, SecondaryVertex, SubJet};
pub use triggers::{TriggerPaths, TriggerTable, discover_triggers};
