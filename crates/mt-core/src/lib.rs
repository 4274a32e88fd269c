//! # mt-core
//!
//! Shared error type and analysis vocabulary for the mutag calibration
//! toolkit: jet flavour classes and the datacard process groups they
//! feed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Flavor, ProcessKind, sample_flavor};

/// Toolkit version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
