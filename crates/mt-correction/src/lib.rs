//! # mt-correction
//!
//! Reader and evaluator for correctionlib JSON documents (schema version 2),
//! the format used to distribute jet energy corrections, pileup weights,
//! trigger prescales and the data-driven reweighting maps of this analysis.
//!
//! Documents are parsed into the serde model in [`schema`] and compiled into
//! evaluation trees ([`Correction`]) with input names resolved to positions
//! and formulas pre-parsed.
//!
//! ```no_run
//! use mt_correction::{CorrectionSet, InputBag};
//!
//! let set = CorrectionSet::from_file("jet_jerc.json.gz").unwrap();
//! let jec = set.compound("Summer22_22Sep2023_V2_MC_L1L2L3Res_AK8PFPuppi").unwrap();
//! let bag = InputBag::new()
//!     .real("JetA", 2.0)
//!     .real("JetEta", 0.3)
//!     .real("JetPt", 420.0)
//!     .real("Rho", 18.0);
//! let factor = jec.evaluate_named(&bag).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convert;
mod eval;
pub mod formula;
pub mod schema;
mod set;

pub use convert::{DenseMap, from_histogram};
pub use eval::{Correction, CompoundCorrection};
pub use formula::Formula;
pub use set::CorrectionSet;

use std::collections::HashMap;

/// A single correction input value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `real` input
    Real(f64),
    /// `int` input
    Int(i64),
    /// `string` input
    Str(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Inputs addressed by name.
///
/// A bag may hold more entries than a correction declares; only the
/// declared inputs are looked up.
#[derive(Debug, Clone, Default)]
pub struct InputBag {
    values: HashMap<String, Value>,
}

impl InputBag {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a real-valued input.
    pub fn real(mut self, name: impl Into<String>, v: f64) -> Self {
        self.values.insert(name.into(), Value::Real(v));
        self
    }

    /// Add an integer input.
    pub fn int(mut self, name: impl Into<String>, v: i64) -> Self {
        self.values.insert(name.into(), Value::Int(v));
        self
    }

    /// Add a string input.
    pub fn string(mut self, name: impl Into<String>, v: impl Into<String>) -> Self {
        self.values.insert(name.into(), Value::Str(v.into()));
        self
    }

    /// Insert or overwrite an input in place.
    pub fn set(&mut self, name: impl Into<String>, v: impl Into<Value>) {
        self.values.insert(name.into(), v.into());
    }

    /// Look up an input by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}
