//! Common analysis vocabulary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Jet flavour class from the hadron content of the matched generator jet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// No b or c hadrons
    L,
    /// Exactly one c hadron, no b hadrons
    C,
    /// Exactly one b hadron
    B,
    /// Two or more c hadrons, no b hadrons
    CC,
    /// Two or more b hadrons
    BB,
}

impl Flavor {
    /// All flavour classes in subsample order.
    pub const ALL: [Flavor; 5] = [Flavor::L, Flavor::C, Flavor::B, Flavor::CC, Flavor::BB];

    /// Subsample suffix (`l`, `c`, `b`, `cc`, `bb`).
    pub fn suffix(self) -> &'static str {
        match self {
            Flavor::L => "l",
            Flavor::C => "c",
            Flavor::B => "b",
            Flavor::CC => "cc",
            Flavor::BB => "bb",
        }
    }

    /// Classify from b/c hadron counts.
    pub fn from_hadrons(n_b: u32, n_c: u32) -> Self {
        match (n_b, n_c) {
            (0, 0) => Flavor::L,
            (0, 1) => Flavor::C,
            (0, _) => Flavor::CC,
            (1, _) => Flavor::B,
            _ => Flavor::BB,
        }
    }

    /// Whether the given hadron counts fall into this class.
    pub fn matches(self, n_b: u32, n_c: u32) -> bool {
        Flavor::from_hadrons(n_b, n_c) == self
    }

    /// Datacard process this flavour contributes to.
    pub fn process(self) -> ProcessKind {
        match self {
            Flavor::L => ProcessKind::Light,
            Flavor::C | Flavor::CC => ProcessKind::C,
            Flavor::B | Flavor::BB => ProcessKind::B,
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for Flavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l" => Ok(Flavor::L),
            "c" => Ok(Flavor::C),
            "b" => Ok(Flavor::B),
            "cc" => Ok(Flavor::CC),
            "bb" => Ok(Flavor::BB),
            other => Err(Error::Validation(format!("unknown flavour '{other}'"))),
        }
    }
}

/// Flavour of a subsample named `{sample}_{flavour}`, if any.
///
/// The longest suffix wins, so `QCD_bb` is `bb` and not `b`.
pub fn sample_flavor(subsample: &str) -> Option<Flavor> {
    let (_, suffix) = subsample.rsplit_once('_')?;
    suffix.parse().ok()
}

/// Datacard process grouping of jet flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// Light-flavour jets (`l`)
    #[serde(rename = "light")]
    Light,
    /// Charm jets (`c`, `cc`)
    #[serde(rename = "c")]
    C,
    /// Bottom jets (`b`, `bb`), the signal
    #[serde(rename = "b")]
    B,
}

impl ProcessKind {
    /// Process name used in datacards.
    pub fn name(self) -> &'static str {
        match self {
            ProcessKind::Light => "light",
            ProcessKind::C => "c",
            ProcessKind::B => "b",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavour_from_hadron_counts() {
        assert_eq!(Flavor::from_hadrons(0, 0), Flavor::L);
        assert_eq!(Flavor::from_hadrons(0, 1), Flavor::C);
        assert_eq!(Flavor::from_hadrons(0, 3), Flavor::CC);
        assert_eq!(Flavor::from_hadrons(1, 2), Flavor::B);
        assert_eq!(Flavor::from_hadrons(2, 0), Flavor::BB);
        assert!(Flavor::BB.matches(4, 1));
        assert!(!Flavor::B.matches(2, 0));
    }

    #[test]
    fn subsample_suffixes() {
        assert_eq!(sample_flavor("QCD_MuEnriched_bb"), Some(Flavor::BB));
        assert_eq!(sample_flavor("VJets_c"), Some(Flavor::C));
        assert_eq!(sample_flavor("DATA_BTagMu"), None);
        assert_eq!(sample_flavor("TTto4Q"), None);
        assert_eq!(Flavor::CC.process(), ProcessKind::C);
        assert_eq!(Flavor::BB.process(), ProcessKind::B);
    }
}
