//! Object preselection.

mod jets;
mod leptons;

pub use jets::{FatJetCuts, fatjet_selection};
pub use leptons::{LeptonCuts, LeptonKind, lepton_selection_noniso};
