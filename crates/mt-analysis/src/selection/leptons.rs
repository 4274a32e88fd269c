use mt_events::Event;
use serde::{Deserialize, Serialize};

/// Electron supercluster gap in |η|.
const ECAL_GAP: (f64, f64) = (1.4442, 1.5660);

/// Lepton flavour to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeptonKind {
    /// `Muon` collection
    Muon,
    /// `Electron` collection
    Electron,
}

/// Kinematic, isolation and identification thresholds for one lepton flavour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeptonCuts {
    /// Minimum pt (GeV)
    pub pt: f64,
    /// Maximum |η|
    pub eta: f64,
    /// Isolation threshold
    pub iso: f64,
    /// Identification flag name
    pub id: String,
}

/// Indices of leptons passing the non-isolated selection.
///
/// Muons are required to be *non*-isolated (`pfRelIso04_all > iso`), as
/// expected for muons from semileptonic heavy-flavour decays inside jets.
/// Electrons keep the usual isolation requirement and veto the barrel/endcap
/// transition region.
pub fn lepton_selection_noniso(event: &Event, kind: LeptonKind, cuts: &LeptonCuts) -> Vec<usize> {
    match kind {
        LeptonKind::Muon => event
            .muons
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.eta.abs() < cuts.eta && m.pt > cuts.pt && m.pf_rel_iso04_all > cuts.iso && m.passes_id(&cuts.id)
            })
            .map(|(i, _)| i)
            .collect(),
        LeptonKind::Electron => event
            .electrons
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                let eta_sc = e.abs_eta_sc();
                let in_gap = eta_sc >= ECAL_GAP.0 && eta_sc <= ECAL_GAP.1;
                e.eta.abs() < cuts.eta
                    && e.pt > cuts.pt
                    && !in_gap
                    && e.pf_rel_iso03_all < cuts.iso
                    && e.passes_id(&cuts.id)
            })
            .map(|(i, _)| i)
            .collect(),
    }
}
