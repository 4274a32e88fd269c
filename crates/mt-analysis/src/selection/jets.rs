use mt_events::{Candidate, FatJet};
use serde::{Deserialize, Serialize};

fn default_nmu() -> usize {
    1
}

/// Fat-jet preselection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatJetCuts {
    /// Minimum pt (GeV)
    pub pt: f64,
    /// Maximum |η|
    pub eta: f64,
    /// Minimum jet identification value
    #[serde(rename = "jetId")]
    pub jet_id: i32,
    /// Minimum soft-drop mass (GeV)
    pub msd: f64,
    /// Lepton-cleaning cone; no cleaning when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr: Option<f64>,
    /// Muons required inside a jet by the muon-tagged workflows
    #[serde(default = "default_nmu")]
    pub nmu: usize,
}

/// Select fat jets passing `cuts`, optionally cleaned against `leptons`.
///
/// Returns the selected jets (input order) and the per-input-jet mask.
pub fn fatjet_selection<L: Candidate>(jets: &[FatJet], cuts: &FatJetCuts, leptons: &[L]) -> (Vec<FatJet>, Vec<bool>) {
    let mask: Vec<bool> = jets
        .iter()
        .map(|j| {
            let kin = j.pt > cuts.pt && j.eta.abs() < cuts.eta && j.jet_id >= cuts.jet_id && j.msoftdrop > cuts.msd;
            let clean = match cuts.dr {
                Some(dr) => leptons.iter().all(|l| j.delta_r(l) > dr),
                None => true,
            };
            kin && clean
        })
        .collect();
    let selected = jets.iter().zip(&mask).filter(|(_, m)| **m).map(|(j, _)| j.clone()).collect();
    (selected, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_events::Muon;

    fn jet(pt: f64, eta: f64, jet_id: i32, msd: f64) -> FatJet {
        FatJet { pt, eta, phi: 0.0, jet_id, msoftdrop: msd, ..Default::default() }
    }

    #[test]
    fn thresholds_are_strict() {
        let cuts = FatJetCuts { pt: 250.0, eta: 2.4, jet_id: 2, msd: 20.0, dr: None, nmu: 1 };
        let jets = vec![
            jet(300.0, 0.1, 2, 30.0),
            jet(250.0, 0.1, 6, 30.0),
            jet(300.0, 2.5, 6, 30.0),
            jet(300.0, 0.1, 0, 30.0),
            jet(300.0, 0.1, 6, 20.0),
        ];
        let (sel, mask) = fatjet_selection::<Muon>(&jets, &cuts, &[]);
        assert_eq!(mask, vec![true, false, false, false, false]);
        assert_eq!(sel.len(), 1);
    }

    #[test]
    fn lepton_cleaning() {
        let cuts = FatJetCuts { pt: 200.0, eta: 2.4, jet_id: 2, msd: 0.0, dr: Some(0.8), nmu: 1 };
        let jets = vec![jet(300.0, 0.0, 2, 30.0), jet(300.0, 2.0, 2, 30.0)];
        let mu = Muon { pt: 10.0, eta: 0.3, phi: 0.0, ..Default::default() };
        let (_, mask) = fatjet_selection(&jets, &cuts, &[mu]);
        assert_eq!(mask, vec![false, true]);
    }
}
