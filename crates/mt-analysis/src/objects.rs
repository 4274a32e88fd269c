//! Preselected object collections of one event.

use std::collections::BTreeMap;

use mt_events::{Electron, Event, FatJet, Muon, SecondaryVertex};

/// Collections built by the object preselection, with the names used in
/// cuts and histogram axes.
#[derive(Debug, Clone, Default)]
pub struct Objects {
    /// `MuonGood`
    pub muons_good: Vec<Muon>,
    /// `ElectronGood`
    pub electrons_good: Vec<Electron>,
    /// `FatJetGood`
    pub fatjets_good: Vec<FatJet>,
    /// `SV` (masses replaced by the corrected mass once computed)
    pub svs: Vec<SecondaryVertex>,
    /// Muon-tagged subsets of `FatJetGood` by collection name
    /// (`FatJetGoodNMuon1`, `FatJetGoodNMuonSJ1`, ...)
    pub tagged_fatjets: BTreeMap<String, Vec<FatJet>>,
}

impl Objects {
    /// Number of objects in a collection, raw (`FatJet`, `Muon`, ...) or preselected.
    pub fn count(&self, event: &Event, coll: &str) -> Option<usize> {
        Some(match coll {
            "FatJetGood" => self.fatjets_good.len(),
            "MuonGood" => self.muons_good.len(),
            "ElectronGood" => self.electrons_good.len(),
            "SV" => self.svs.len(),
            other => match self.tagged_fatjets.get(other) {
                Some(jets) => jets.len(),
                None => return raw_count(event, other),
            },
        })
    }

    /// Event-level quantity by name: `n{coll}` counters, `nPV` and `rho`.
    pub fn event_field(&self, event: &Event, name: &str) -> Option<f64> {
        match name {
            "nPV" | "PV_npvsGood" => Some(event.n_pv_good as f64),
            "rho" | "fixedGridRhoFastjetAll" => Some(event.rho),
            _ => name.strip_prefix('n').and_then(|coll| self.count(event, coll)).map(|n| n as f64),
        }
    }
}

/// Size of a raw input collection.
pub fn raw_count(event: &Event, coll: &str) -> Option<usize> {
    Some(match coll {
        "FatJet" => event.fatjets.len(),
        "SubJet" => event.subjets.len(),
        "Muon" => event.muons.len(),
        "Electron" => event.electrons.len(),
        "SV" => event.svs.len(),
        "GenJetAK8" => event.genjets_ak8.len(),
        _ => return None,
    })
}

/// Transverse momenta of a raw or preselected collection.
pub fn collection_pts(event: &Event, objects: Option<&Objects>, coll: &str) -> Option<Vec<f64>> {
    let pts = match (coll, objects) {
        ("FatJet", _) => event.fatjets.iter().map(|o| o.pt).collect(),
        ("Muon", _) => event.muons.iter().map(|o| o.pt).collect(),
        ("Electron", _) => event.electrons.iter().map(|o| o.pt).collect(),
        ("SubJet", _) => event.subjets.iter().map(|o| o.pt).collect(),
        ("SV", None) => event.svs.iter().map(|o| o.pt).collect(),
        ("SV", Some(o)) => o.svs.iter().map(|s| s.pt).collect(),
        ("FatJetGood", Some(o)) => o.fatjets_good.iter().map(|j| j.pt).collect(),
        ("MuonGood", Some(o)) => o.muons_good.iter().map(|m| m.pt).collect(),
        ("ElectronGood", Some(o)) => o.electrons_good.iter().map(|e| e.pt).collect(),
        (tagged, Some(o)) => o.tagged_fatjets.get(tagged)?.iter().map(|j| j.pt).collect(),
        _ => return None,
    };
    Some(pts)
}

fn muon_field(m: &Muon, field: &str) -> Option<f64> {
    Some(match field {
        "pt" => m.pt,
        "eta" => m.eta,
        "phi" => m.phi,
        "mass" => m.mass,
        "charge" => m.charge as f64,
        "pfRelIso04_all" => m.pf_rel_iso04_all,
        other => return m.extra.get(other).copied(),
    })
}

fn electron_field(e: &Electron, field: &str) -> Option<f64> {
    Some(match field {
        "pt" => e.pt,
        "eta" => e.eta,
        "phi" => e.phi,
        "mass" => e.mass,
        "deltaEtaSC" => e.delta_eta_sc,
        "etaSC" => e.eta + e.delta_eta_sc,
        "pfRelIso03_all" => e.pf_rel_iso03_all,
        _ => return None,
    })
}

fn sv_field(s: &SecondaryVertex, field: &str) -> Option<f64> {
    Some(match field {
        "pt" => s.pt,
        "eta" => s.eta,
        "phi" => s.phi,
        "mass" => s.mass,
        "dxySig" => s.dxy_sig,
        "pAngle" => s.p_angle,
        other => return s.extra.get(other).copied(),
    })
}

fn collect<T>(items: &[T], get: impl Fn(&T) -> Option<f64>) -> Option<Vec<f64>> {
    items.iter().map(get).collect()
}

/// Values of `field` for every object of a collection.
///
/// `None` if the collection is unknown or an object lacks the field.
pub fn object_values(event: &Event, objects: Option<&Objects>, coll: &str, field: &str) -> Option<Vec<f64>> {
    match (coll, objects) {
        ("FatJet", _) => collect(&event.fatjets, |j| j.field(field)),
        ("Muon", _) => collect(&event.muons, |m| muon_field(m, field)),
        ("Electron", _) => collect(&event.electrons, |e| electron_field(e, field)),
        ("SV", None) => collect(&event.svs, |s| sv_field(s, field)),
        ("SV", Some(o)) => collect(&o.svs, |s| sv_field(s, field)),
        ("FatJetGood", Some(o)) => collect(&o.fatjets_good, |j| j.field(field)),
        ("MuonGood", Some(o)) => collect(&o.muons_good, |m| muon_field(m, field)),
        ("ElectronGood", Some(o)) => collect(&o.electrons_good, |e| electron_field(e, field)),
        (tagged, Some(o)) => collect(o.tagged_fatjets.get(tagged)?, |j| j.field(field)),
        _ => None,
    }
}
