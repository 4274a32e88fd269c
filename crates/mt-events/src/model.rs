//! Event and physics-object records.
//!
//! Field names serialize with their NanoAOD spelling (`msoftdrop`,
//! `rawFactor`, `genJetAK8Idx`, ...), so JSON fixtures read like flattened
//! NanoAOD rows. Fields marked "derived" are not part of the input and are
//! filled by the analysis workflows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kinematics::Candidate;

fn no_index() -> i32 {
    -1
}

/// Large-radius (AK8) jet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FatJet {
    /// Transverse momentum (GeV)
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Mass (GeV)
    pub mass: f64,
    /// Soft-drop mass (GeV)
    #[serde(default)]
    pub msoftdrop: f64,
    /// `1 - raw/corrected` momentum factor
    #[serde(default, rename = "rawFactor")]
    pub raw_factor: f64,
    /// Catchment area
    #[serde(default)]
    pub area: f64,
    /// N-subjettiness τ1
    #[serde(default)]
    pub tau1: f64,
    /// N-subjettiness τ2
    #[serde(default)]
    pub tau2: f64,
    /// N-subjettiness τ3
    #[serde(default)]
    pub tau3: f64,
    /// Jet identification bitmask
    #[serde(default, rename = "jetId")]
    pub jet_id: i32,
    /// Index of the first soft-drop subjet (-1 if none)
    #[serde(default = "no_index", rename = "subJetIdx1")]
    pub subjet_idx1: i32,
    /// Index of the second soft-drop subjet (-1 if none)
    #[serde(default = "no_index", rename = "subJetIdx2")]
    pub subjet_idx2: i32,
    /// Index of the matched AK8 generator jet (-1 if none)
    #[serde(default = "no_index", rename = "genJetAK8Idx")]
    pub gen_jet_idx: i32,
    /// Number of b hadrons in the jet (simulation)
    #[serde(default, rename = "nBHadrons", skip_serializing_if = "Option::is_none")]
    pub n_b_hadrons: Option<u32>,
    /// Number of c hadrons in the jet (simulation)
    #[serde(default, rename = "nCHadrons", skip_serializing_if = "Option::is_none")]
    pub n_c_hadrons: Option<u32>,
    /// Tagger scores and any other per-jet floats
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,

    /// Derived: soft-drop mass before any correction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msoftdrop_raw: Option<f64>,
    /// Derived: uncorrected pt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pt_raw: Option<f64>,
    /// Derived: uncorrected mass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_raw: Option<f64>,
    /// Derived: τ2/τ1
    #[serde(default)]
    pub tau21: f64,
    /// Derived: position label (0 leading, 1 subleading)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<usize>,
    /// Derived: indices into the selected muons matched to this jet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_muons: Vec<usize>,
    /// Derived: indices into the secondary vertices matched to this jet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_svs: Vec<usize>,
    /// Derived: mass of the summed matched SV four-vectors
    #[serde(default)]
    pub sumcorr_sv_mass: f64,
    /// Derived: log of `sumcorr_sv_mass` (-5 when zero)
    #[serde(default)]
    pub logsumcorr_sv_mass: f64,
    /// Derived: corrected mass of the most displaced matched SV
    #[serde(default)]
    pub sv1_mass: f64,
    /// Derived: log of `sv1_mass` (-5 when zero)
    #[serde(default)]
    pub logsv1_mass: f64,
}

impl FatJet {
    /// Hadron counts, if both are known.
    pub fn hadron_counts(&self) -> Option<(u32, u32)> {
        Some((self.n_b_hadrons?, self.n_c_hadrons?))
    }

    /// Value of a named per-jet field.
    ///
    /// Input fields use their NanoAOD names, derived fields the names they
    /// get in histograms (`nMuonGoodMatchedToFatJetGood`, `logsumcorrSVmass`,
    /// ...). Anything else is looked up in [`extra`](Self::extra).
    pub fn field(&self, name: &str) -> Option<f64> {
        let v = match name {
            "pt" => self.pt,
            "eta" => self.eta,
            "phi" => self.phi,
            "mass" => self.mass,
            "msoftdrop" => self.msoftdrop,
            "rawFactor" => self.raw_factor,
            "area" => self.area,
            "tau1" => self.tau1,
            "tau2" => self.tau2,
            "tau3" => self.tau3,
            "tau21" => self.tau21,
            "jetId" => self.jet_id as f64,
            "nBHadrons" => self.n_b_hadrons? as f64,
            "nCHadrons" => self.n_c_hadrons? as f64,
            "msoftdrop_raw" => self.msoftdrop_raw?,
            "pt_raw" => self.pt_raw?,
            "mass_raw" => self.mass_raw?,
            "pos" => self.pos? as f64,
            "nMuonGoodMatchedToFatJetGood" => self.matched_muons.len() as f64,
            "nSVMatchedToFatJetGood" => self.matched_svs.len() as f64,
            "sumcorrSVmass" => self.sumcorr_sv_mass,
            "logsumcorrSVmass" => self.logsumcorr_sv_mass,
            "sv1mass" => self.sv1_mass,
            "logsv1mass" => self.logsv1_mass,
            other => return self.extra.get(other).copied(),
        };
        Some(v)
    }

    /// Indices of the two soft-drop subjets that exist in `n_subjets`.
    pub fn subjet_indices(&self, n_subjets: usize) -> [Option<usize>; 2] {
        let valid = |i: i32| (i >= 0 && (i as usize) < n_subjets).then_some(i as usize);
        [valid(self.subjet_idx1), valid(self.subjet_idx2)]
    }
}

/// Soft-drop subjet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubJet {
    /// Transverse momentum
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Mass
    #[serde(default)]
    pub mass: f64,
    /// Other per-subjet floats
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

/// Reconstructed muon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Muon {
    /// Transverse momentum
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Mass
    #[serde(default)]
    pub mass: f64,
    /// Electric charge
    #[serde(default)]
    pub charge: i32,
    /// Relative PF isolation, ΔR < 0.4
    #[serde(default, rename = "pfRelIso04_all")]
    pub pf_rel_iso04_all: f64,
    /// Identification flags (`looseId`, `mediumId`, `tightId`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: BTreeMap<String, bool>,
    /// Other per-muon floats
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl Muon {
    /// Whether the named identification flag is set.
    pub fn passes_id(&self, id: &str) -> bool {
        self.ids.get(id).copied().unwrap_or(false)
    }
}

/// Reconstructed electron.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Electron {
    /// Transverse momentum
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Mass
    #[serde(default)]
    pub mass: f64,
    /// Supercluster η minus electron η
    #[serde(default, rename = "deltaEtaSC")]
    pub delta_eta_sc: f64,
    /// Relative PF isolation, ΔR < 0.3
    #[serde(default, rename = "pfRelIso03_all")]
    pub pf_rel_iso03_all: f64,
    /// Identification flags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ids: BTreeMap<String, bool>,
}

impl Electron {
    /// Whether the named identification flag is set.
    pub fn passes_id(&self, id: &str) -> bool {
        self.ids.get(id).copied().unwrap_or(false)
    }

    /// Supercluster pseudorapidity magnitude.
    pub fn abs_eta_sc(&self) -> f64 {
        (self.delta_eta_sc + self.eta).abs()
    }
}

/// Secondary vertex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryVertex {
    /// Transverse momentum
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Vertex mass (replaced by the corrected mass after preselection)
    pub mass: f64,
    /// Transverse flight distance significance
    #[serde(default, rename = "dxySig")]
    pub dxy_sig: f64,
    /// Angle between flight direction and vertex momentum
    #[serde(default, rename = "pAngle")]
    pub p_angle: f64,
    /// Other per-vertex floats
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

/// Generator-level AK8 jet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenJet {
    /// Transverse momentum
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuth
    pub phi: f64,
    /// Mass
    #[serde(default)]
    pub mass: f64,
    /// Number of b hadrons
    #[serde(default, rename = "nBHadrons", skip_serializing_if = "Option::is_none")]
    pub n_b_hadrons: Option<u32>,
    /// Number of c hadrons
    #[serde(default, rename = "nCHadrons", skip_serializing_if = "Option::is_none")]
    pub n_c_hadrons: Option<u32>,
}

macro_rules! impl_candidate {
    ($($t:ty),*) => {
        $(impl Candidate for $t {
            fn pt(&self) -> f64 { self.pt }
            fn eta(&self) -> f64 { self.eta }
            fn phi(&self) -> f64 { self.phi }
            fn mass(&self) -> f64 { self.mass }
        })*
    };
}

impl_candidate!(FatJet, SubJet, Muon, Electron, SecondaryVertex, GenJet);

/// One collision event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    /// Run number
    pub run: u32,
    /// Luminosity section
    #[serde(rename = "luminosityBlock")]
    pub luminosity_block: u32,
    /// Event number
    pub event: u64,
    /// Median energy density
    #[serde(default, rename = "fixedGridRhoFastjetAll")]
    pub rho: f64,
    /// Number of good primary vertices
    #[serde(default, rename = "PV_npvsGood")]
    pub n_pv_good: u32,
    /// Generator weight (simulation only)
    #[serde(default, rename = "genWeight", skip_serializing_if = "Option::is_none")]
    pub gen_weight: Option<f64>,
    /// True number of pileup interactions (simulation only)
    #[serde(default, rename = "Pileup_nTrueInt", skip_serializing_if = "Option::is_none")]
    pub n_true_int: Option<f64>,
    /// Event filter flags, without the `Flag_` prefix
    #[serde(default, rename = "Flag")]
    pub flags: BTreeMap<String, bool>,
    /// Trigger decisions, without the `HLT_` prefix
    #[serde(default, rename = "HLT")]
    pub hlt: BTreeMap<String, bool>,
    /// AK8 jets
    #[serde(default, rename = "FatJet")]
    pub fatjets: Vec<FatJet>,
    /// Soft-drop subjets
    #[serde(default, rename = "SubJet")]
    pub subjets: Vec<SubJet>,
    /// Muons
    #[serde(default, rename = "Muon")]
    pub muons: Vec<Muon>,
    /// Electrons
    #[serde(default, rename = "Electron")]
    pub electrons: Vec<Electron>,
    /// Secondary vertices
    #[serde(default, rename = "SV")]
    pub svs: Vec<SecondaryVertex>,
    /// Generator AK8 jets
    #[serde(default, rename = "GenJetAK8")]
    pub genjets_ak8: Vec<GenJet>,
}

impl Event {
    /// Whether the trigger path fired; absent paths count as not fired.
    pub fn fired(&self, path: &str) -> bool {
        let bare = path.strip_prefix("HLT_").unwrap_or(path);
        self.hlt.get(bare).copied().unwrap_or(false)
    }

    /// Flag value, `None` if the flag is not stored.
    pub fn flag(&self, name: &str) -> Option<bool> {
        let bare = name.strip_prefix("Flag_").unwrap_or(name);
        self.flags.get(bare).copied()
    }

    /// Whether this event is simulation.
    pub fn is_mc(&self) -> bool {
        self.gen_weight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_nanoaod_names() {
        let json = r#"{
            "run": 1, "luminosityBlock": 7, "event": 1234, "fixedGridRhoFastjetAll": 21.5,
            "PV_npvsGood": 30, "genWeight": 0.8,
            "HLT": {"BTagMu_AK8Jet300_Mu5": true}, "Flag": {"goodVertices": true},
            "FatJet": [{"pt": 420.0, "eta": 0.4, "phi": 1.0, "mass": 95.0, "msoftdrop": 88.0,
                        "rawFactor": 0.05, "jetId": 6, "subJetIdx1": 0, "genJetAK8Idx": 0,
                        "nBHadrons": 1, "nCHadrons": 0, "extra": {"particleNetMD_Xbb": 0.7}}],
            "SV": [{"pt": 12.0, "eta": 0.5, "phi": 1.1, "mass": 1.8, "dxySig": 14.0, "pAngle": 0.02}]
        }"#;
        let e: Event = serde_json::from_str(json).unwrap();
        assert!(e.fired("HLT_BTagMu_AK8Jet300_Mu5"));
        assert!(e.fired("BTagMu_AK8Jet300_Mu5"));
        assert!(!e.fired("BTagMu_AK4Jet300_Mu5"));
        assert_eq!(e.flag("Flag_goodVertices"), Some(true));
        assert_eq!(e.flag("eeBadScFilter"), None);
        assert!(e.is_mc());

        let j = &e.fatjets[0];
        assert_eq!(j.jet_id, 6);
        assert_eq!(j.subjet_indices(1), [Some(0), None]);
        assert_eq!(j.gen_jet_idx, 0);
        assert_eq!(j.hadron_counts(), Some((1, 0)));
        assert_eq!(j.field("particleNetMD_Xbb"), Some(0.7));
        assert_eq!(j.field("pos"), None);
        assert_eq!(e.svs[0].dxy_sig, 14.0);
    }
}
