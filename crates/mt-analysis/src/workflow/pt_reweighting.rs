//! Inputs of the (pt, eta, τ21) reweighting derivation.

use std::collections::{BTreeMap, BTreeSet};

use mt_core::{Error, Result};
use mt_events::{DatasetMetadata, Event, FatJet, Muon};

use crate::config::{AnalysisConfig, WorkflowKind};
use crate::matching::muon_matched_to_subjet;
use crate::objects::Objects;

use super::mutag::{MSD_MIN, PT_MIN};
use super::{EventContext, Workflow, fatjet_base};

/// Histograms the reweighting maps are derived from.
pub const REWEIGHTING_MAPS: [&str; 3] =
    ["FatJetGood_pt_eta", "FatJetGood_pt_eta_tau21", "FatJetGood_pt_eta_tau21_bintau05"];

/// Shape variations the derivation expects for simulation.
pub const EXPECTED_SHAPE_VARIATIONS: [&str; 2] = ["JES_Total_AK8PFPuppi", "JER_AK8PFPuppi"];

/// Muon-tagged subsets of `FatJetGood`: at least `nmu` or two matched
/// muons, or a matched muon in each subjet with the shared or the
/// non-overlapping subjet cone.
pub const MUON_TAGGED_COLLECTIONS: [&str; 4] =
    ["FatJetGoodNMuon1", "FatJetGoodNMuon2", "FatJetGoodNMuonSJ1", "FatJetGoodNMuonSJUnique1"];

const SUBJET_MUONS: &str = "nMuonGoodMatchedToSubJet";
const SUBJET_MUONS_UNIQUE: &str = "nMuonGoodMatchedUniquelyToSubJet";

/// Muon-tagged leading pair with ParticleNet mass-decorrelated ratios.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtReweighting;

fn ratio(num: Option<f64>, qcd: Option<f64>) -> f64 {
    match (num, qcd) {
        (Some(x), Some(q)) if x + q != 0.0 => x / (x + q),
        _ => 0.0,
    }
}

/// Attach `particleNetMD_Xbb_QCD` and `particleNetMD_Xcc_QCD`.
pub fn particlenet_ratios(jet: &mut FatJet) {
    let qcd = jet.field("particleNetMD_QCD");
    let xbb = ratio(jet.field("particleNetMD_Xbb"), qcd);
    let xcc = ratio(jet.field("particleNetMD_Xcc"), qcd);
    jet.extra.insert("particleNetMD_Xbb_QCD".into(), xbb);
    jet.extra.insert("particleNetMD_Xcc_QCD".into(), xcc);
}

/// Attach the number of subjets with a matched muon, for the shared cone
/// (`nMuonGoodMatchedToSubJet`) and the unique one
/// (`nMuonGoodMatchedUniquelyToSubJet`).
pub fn attach_subjet_muon_counts(event: &Event, muons: &[Muon], jets: &mut [FatJet]) {
    for (field, unique) in [(SUBJET_MUONS, false), (SUBJET_MUONS_UNIQUE, true)] {
        let leading = muon_matched_to_subjet(jets, &event.subjets, muons, 0, unique);
        let subleading = muon_matched_to_subjet(jets, &event.subjets, muons, 1, unique);
        for (jet, (a, b)) in jets.iter_mut().zip(leading.into_iter().zip(subleading)) {
            let n = usize::from(a.is_some()) + usize::from(b.is_some());
            jet.extra.insert(field.into(), n as f64);
        }
    }
}

fn subset(jets: &[FatJet], keep: impl Fn(&FatJet) -> bool) -> Vec<FatJet> {
    jets.iter().filter(|&j| keep(j)).cloned().collect()
}

/// Build [`MUON_TAGGED_COLLECTIONS`] from jets carrying matched muons and
/// subjet muon counts.
pub fn muon_tagged_collections(jets: &[FatJet], nmu: usize) -> BTreeMap<String, Vec<FatJet>> {
    let both_subjets = |j: &FatJet, field: &str| j.field(field).unwrap_or(0.0) >= 2.0;
    let [n1, n2, sj, sj_unique] = MUON_TAGGED_COLLECTIONS;
    BTreeMap::from([
        (n1.to_string(), subset(jets, |j| j.matched_muons.len() >= nmu)),
        (n2.to_string(), subset(jets, |j| j.matched_muons.len() >= 2)),
        (sj.to_string(), subset(jets, |j| both_subjets(j, SUBJET_MUONS))),
        (sj_unique.to_string(), subset(jets, |j| both_subjets(j, SUBJET_MUONS_UNIQUE))),
    ])
}

impl Workflow for PtReweighting {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::PtReweighting
    }

    fn validate(&self, cfg: &AnalysisConfig) -> Result<()> {
        let hists = cfg.histograms();
        for name in REWEIGHTING_MAPS {
            if !hists.contains_key(name) {
                return Err(Error::Config(format!("'{name}' is not present in the histogram keys")));
            }
        }
        Ok(())
    }

    fn load_metadata_extra(&self, cfg: &AnalysisConfig, metadata: &DatasetMetadata) -> Result<()> {
        if metadata.is_mc {
            check_shape_variations(&cfg.variations.shape)?;
        }
        Ok(())
    }

    fn apply_object_preselection(&self, event: &Event, ctx: &EventContext<'_>) -> Result<Option<Objects>> {
        let Some(mut objects) = fatjet_base::preselect_objects(event, ctx.params) else { return Ok(None) };
        fatjet_base::restrict_to_leading_pair(&mut objects.fatjets_good, PT_MIN, MSD_MIN);
        attach_subjet_muon_counts(event, &objects.muons_good, &mut objects.fatjets_good);
        let nmu = ctx.params.object_preselection.fatjet.nmu;
        objects.tagged_fatjets = muon_tagged_collections(&objects.fatjets_good, nmu);
        objects.fatjets_good.retain(|j| j.matched_muons.len() >= nmu);
        Ok(Some(objects))
    }

    fn define_common_variables_after_presel(
        &self,
        _event: &Event,
        objects: &mut Objects,
        _ctx: &EventContext<'_>,
    ) -> Result<()> {
        objects.fatjets_good.iter_mut().for_each(particlenet_ratios);
        objects.tagged_fatjets.values_mut().flatten().for_each(particlenet_ratios);
        Ok(())
    }
}

/// Check that simulation is processed with exactly the expected shape
/// variations.
pub fn check_shape_variations(configured: &[String]) -> Result<()> {
    let have: BTreeSet<&str> = configured.iter().map(String::as_str).collect();
    let want: BTreeSet<&str> = EXPECTED_SHAPE_VARIATIONS.into_iter().collect();
    if have != want {
        let missing: Vec<&str> = want.difference(&have).copied().collect();
        let extra: Vec<&str> = have.difference(&want).copied().collect();
        return Err(Error::Config(format!(
            "incorrect shape variations for the pt reweighting: missing {missing:?}, unexpected {extra:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Parameters, WorkflowOptions};
    use crate::jec::ShapeVariation;
    use crate::resources::Resources;
    use mt_events::SubJet;

    fn jet(pt: f64, phi: f64, subjets: (i32, i32)) -> FatJet {
        FatJet {
            pt,
            phi,
            mass: 100.0,
            msoftdrop: 80.0,
            jet_id: 6,
            tau1: 1.0,
            tau2: 0.3,
            subjet_idx1: subjets.0,
            subjet_idx2: subjets.1,
            ..Default::default()
        }
    }

    fn subjet(phi: f64) -> SubJet {
        SubJet { pt: 100.0, phi, ..Default::default() }
    }

    #[test]
    fn muon_tagged_collections_from_subjet_matching() {
        // one muon between the subjets of the leading jet: inside both 0.4
        // cones, but only inside the 0.15 cone of the first subjet
        let muon = Muon {
            pt: 8.0,
            phi: 0.1,
            pf_rel_iso04_all: 1.0,
            ids: [("looseId".to_string(), true)].into(),
            ..Default::default()
        };
        let ev = Event {
            fatjets: vec![jet(600.0, 0.0, (0, 1)), jet(500.0, 2.0, (2, 3))],
            subjets: vec![subjet(0.0), subjet(0.3), subjet(1.9), subjet(2.1)],
            muons: vec![muon],
            ..Default::default()
        };
        let md = DatasetMetadata { sample: "QCD_MuEnriched".into(), year: "2018".into(), is_mc: false, xsec: None, era: None };
        let params = Parameters::default();
        let options = WorkflowOptions::default();
        let resources = Resources::default();
        let var = ShapeVariation::Nominal;
        let ctx = EventContext { metadata: &md, params: &params, options: &options, resources: &resources, shape_variation: &var };

        let mut objects = PtReweighting.apply_object_preselection(&ev, &ctx).unwrap().unwrap();
        assert_eq!(objects.fatjets_good.len(), 1);
        let lead = &objects.fatjets_good[0];
        assert_eq!(lead.field("nMuonGoodMatchedToSubJet"), Some(2.0));
        assert_eq!(lead.field("nMuonGoodMatchedUniquelyToSubJet"), Some(1.0));

        let count = |name: &str| objects.event_field(&ev, name);
        assert_eq!(count("nFatJetGoodNMuon1"), Some(1.0));
        assert_eq!(count("nFatJetGoodNMuon2"), Some(0.0));
        assert_eq!(count("nFatJetGoodNMuonSJ1"), Some(1.0));
        assert_eq!(count("nFatJetGoodNMuonSJUnique1"), Some(0.0));

        PtReweighting.define_common_variables_after_presel(&ev, &mut objects, &ctx).unwrap();
        let sj = &objects.tagged_fatjets["FatJetGoodNMuonSJ1"][0];
        assert_eq!(sj.pos, Some(0));
        assert_eq!(sj.field("particleNetMD_Xbb_QCD"), Some(0.0));
    }

    #[test]
    fn ratios_and_shape_check() {
        let mut j = FatJet::default();
        j.extra.insert("particleNetMD_Xbb".into(), 0.6);
        j.extra.insert("particleNetMD_Xcc".into(), 0.1);
        j.extra.insert("particleNetMD_QCD".into(), 0.2);
        particlenet_ratios(&mut j);
        assert!((j.field("particleNetMD_Xbb_QCD").unwrap() - 0.75).abs() < 1e-12);
        assert!((j.field("particleNetMD_Xcc_QCD").unwrap() - 1.0 / 3.0).abs() < 1e-12);

        let mut bare = FatJet::default();
        particlenet_ratios(&mut bare);
        assert_eq!(bare.field("particleNetMD_Xbb_QCD"), Some(0.0));

        assert!(check_shape_variations(&["JER_AK8PFPuppi".into(), "JES_Total_AK8PFPuppi".into()]).is_ok());
        let err = check_shape_variations(&["JES_Total_AK8PFPuppi".into()]).unwrap_err().to_string();
        assert!(err.contains("JER_AK8PFPuppi"));
    }
}
