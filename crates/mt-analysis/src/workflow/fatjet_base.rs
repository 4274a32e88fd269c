//! Fat-jet base processing shared by all workflows.

use mt_events::{Event, FatJet};

use crate::config::{Parameters, WorkflowKind};
use crate::matching::{muons_matched_to_fatjet, sv_matched_to_fatjet};
use crate::objects::Objects;
use crate::selection::{LeptonKind, fatjet_selection, lepton_selection_noniso};
use crate::sv::{assign_sv_observables, corrected_mass};

use super::Workflow;

/// Fat-jet preselection with SV observables.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatjetBase;

impl Workflow for FatjetBase {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::FatjetBase
    }
}

/// Keep the uncalibrated soft-drop mass of every fat jet.
pub fn store_raw_msoftdrop(event: &mut Event) {
    for j in &mut event.fatjets {
        j.msoftdrop_raw = Some(j.msoftdrop);
    }
}

/// Take hadron counts from the matched generator jet when the fat jets do
/// not carry them.
///
/// If any fat jet lacks a count, only fat jets with a valid generator match
/// are kept and their missing counts are copied from the `GenJetAK8`.
pub fn attach_hadron_counts(event: &mut Event) {
    if event.fatjets.iter().all(|j| j.hadron_counts().is_some()) {
        return;
    }
    let n_gen = event.genjets_ak8.len();
    let before = event.fatjets.len();
    event.fatjets.retain(|j| j.gen_jet_idx >= 0 && (j.gen_jet_idx as usize) < n_gen);
    if event.fatjets.len() < before {
        tracing::trace!(event = event.event, dropped = before - event.fatjets.len(), "fat jets without generator match");
    }
    for j in &mut event.fatjets {
        let g = &event.genjets_ak8[j.gen_jet_idx as usize];
        if j.n_b_hadrons.is_none() {
            j.n_b_hadrons = g.n_b_hadrons;
        }
        if j.n_c_hadrons.is_none() {
            j.n_c_hadrons = g.n_c_hadrons;
        }
    }
}

/// `MuonGood`, `ElectronGood` and `FatJetGood` with matched muons and τ21.
///
/// Returns `None` for events without any `FatJetGood`.
pub fn preselect_objects(event: &Event, params: &Parameters) -> Option<Objects> {
    let presel = &params.object_preselection;
    let muons_good: Vec<_> = lepton_selection_noniso(event, LeptonKind::Muon, &presel.muon)
        .into_iter()
        .map(|i| event.muons[i].clone())
        .collect();
    let electrons_good: Vec<_> = lepton_selection_noniso(event, LeptonKind::Electron, &presel.electron)
        .into_iter()
        .map(|i| event.electrons[i].clone())
        .collect();
    let (mut fatjets_good, _) = fatjet_selection(&event.fatjets, &presel.fatjet, &muons_good);
    if fatjets_good.is_empty() {
        return None;
    }
    let matched = muons_matched_to_fatjet(&fatjets_good, &muons_good);
    for (j, m) in fatjets_good.iter_mut().zip(matched) {
        j.matched_muons = m.into_iter().map(|m| m.index).collect();
        j.tau21 = j.tau2 / j.tau1;
    }
    Some(Objects { muons_good, electrons_good, fatjets_good, svs: event.svs.clone(), ..Default::default() })
}

/// Replace SV masses by the corrected mass and attach the SV observables
/// of the matched vertices to each `FatJetGood`.
pub fn define_sv_variables(objects: &mut Objects) {
    for s in &mut objects.svs {
        s.mass = corrected_mass(s);
    }
    let matched = sv_matched_to_fatjet(&objects.fatjets_good, &objects.svs);
    for (j, m) in objects.fatjets_good.iter_mut().zip(matched) {
        assign_sv_observables(j, &objects.svs, m.into_iter().map(|m| m.index).collect());
    }
}

/// Keep jets with pt > `pt` and msoftdrop > `msd`, at most the first two,
/// and label them with their position.
pub fn restrict_to_leading_pair(jets: &mut Vec<FatJet>, pt: f64, msd: f64) {
    jets.retain(|j| j.pt > pt && j.msoftdrop > msd);
    jets.truncate(2);
    for (i, j) in jets.iter_mut().enumerate() {
        j.pos = Some(i);
    }
}
