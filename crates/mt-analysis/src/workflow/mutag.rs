//! Muon-tagged fat-jet workflows.

use std::collections::BTreeMap;

use mt_core::{Error, Result};
use mt_events::Event;

use crate::config::{AnalysisConfig, WorkflowKind};
use crate::objects::Objects;
use crate::weights::{JetWeights, ptetatau21_jet_weights};

use super::{CustomWeight, CustomWeights, EventContext, Workflow, fatjet_base};

/// Minimum pt of the analysed jets.
pub const PT_MIN: f64 = 350.0;
/// Minimum soft-drop mass of the analysed jets.
pub const MSD_MIN: f64 = 40.0;

/// Leading two pt>350, msd>40 fat jets with the per-jet (pt, eta, τ21)
/// reweighting on the configured histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mutag;

/// [`Mutag`] restricted to jets with enough matched muons.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutagOneMuAk8;

fn validate_reweigh_buckets(cfg: &AnalysisConfig) -> Result<()> {
    let buckets = cfg.workflow_options.histograms_to_reweigh.as_ref().ok_or_else(|| {
        Error::Config("workflow_options.histograms_to_reweigh is required by the mutag workflows".into())
    })?;
    let hists = cfg.histograms();
    for (bucket, names) in &buckets.by_pos {
        if !matches!(bucket.as_str(), "all" | "1" | "2") {
            return Err(Error::Config(format!("histograms_to_reweigh: unknown position bucket '{bucket}'")));
        }
        for name in names {
            let conf = hists
                .get(name)
                .ok_or_else(|| Error::Config(format!("histograms_to_reweigh: unknown histogram '{name}'")))?;
            if bucket == "all" && !conf.axes.iter().any(|a| a.coll == "FatJetGood") {
                return Err(Error::Config(format!(
                    "histograms_to_reweigh: '{name}' has no FatJetGood axis for per-jet weights"
                )));
            }
        }
    }
    Ok(())
}

fn mutag_objects(event: &Event, ctx: &EventContext<'_>) -> Option<Objects> {
    let mut objects = fatjet_base::preselect_objects(event, ctx.params)?;
    fatjet_base::restrict_to_leading_pair(&mut objects.fatjets_good, PT_MIN, MSD_MIN);
    Some(objects)
}

/// Per-event weight of the jet at `pos`, 1 if there is none.
fn weight_at_pos(objects: &Objects, values: &[f64], pos: usize) -> f64 {
    objects
        .fatjets_good
        .iter()
        .zip(values)
        .find(|(j, _)| j.pos == Some(pos))
        .map(|(_, w)| *w)
        .unwrap_or(1.0)
}

fn custom_weights(objects: &Objects, ctx: &EventContext<'_>, weights: &JetWeights) -> Result<CustomWeights> {
    let Some(buckets) = &ctx.options.histograms_to_reweigh else { return Ok(CustomWeights::new()) };
    let mut out = CustomWeights::new();
    for (bucket, names) in &buckets.by_pos {
        let weight = match bucket.as_str() {
            "all" => CustomWeight::Jets(
                weights.labelled().into_iter().map(|(label, w)| (label, w.to_vec())).collect(),
            ),
            "1" | "2" => {
                let pos = if bucket == "1" { 0 } else { 1 };
                CustomWeight::Event(
                    weights
                        .labelled()
                        .into_iter()
                        .map(|(label, w)| (label, weight_at_pos(objects, w, pos)))
                        .collect::<BTreeMap<_, _>>(),
                )
            }
            other => return Err(Error::Config(format!("histograms_to_reweigh: unknown position bucket '{other}'"))),
        };
        for name in names {
            out.insert(name.clone(), weight.clone());
        }
    }
    Ok(out)
}

fn reweighting(objects: &Objects, ctx: &EventContext<'_>) -> Result<CustomWeights> {
    let sample = &ctx.metadata.sample;
    if !ctx.is_mc() || !ctx.options.reweighting_samples.contains(sample) {
        return Ok(CustomWeights::new());
    }
    let label = ctx.shape_variation.label();
    match ptetatau21_jet_weights(ctx.resources, sample, &ctx.metadata.year, &label, objects)? {
        Some(w) => custom_weights(objects, ctx, &w),
        None => Ok(CustomWeights::new()),
    }
}

impl Workflow for Mutag {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Mutag
    }

    fn validate(&self, cfg: &AnalysisConfig) -> Result<()> {
        validate_reweigh_buckets(cfg)
    }

    fn apply_object_preselection(&self, event: &Event, ctx: &EventContext<'_>) -> Result<Option<Objects>> {
        Ok(mutag_objects(event, ctx))
    }

    fn process_extra_after_presel(&self, _event: &Event, objects: &Objects, ctx: &EventContext<'_>) -> Result<CustomWeights> {
        reweighting(objects, ctx)
    }
}

impl Workflow for MutagOneMuAk8 {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::MutagOneMuAk8
    }

    fn validate(&self, cfg: &AnalysisConfig) -> Result<()> {
        validate_reweigh_buckets(cfg)
    }

    fn apply_object_preselection(&self, event: &Event, ctx: &EventContext<'_>) -> Result<Option<Objects>> {
        let Some(mut objects) = mutag_objects(event, ctx) else { return Ok(None) };
        let nmu = ctx.params.object_preselection.fatjet.nmu;
        // positions are assigned before the muon tagging
        objects.fatjets_good.retain(|j| j.matched_muons.len() >= nmu);
        Ok(Some(objects))
    }

    fn process_extra_after_presel(&self, _event: &Event, objects: &Objects, ctx: &EventContext<'_>) -> Result<CustomWeights> {
        reweighting(objects, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistogramsToReweigh, Parameters, WorkflowOptions};
    use crate::jec::ShapeVariation;
    use crate::resources::Resources;
    use mt_events::{DatasetMetadata, FatJet, Muon};

    fn metadata() -> DatasetMetadata {
        DatasetMetadata { sample: "QCD_MuEnriched".into(), year: "2018".into(), is_mc: true, xsec: Some(1.0), era: None }
    }

    fn jet(pt: f64, phi: f64) -> FatJet {
        FatJet { pt, phi, mass: 100.0, msoftdrop: 80.0, jet_id: 6, tau1: 1.0, tau2: 0.3, ..Default::default() }
    }

    fn event() -> Event {
        let muon = Muon {
            pt: 8.0,
            phi: 1.0,
            pf_rel_iso04_all: 1.0,
            ids: [("looseId".to_string(), true)].into(),
            ..Default::default()
        };
        Event { fatjets: vec![jet(600.0, 0.0), jet(500.0, 1.0), jet(400.0, 2.5), jet(300.0, -2.0)], muons: vec![muon], ..Default::default() }
    }

    #[test]
    fn one_muon_tagging_keeps_positions() {
        let md = metadata();
        let params = Parameters::default();
        let options = WorkflowOptions::default();
        let resources = Resources::default();
        let var = ShapeVariation::Nominal;
        let ctx = EventContext { metadata: &md, params: &params, options: &options, resources: &resources, shape_variation: &var };
        let ev = event();

        let all = Mutag.apply_object_preselection(&ev, &ctx).unwrap().unwrap();
        assert_eq!(all.fatjets_good.iter().map(|j| j.pt).collect::<Vec<_>>(), vec![600.0, 500.0]);

        let tagged = MutagOneMuAk8.apply_object_preselection(&ev, &ctx).unwrap().unwrap();
        assert_eq!(tagged.fatjets_good.len(), 1);
        assert_eq!(tagged.fatjets_good[0].pos, Some(1));

        // no map loaded: no custom weights
        assert!(MutagOneMuAk8.process_extra_after_presel(&ev, &tagged, &ctx).unwrap().is_empty());
    }

    #[test]
    fn position_buckets() {
        let objects = Objects {
            fatjets_good: vec![FatJet { pos: Some(1), ..Default::default() }],
            ..Default::default()
        };
        let weights = JetWeights { nominal: vec![1.5], up: vec![1.7], down: vec![1.3] };
        let md = metadata();
        let params = Parameters::default();
        let options = WorkflowOptions {
            histograms_to_reweigh: Some(HistogramsToReweigh {
                by_pos: BTreeMap::from([
                    ("all".to_string(), vec!["FatJetGood_pt".to_string()]),
                    ("1".to_string(), vec!["FatJetGood_pt_1".to_string()]),
                    ("2".to_string(), vec!["FatJetGood_pt_2".to_string()]),
                ]),
            }),
            ..Default::default()
        };
        let resources = Resources::default();
        let var = ShapeVariation::Nominal;
        let ctx = EventContext { metadata: &md, params: &params, options: &options, resources: &resources, shape_variation: &var };
        let cw = custom_weights(&objects, &ctx, &weights).unwrap();
        assert_eq!(cw["FatJetGood_pt"].get("sf_ptetatau21_reweightingUp", Some(0)), 1.7);
        assert_eq!(cw["FatJetGood_pt_1"].get("nominal", None), 1.0);
        assert_eq!(cw["FatJetGood_pt_2"].get("nominal", None), 1.5);
        assert_eq!(cw["FatJetGood_pt_2"].get("sf_ptetatau21_reweightingDown", None), 1.3);
    }
}
