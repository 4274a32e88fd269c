//! Per-chunk event processing.
//!
//! For one chunk of one dataset the processor:
//!
//! 1. books Σ genWeight and the `initial` cutflow, applies the skim and the
//!    workflow's after-skim hook;
//! 2. for the nominal calibration and, in simulation, every shape variation:
//!    recalibrates the fat jets (JER seeded with the chunk's first event
//!    number), builds the preselected objects, applies the preselection
//!    cuts, computes variables and weights, and fills every histogram in
//!    every (subsample, category) the event passes.
//!
//! Weight variations are filled in the nominal calibration only; shape
//! variations are filled with the nominal weights.

use std::collections::BTreeMap;
use std::path::Path;

use mt_core::{Error, Result};
use mt_events::{Dataset, Event};

use crate::config::AnalysisConfig;
use crate::cuts::{Cut, CutContext, evaluate_cuts};
use crate::hist::{Hist, HistConf};
use crate::jec::{ShapeVariation, chunk_rng, chunk_seed_key};
use crate::objects::{Objects, object_values};
use crate::output::Output;
use crate::resources::Resources;
use crate::weights::{EventWeights, WeightContext, WeightKind, compute_event_weights};
use crate::workflow::{CustomWeight, EventContext, Workflow, workflow_for};

/// Cutflow step after the skim-less input.
pub const CUTFLOW_INITIAL: &str = "initial";
/// Cutflow step after the skim.
pub const CUTFLOW_SKIM: &str = "skim";
/// Cutflow step after the preselection.
pub const CUTFLOW_PRESEL: &str = "presel";

/// Location of a chunk inside its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkId {
    /// Event file
    pub file: String,
    /// First entry
    pub start: usize,
    /// One past the last entry
    pub stop: usize,
}

impl ChunkId {
    /// Chunk `[start, stop)` of `file`.
    pub fn new(file: &Path, start: usize, stop: usize) -> Self {
        let file = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Self { file, start, stop }
    }
}

struct HistPlan {
    name: String,
    conf: HistConf,
    template: Hist,
    /// Object collection of the non-event axes (`None`: event-level histogram)
    coll: Option<String>,
}

/// Coordinates of every fillable object of one histogram in one event.
struct HistRows {
    /// (object index, coordinates); index `None` for event-level rows
    rows: Vec<(Option<usize>, Vec<f64>)>,
}

/// Category and subsample cut lists combined.
struct Region {
    subsample: String,
    category: String,
    cuts: Vec<Cut>,
}

/// Processes chunks of events into partial [`Output`]s.
pub struct Processor<'a> {
    cfg: &'a AnalysisConfig,
    resources: &'a Resources,
    workflow: Box<dyn Workflow>,
    hists: Vec<HistPlan>,
    varied_weights: Vec<WeightKind>,
    shape_variations: Vec<ShapeVariation>,
}

impl<'a> Processor<'a> {
    /// Check the configuration against the workflow and prepare the
    /// histogram plans.
    pub fn new(cfg: &'a AnalysisConfig, resources: &'a Resources) -> Result<Self> {
        let workflow = workflow_for(cfg.workflow);
        workflow.validate(cfg)?;

        let mut varied_weights = Vec::new();
        for name in &cfg.variations.weights {
            let kind: WeightKind = name.parse()?;
            if !kind.has_variations() {
                return Err(Error::Config(format!("weight '{kind}' has no Up/Down variations")));
            }
            varied_weights.push(kind);
        }
        for name in cfg.weights.common.iter().chain(cfg.weights.by_sample.values().flatten()) {
            name.parse::<WeightKind>()?;
        }

        let mut shape_variations = Vec::new();
        for name in &cfg.variations.shape {
            shape_variations.extend(ShapeVariation::pair(name)?);
        }

        let mut hists = Vec::new();
        for (name, conf) in cfg.histograms() {
            let mut colls = conf.axes.iter().filter(|a| !a.is_event_level()).map(|a| a.coll.as_str());
            let coll = colls.next().map(str::to_string);
            if let Some(c) = &coll
                && colls.any(|other| other != c)
            {
                return Err(Error::Config(format!("histogram '{name}' mixes axes of different collections")));
            }
            let template = conf.build();
            hists.push(HistPlan { name, conf, template, coll });
        }

        Ok(Self { cfg, resources, workflow, hists, varied_weights, shape_variations })
    }

    /// The workflow in use.
    pub fn workflow(&self) -> &dyn Workflow {
        self.workflow.as_ref()
    }

    fn regions(&self, sample: &str) -> Vec<Region> {
        let categories = self.cfg.categories();
        let mut out = Vec::new();
        for sub in self.cfg.subsamples(sample) {
            for cat in &categories {
                let mut cuts = sub.cuts.clone();
                cuts.extend(cat.cuts.iter().cloned());
                out.push(Region { subsample: sub.name.clone(), category: cat.name.clone(), cuts });
            }
        }
        out
    }

    /// Process the events of one chunk.
    pub fn process_chunk(&self, dataset: &Dataset, chunk: &ChunkId, events: &[Event]) -> Result<Output> {
        let md = &dataset.metadata;
        let ds = dataset.name.as_str();
        let year = md.year.as_str();
        let is_mc = md.is_mc;
        let params = &self.cfg.parameters;
        self.workflow.load_metadata_extra(self.cfg, md)?;

        let mut out = Output::new();
        out.add_dataset(ds, md);

        let lumi_mask = self.resources.lumi_masks.get(year);
        let mut skimmed = Vec::with_capacity(events.len());
        let mut sum_genweight = 0.0;
        for ev in events {
            let w0 = if is_mc { ev.gen_weight.unwrap_or(1.0) } else { 1.0 };
            sum_genweight += w0;
            out.count(CUTFLOW_INITIAL, ds, &md.sample, w0);
            let ctx = CutContext { event: ev, objects: None, year, is_mc, params, lumi_mask };
            if evaluate_cuts(&self.cfg.skim, &ctx)?.is_none() {
                continue;
            }
            out.count(CUTFLOW_SKIM, ds, &md.sample, w0);
            let mut ev = ev.clone();
            self.workflow.process_extra_after_skim(&mut ev, is_mc)?;
            skimmed.push(ev);
        }
        if is_mc {
            *out.sum_genweights.entry(ds.to_string()).or_default() += sum_genweight;
        }

        let seed = events.first().map(|e| e.event).unwrap_or(0);
        let calibrator = self.resources.jet_calibrators.get(year);
        if is_mc && calibrator.is_some() {
            out.seed_fatjet_chunk.insert(chunk_seed_key(&chunk.file, chunk.start, chunk.stop), seed);
        }

        let weight_kinds: Vec<WeightKind> = if is_mc {
            self.cfg.weights_for(&md.sample).iter().map(|n| n.parse()).collect::<Result<_>>()?
        } else {
            Vec::new()
        };
        let regions = self.regions(&md.sample);

        let mut variations = vec![ShapeVariation::Nominal];
        if is_mc {
            if !self.shape_variations.is_empty() && calibrator.is_none() {
                return Err(Error::Config(format!("shape variations need a jets_calibration entry for '{year}'")));
            }
            variations.extend(self.shape_variations.iter().cloned());
        }

        for variation in &variations {
            let mut rng = chunk_rng(seed);
            let nominal = variation.is_nominal();
            let label = variation.label();
            let ectx = EventContext {
                metadata: md,
                params,
                options: &self.cfg.workflow_options,
                resources: self.resources,
                shape_variation: variation,
            };
            let mut n_presel = 0usize;
            for ev in &skimmed {
                let mut ev = ev.clone();
                if let Some(cal) = calibrator {
                    cal.calibrate(&mut ev, is_mc, md.era.as_deref(), variation, &mut rng)?;
                }
                let Some(mut objects) = self.workflow.apply_object_preselection(&ev, &ectx)? else { continue };
                {
                    let ctx = CutContext { event: &ev, objects: Some(&objects), year, is_mc, params, lumi_mask };
                    if evaluate_cuts(&self.cfg.preselections, &ctx)?.is_none() {
                        continue;
                    }
                }
                self.workflow.define_common_variables_after_presel(&ev, &mut objects, &ectx)?;
                let custom = self.workflow.process_extra_after_presel(&ev, &objects, &ectx)?;

                let weights = if is_mc {
                    let wctx = WeightContext { event: &ev, objects: &objects, metadata: md, params, resources: self.resources };
                    let varied: &[WeightKind] = if nominal { &self.varied_weights } else { &[] };
                    compute_event_weights(&weight_kinds, varied, &wctx)?
                } else {
                    EventWeights::unit()
                };
                n_presel += 1;
                if nominal {
                    out.count(CUTFLOW_PRESEL, ds, &md.sample, weights.nominal);
                }

                let rows = self.hist_rows(&ev, &objects)?;
                let ctx = CutContext { event: &ev, objects: Some(&objects), year, is_mc, params, lumi_mask };
                for region in &regions {
                    let Some(mask) = evaluate_cuts(&region.cuts, &ctx)? else { continue };
                    if nominal {
                        out.count(&region.category, ds, &region.subsample, weights.nominal);
                    }
                    for (plan, rows) in self.hists.iter().zip(&rows) {
                        if !plan.conf.fills(&region.category) {
                            continue;
                        }
                        let hist = out.hist_mut(&plan.name, &region.subsample, ds, || plan.template.clone());
                        fill_region(hist, plan, rows, &mask, &region.category, &label, nominal, &weights, custom.get(&plan.name))?;
                    }
                }
            }
            tracing::debug!(dataset = ds, chunk = ?chunk, variation = %label, presel = n_presel, "processed variation");
        }
        Ok(out)
    }

    fn hist_rows(&self, event: &Event, objects: &Objects) -> Result<Vec<HistRows>> {
        self.hists
            .iter()
            .map(|plan| {
                let event_value = |field: &str| {
                    objects.event_field(event, field).ok_or_else(|| {
                        Error::Input(format!("histogram '{}': unknown event quantity '{field}'", plan.name))
                    })
                };
                let Some(coll) = &plan.coll else {
                    let coords = plan.conf.axes.iter().map(|a| event_value(&a.field)).collect::<Result<Vec<_>>>()?;
                    return Ok(HistRows { rows: vec![(None, coords)] });
                };
                let mut columns = Vec::with_capacity(plan.conf.axes.len());
                for a in &plan.conf.axes {
                    if a.is_event_level() {
                        columns.push(None);
                        continue;
                    }
                    let values = object_values(event, Some(objects), coll, &a.field).ok_or_else(|| {
                        Error::Input(format!("histogram '{}': cannot read '{}' of '{coll}'", plan.name, a.field))
                    })?;
                    columns.push(Some(values));
                }
                let n = columns.iter().flatten().map(Vec::len).next().unwrap_or(0);
                let mut rows = Vec::with_capacity(n);
                for i in 0..n {
                    let coords = plan
                        .conf
                        .axes
                        .iter()
                        .zip(&columns)
                        .map(|(a, col)| match col {
                            Some(v) => Ok(v[i]),
                            None => event_value(&a.field),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    rows.push((Some(i), coords));
                }
                Ok(HistRows { rows })
            })
            .collect()
    }
}

/// Fill one histogram for one (subsample, category) the event passed.
#[allow(clippy::too_many_arguments)]
fn fill_region(
    hist: &mut Hist,
    plan: &HistPlan,
    rows: &HistRows,
    jet_mask: &[bool],
    category: &str,
    shape_label: &str,
    nominal: bool,
    weights: &EventWeights,
    custom: Option<&CustomWeight>,
) -> Result<()> {
    let is_fatjet = plan.coll.as_deref() == Some("FatJetGood");
    let selected: Vec<&(Option<usize>, Vec<f64>)> = if is_fatjet {
        let passing = rows.rows.iter().filter(|(i, _)| i.is_some_and(|i| jet_mask.get(i).copied().unwrap_or(false)));
        match plan.conf.position() {
            Some(pos) => passing.skip(pos).take(1).collect(),
            None => passing.collect(),
        }
    } else {
        match plan.conf.position() {
            Some(pos) => rows.rows.iter().skip(pos).take(1).collect(),
            None => rows.rows.iter().collect(),
        }
    };
    if selected.is_empty() {
        return Ok(());
    }

    let mut labels: Vec<(String, f64)> = Vec::new();
    if nominal {
        labels.push(("nominal".to_string(), weights.nominal));
        labels.extend(weights.variations.iter().map(|(k, w)| (k.clone(), *w)));
        if let Some(c) = custom {
            for l in c.labels() {
                if l != "nominal" && !weights.variations.contains_key(l) {
                    labels.push((l.to_string(), weights.nominal));
                }
            }
        }
    } else {
        labels.push((shape_label.to_string(), weights.nominal));
    }

    for (label, event_w) in &labels {
        let custom_label = if nominal { label.as_str() } else { "nominal" };
        for (idx, coords) in &selected {
            let jet = if is_fatjet { *idx } else { None };
            let w = event_w * custom.map(|c| c.get(custom_label, jet)).unwrap_or(1.0);
            hist.fill(category, label, coords, w)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hist::AxisConf;

    fn plan(conf: HistConf, coll: Option<&str>) -> HistPlan {
        HistPlan { name: "h".into(), template: conf.build(), conf, coll: coll.map(str::to_string) }
    }

    #[test]
    fn fills_masked_jets_with_custom_weights() {
        let p = plan(HistConf::new(vec![AxisConf::regular("FatJetGood", "pt", 10, 0.0, 1000.0)]), Some("FatJetGood"));
        let rows = HistRows { rows: vec![(Some(0), vec![550.0]), (Some(1), vec![450.0])] };
        let weights = EventWeights { nominal: 2.0, variations: BTreeMap::from([("pileupUp".to_string(), 3.0)]) };
        let custom = CustomWeight::Jets(BTreeMap::from([
            ("nominal".to_string(), vec![1.0, 0.5]),
            ("sf_ptetatau21_reweightingUp".to_string(), vec![1.0, 1.5]),
        ]));
        let mut h = p.template.clone();
        fill_region(&mut h, &p, &rows, &[false, true], "cat", "nominal", true, &weights, Some(&custom)).unwrap();
        assert_eq!(h.total("cat", "nominal"), 1.0);
        assert_eq!(h.total("cat", "pileupUp"), 1.5);
        assert_eq!(h.total("cat", "sf_ptetatau21_reweightingUp"), 3.0);

        let mut shifted = p.template.clone();
        fill_region(&mut shifted, &p, &rows, &[true, true], "cat", "JES_Total_AK8PFPuppiUp", false, &weights, Some(&custom))
            .unwrap();
        assert_eq!(shifted.variations("cat"), vec!["JES_Total_AK8PFPuppiUp"]);
        assert_eq!(shifted.total("cat", "JES_Total_AK8PFPuppiUp"), 3.0);
    }

    #[test]
    fn position_is_taken_after_the_mask() {
        let p = plan(
            HistConf::new(vec![AxisConf::regular("FatJetGood", "pt", 10, 0.0, 1000.0).at(Some(0))]),
            Some("FatJetGood"),
        );
        let rows = HistRows { rows: vec![(Some(0), vec![550.0]), (Some(1), vec![450.0])] };
        let mut h = p.template.clone();
        fill_region(&mut h, &p, &rows, &[false, true], "cat", "nominal", true, &EventWeights::unit(), None).unwrap();
        let (sumw, _) = h.inner("cat", "nominal");
        assert_eq!(sumw[4], 1.0);
        assert_eq!(sumw.iter().sum::<f64>(), 1.0);
    }
}
