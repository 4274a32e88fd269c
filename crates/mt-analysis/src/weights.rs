//! Event and per-jet weights of simulated events.
//!
//! Data events always carry weight 1. For simulation the event weight is
//! the product of the configured weights; weights with systematic
//! variations contribute `{name}Up` / `{name}Down` alternatives in which
//! only that factor is varied.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use mt_core::{Error, Result};
use mt_correction::{InputBag, Value};
use mt_events::{DatasetMetadata, Event};

use crate::config::Parameters;
use crate::objects::Objects;
use crate::resources::Resources;

/// Paths without prescale in the BTagMu family.
pub const UNPRESCALED_PATHS: [&str; 2] = ["BTagMu_AK4Jet300_Mu5", "BTagMu_AK8Jet170_DoubleMu5"];
/// Prescaled paths, highest priority first.
pub const PRESCALED_PATHS: [&str; 2] = ["BTagMu_AK8Jet300_Mu5", "BTagMu_AK8DiJet170_Mu5"];
/// Category key of the leading-jet reweighting maps.
pub const PT_REWEIGHTING_CATEGORY: &str = "pt350msd40";
/// Leading-jet pt at and above which the reweighting input is set to 0.
pub const PT_REWEIGHTING_MAX: f64 = 1500.0;
/// Category key of the per-jet reweighting map.
pub const PTETATAU21_CATEGORY: &str = "inclusive";

/// Known weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WeightKind {
    /// Generator weight
    GenWeight,
    /// Integrated luminosity
    Lumi,
    /// Cross section
    Xs,
    /// Pileup profile weight
    Pileup,
    /// Trigger prescale emulation
    SfTriggerPrescale,
    /// Leading-jet pt reweighting
    PtReweighting,
    /// Leading-jet (pt, eta) reweighting
    PtetaReweighting,
    /// Per-jet (pt, eta, tau21) reweighting
    SfPtetatau21Reweighting,
}

impl WeightKind {
    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            WeightKind::GenWeight => "genWeight",
            WeightKind::Lumi => "lumi",
            WeightKind::Xs => "XS",
            WeightKind::Pileup => "pileup",
            WeightKind::SfTriggerPrescale => "sf_trigger_prescale",
            WeightKind::PtReweighting => "pt_reweighting",
            WeightKind::PtetaReweighting => "pteta_reweighting",
            WeightKind::SfPtetatau21Reweighting => "sf_ptetatau21_reweighting",
        }
    }

    /// Whether the weight provides Up/Down variations.
    pub fn has_variations(self) -> bool {
        matches!(self, WeightKind::Pileup | WeightKind::SfPtetatau21Reweighting)
    }

    /// Whether the weight is applied per jet instead of per event.
    pub fn is_per_jet(self) -> bool {
        matches!(self, WeightKind::SfPtetatau21Reweighting)
    }
}

impl fmt::Display for WeightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "genWeight" => WeightKind::GenWeight,
            "lumi" => WeightKind::Lumi,
            "XS" => WeightKind::Xs,
            "pileup" => WeightKind::Pileup,
            "sf_trigger_prescale" => WeightKind::SfTriggerPrescale,
            "pt_reweighting" => WeightKind::PtReweighting,
            "pteta_reweighting" => WeightKind::PtetaReweighting,
            "sf_ptetatau21_reweighting" => WeightKind::SfPtetatau21Reweighting,
            other => return Err(Error::Config(format!("unknown weight '{other}'"))),
        })
    }
}

/// Inputs of the weight computation for one event.
pub struct WeightContext<'a> {
    /// The event
    pub event: &'a Event,
    /// Preselected objects
    pub objects: &'a Objects,
    /// Dataset metadata
    pub metadata: &'a DatasetMetadata,
    /// Parameters
    pub params: &'a Parameters,
    /// Loaded corrections
    pub resources: &'a Resources,
}

/// Total event weight, central and per weight variation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventWeights {
    /// Central weight
    pub nominal: f64,
    /// `{weight}Up` / `{weight}Down` → total weight
    pub variations: BTreeMap<String, f64>,
}

impl EventWeights {
    /// Weight of 1 with no variations (data).
    pub fn unit() -> Self {
        Self { nominal: 1.0, variations: BTreeMap::new() }
    }
}

/// Trigger prescale scale factor.
///
/// 1 if an unprescaled path fired; otherwise `1/prescale` of the first
/// prescaled path that fired; otherwise 1.
pub fn trigger_prescale_sf(event: &Event, prescales: Option<&BTreeMap<String, f64>>) -> Result<f64> {
    if UNPRESCALED_PATHS.iter().any(|p| event.fired(p)) {
        return Ok(1.0);
    }
    let Some(path) = PRESCALED_PATHS.iter().find(|p| event.fired(p)) else { return Ok(1.0) };
    let prescale = prescales
        .and_then(|m| m.get(*path))
        .copied()
        .ok_or_else(|| Error::Config(format!("no prescale configured for '{path}'")))?;
    if prescale <= 0.0 {
        return Err(Error::Config(format!("prescale of '{path}' must be positive (got {prescale})")));
    }
    Ok(1.0 / prescale)
}

fn leading_pt_input(objects: &Objects) -> Result<(f64, f64)> {
    let lead = objects
        .fatjets_good
        .first()
        .ok_or_else(|| Error::Computation("leading-jet reweighting needs at least one FatJetGood".into()))?;
    let pt = if lead.pt < PT_REWEIGHTING_MAX { lead.pt } else { 0.0 };
    Ok((pt, lead.eta))
}

fn pileup_weights(ctx: &WeightContext<'_>) -> Result<[f64; 3]> {
    let year = &ctx.metadata.year;
    let corr = ctx
        .resources
        .pileup
        .get(year)
        .ok_or_else(|| Error::Config(format!("no pileup correction loaded for '{year}'")))?;
    let n_true = ctx
        .event
        .n_true_int
        .ok_or_else(|| Error::Input("pileup weight needs Pileup_nTrueInt".into()))?;
    let eval = |which: &str| {
        corr.evaluate_named(&InputBag::new().real("NumTrueInteractions", n_true).string("weights", which))
    };
    Ok([eval("nominal")?, eval("up")?, eval("down")?])
}

/// Central, up and down value of one event-level weight.
fn event_weight(kind: WeightKind, ctx: &WeightContext<'_>) -> Result<[f64; 3]> {
    let year = &ctx.metadata.year;
    let single = |w: f64| [w, w, w];
    Ok(match kind {
        WeightKind::GenWeight => single(ctx.event.gen_weight.unwrap_or(1.0)),
        WeightKind::Lumi => single(
            *ctx.params.lumi.get(year).ok_or_else(|| Error::Config(format!("no lumi configured for '{year}'")))?,
        ),
        WeightKind::Xs => single(
            ctx.metadata
                .xsec
                .ok_or_else(|| Error::Config(format!("sample '{}' has no xsec", ctx.metadata.sample)))?,
        ),
        WeightKind::Pileup => pileup_weights(ctx)?,
        WeightKind::SfTriggerPrescale => single(trigger_prescale_sf(
            ctx.event,
            ctx.params.hlt_prescales.get(year).and_then(|f| f.get(crate::cuts::HLT_FAMILY)),
        )?),
        WeightKind::PtReweighting => {
            let corr = ctx
                .resources
                .pt_reweighting
                .get(year)
                .ok_or_else(|| Error::Config(format!("no pt reweighting loaded for '{year}'")))?;
            let (pt, _) = leading_pt_input(ctx.objects)?;
            single(corr.evaluate(&[Value::from(PT_REWEIGHTING_CATEGORY), Value::Real(pt)])?)
        }
        WeightKind::PtetaReweighting => {
            let corr = ctx
                .resources
                .pteta_reweighting
                .get(year)
                .ok_or_else(|| Error::Config(format!("no pt-eta reweighting loaded for '{year}'")))?;
            let (pt, eta) = leading_pt_input(ctx.objects)?;
            single(corr.evaluate(&[Value::from(PT_REWEIGHTING_CATEGORY), Value::Real(pt), Value::Real(eta)])?)
        }
        WeightKind::SfPtetatau21Reweighting => single(1.0),
    })
}

/// Event weight for simulation.
///
/// `varied` lists the weights whose Up/Down alternatives are produced; a
/// listed weight that is not applied to this sample is ignored.
pub fn compute_event_weights(names: &[WeightKind], varied: &[WeightKind], ctx: &WeightContext<'_>) -> Result<EventWeights> {
    let mut factors = Vec::with_capacity(names.len());
    for &kind in names {
        if !kind.is_per_jet() {
            factors.push((kind, event_weight(kind, ctx)?));
        }
    }
    let nominal: f64 = factors.iter().map(|(_, w)| w[0]).product();
    let mut variations = BTreeMap::new();
    for (kind, w) in &factors {
        if !varied.contains(kind) || !kind.has_variations() {
            continue;
        }
        let others: f64 = factors.iter().filter(|(k, _)| k != kind).map(|(_, w)| w[0]).product();
        variations.insert(format!("{kind}Up"), others * w[1]);
        variations.insert(format!("{kind}Down"), others * w[2]);
    }
    Ok(EventWeights { nominal, variations })
}

/// Per-jet (pt, eta, tau21) weights of the `FatJetGood` jets.
#[derive(Debug, Clone, PartialEq)]
pub struct JetWeights {
    /// Central
    pub nominal: Vec<f64>,
    /// Statistical up
    pub up: Vec<f64>,
    /// Statistical down
    pub down: Vec<f64>,
}

impl JetWeights {
    /// The three sets labelled `nominal`, `{weight}Up` and `{weight}Down`.
    pub fn labelled(&self) -> [(String, &[f64]); 3] {
        let kind = WeightKind::SfPtetatau21Reweighting;
        [
            ("nominal".to_string(), self.nominal.as_slice()),
            (format!("{kind}Up"), self.up.as_slice()),
            (format!("{kind}Down"), self.down.as_slice()),
        ]
    }
}

/// Evaluate the per-jet reweighting of `sample` at the jets of `objects`.
///
/// The jets are expected to carry their position label. Returns `None` when
/// no map is loaded for the sample and period.
pub fn ptetatau21_jet_weights(
    resources: &Resources,
    sample: &str,
    year: &str,
    shape_variation: &str,
    objects: &Objects,
) -> Result<Option<JetWeights>> {
    let Some(corr) = resources.ptetatau21.get(&(sample.to_string(), year.to_string())) else { return Ok(None) };
    let mut out = JetWeights { nominal: Vec::new(), up: Vec::new(), down: Vec::new() };
    for (i, j) in objects.fatjets_good.iter().enumerate() {
        let pos = j.pos.unwrap_or(i) as f64;
        let eval = |var: &str| {
            corr.evaluate(&[
                Value::from(PTETATAU21_CATEGORY),
                Value::from(shape_variation),
                Value::from(var),
                Value::Real(pos),
                Value::Real(j.pt),
                Value::Real(j.eta),
                Value::Real(j.tau21),
            ])
        };
        out.nominal.push(eval("nominal")?);
        out.up.push(eval("statUp")?);
        out.down.push(eval("statDown")?);
    }
    Ok(Some(out))
}
