//! Processing workflows.
//!
//! A workflow customizes the per-event processing through hooks called by
//! the [`Processor`](crate::processor::Processor) in this order:
//!
//! 0. [`load_metadata_extra`](Workflow::load_metadata_extra), once per chunk
//! 1. [`process_extra_after_skim`](Workflow::process_extra_after_skim), once per event
//! 2. [`apply_object_preselection`](Workflow::apply_object_preselection), per shape variation
//! 3. preselection cuts
//! 4. [`define_common_variables_after_presel`](Workflow::define_common_variables_after_presel)
//! 5. [`process_extra_after_presel`](Workflow::process_extra_after_presel)
//!
//! The default hooks implement the fat-jet base processing; the other
//! workflows override some of them and reuse the rest.

pub mod fatjet_base;
pub mod mutag;
pub mod pt_reweighting;

use std::collections::BTreeMap;

use mt_core::Result;
use mt_events::{DatasetMetadata, Event};

use crate::config::{AnalysisConfig, Parameters, WorkflowKind, WorkflowOptions};
use crate::jec::ShapeVariation;
use crate::objects::Objects;
use crate::resources::Resources;

pub use fatjet_base::FatjetBase;
pub use mutag::{Mutag, MutagOneMuAk8};
pub use pt_reweighting::PtReweighting;

/// Per-event inputs shared by the hooks.
pub struct EventContext<'a> {
    /// Dataset metadata
    pub metadata: &'a DatasetMetadata,
    /// Analysis parameters
    pub params: &'a Parameters,
    /// Workflow options
    pub options: &'a WorkflowOptions,
    /// Loaded corrections
    pub resources: &'a Resources,
    /// Shape variation being processed
    pub shape_variation: &'a ShapeVariation,
}

impl EventContext<'_> {
    /// Simulation flag.
    pub fn is_mc(&self) -> bool {
        self.metadata.is_mc
    }
}

/// Histogram-specific weight supplied by a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomWeight {
    /// Variation label → one weight per `FatJetGood` jet
    Jets(BTreeMap<String, Vec<f64>>),
    /// Variation label → one weight for the event
    Event(BTreeMap<String, f64>),
}

impl CustomWeight {
    /// Variation labels, `nominal` included.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            CustomWeight::Jets(m) => m.keys().map(String::as_str).collect(),
            CustomWeight::Event(m) => m.keys().map(String::as_str).collect(),
        }
    }

    /// Weight of jet `jet` (or of the event) in variation `label`, falling
    /// back to the nominal weight for labels the weight does not vary.
    pub fn get(&self, label: &str, jet: Option<usize>) -> f64 {
        match self {
            CustomWeight::Jets(m) => {
                let values = m.get(label).or_else(|| m.get("nominal"));
                match (values, jet) {
                    (Some(v), Some(i)) => v.get(i).copied().unwrap_or(1.0),
                    _ => 1.0,
                }
            }
            CustomWeight::Event(m) => m.get(label).or_else(|| m.get("nominal")).copied().unwrap_or(1.0),
        }
    }
}

/// Histogram name → custom weight.
pub type CustomWeights = BTreeMap<String, CustomWeight>;

/// Processing hooks.
pub trait Workflow: Send + Sync {
    /// Which workflow this is.
    fn kind(&self) -> WorkflowKind;

    /// Configuration checks beyond the generic ones.
    fn validate(&self, _cfg: &AnalysisConfig) -> Result<()> {
        Ok(())
    }

    /// Checks against the metadata of the dataset about to be processed.
    fn load_metadata_extra(&self, _cfg: &AnalysisConfig, _metadata: &DatasetMetadata) -> Result<()> {
        Ok(())
    }

    /// Adjust the raw event after the skim.
    fn process_extra_after_skim(&self, event: &mut Event, is_mc: bool) -> Result<()> {
        fatjet_base::store_raw_msoftdrop(event);
        if is_mc {
            fatjet_base::attach_hadron_counts(event);
        }
        Ok(())
    }

    /// Build the preselected collections; `None` drops the event.
    fn apply_object_preselection(&self, event: &Event, ctx: &EventContext<'_>) -> Result<Option<Objects>> {
        Ok(fatjet_base::preselect_objects(event, ctx.params))
    }

    /// Variables computed on the preselected objects.
    fn define_common_variables_after_presel(
        &self,
        _event: &Event,
        objects: &mut Objects,
        _ctx: &EventContext<'_>,
    ) -> Result<()> {
        fatjet_base::define_sv_variables(objects);
        Ok(())
    }

    /// Last hook; returns histogram-specific weights.
    fn process_extra_after_presel(
        &self,
        _event: &Event,
        _objects: &Objects,
        _ctx: &EventContext<'_>,
    ) -> Result<CustomWeights> {
        Ok(CustomWeights::new())
    }
}

/// Workflow implementation for `kind`.
pub fn workflow_for(kind: WorkflowKind) -> Box<dyn Workflow> {
    match kind {
        WorkflowKind::FatjetBase => Box::new(FatjetBase),
        WorkflowKind::Mutag => Box::new(Mutag),
        WorkflowKind::MutagOneMuAk8 => Box::new(MutagOneMuAk8),
        WorkflowKind::PtReweighting => Box::new(PtReweighting),
    }
}
