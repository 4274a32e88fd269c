//! Correction files and lumi masks loaded once per run and shared by all
//! chunks.

use std::collections::{BTreeMap, BTreeSet};

use mt_core::{Error, Result};
use mt_correction::{Correction, CorrectionSet};

use crate::config::{AnalysisConfig, WorkflowKind};
use crate::cuts::Cut;
use crate::jec::JetCalibrator;
use crate::lumimask::LumiMask;
use crate::weights::WeightKind;

/// External inputs of a run, keyed by data-taking period.
#[derive(Debug, Default)]
pub struct Resources {
    /// Fat-jet calibration
    pub jet_calibrators: BTreeMap<String, JetCalibrator>,
    /// Golden JSON
    pub lumi_masks: BTreeMap<String, LumiMask>,
    /// Pileup weights
    pub pileup: BTreeMap<String, Correction>,
    /// `(sample, period)` → (pt, eta, tau21) per-jet reweighting
    pub ptetatau21: BTreeMap<(String, String), Correction>,
    /// Leading-jet pt reweighting
    pub pt_reweighting: BTreeMap<String, Correction>,
    /// Leading-jet (pt, eta) reweighting
    pub pteta_reweighting: BTreeMap<String, Correction>,
}

impl Resources {
    /// Load what the configuration needs for the given periods.
    pub fn load(cfg: &AnalysisConfig, years: &BTreeSet<String>) -> Result<Self> {
        let p = &cfg.parameters;
        let mut out = Resources::default();

        for year in years {
            if let Some(jc) = p.jets_calibration.get(year) {
                out.jet_calibrators.insert(year.clone(), JetCalibrator::from_config(jc)?);
            }
        }

        let needs_golden = cfg.skim.iter().chain(&cfg.preselections).any(|c| matches!(c, Cut::GoldenJson));
        if needs_golden {
            for year in years {
                if let Some(path) = p.lumi_mask.get(year) {
                    out.lumi_masks.insert(year.clone(), LumiMask::from_file(path)?);
                }
            }
        }

        let mut kinds = BTreeSet::new();
        for name in cfg.weights.common.iter().chain(cfg.weights.by_sample.values().flatten()) {
            kinds.insert(name.parse::<WeightKind>()?);
        }

        if kinds.contains(&WeightKind::Pileup) {
            for year in years {
                let r = p
                    .pileup
                    .get(year)
                    .ok_or_else(|| Error::Config(format!("pileup weight requested but no pileup file for '{year}'")))?;
                let set = CorrectionSet::from_file(&r.file)?;
                out.pileup.insert(year.clone(), set.get(&r.name)?.clone());
            }
        }

        if kinds.contains(&WeightKind::SfPtetatau21Reweighting)
            && matches!(cfg.workflow, WorkflowKind::Mutag | WorkflowKind::MutagOneMuAk8)
        {
            for sample in &cfg.workflow_options.reweighting_samples {
                let Some(by_year) = p.ptetatau21_reweighting.get(sample) else { continue };
                for year in years {
                    if let Some(path) = by_year.get(year) {
                        let set = CorrectionSet::from_file(path)?;
                        out.ptetatau21.insert((sample.clone(), year.clone()), set.first()?.clone());
                    }
                }
            }
        }

        for (kind, files, prefix, dest) in [
            (WeightKind::PtReweighting, &p.pt_reweighting, "pt_corr", &mut out.pt_reweighting),
            (WeightKind::PtetaReweighting, &p.pteta_reweighting, "pt_eta_2D_corr", &mut out.pteta_reweighting),
        ] {
            if !kinds.contains(&kind) {
                continue;
            }
            for year in years {
                let path = files
                    .get(year)
                    .ok_or_else(|| Error::Config(format!("{kind} weight requested but no file for '{year}'")))?;
                let set = CorrectionSet::from_file(path)?;
                dest.insert(year.clone(), set.get(&format!("{prefix}_{year}"))?.clone());
            }
        }

        tracing::info!(
            jec = out.jet_calibrators.len(),
            lumi_masks = out.lumi_masks.len(),
            pileup = out.pileup.len(),
            ptetatau21 = out.ptetatau21.len(),
            "loaded run resources"
        );
        Ok(out)
    }
}
