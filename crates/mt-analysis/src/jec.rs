//! Fat-jet energy calibration: JEC, hybrid JER smearing and JES/JER shape
//! variations, evaluated from a JERC correctionlib file.

use std::fmt;

use mt_core::{Error, Result};
use mt_correction::{CorrectionSet, InputBag};
use mt_events::{FatJet, GenJet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::config::JetCalibrationConfig;

/// Gen-match window in units of the resolution.
const JER_MATCH_SIGMAS: f64 = 3.0;

/// Direction of a systematic shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// +1σ
    Up,
    /// -1σ
    Down,
}

impl Direction {
    /// `Up` / `Down`.
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Up => "Up",
            Direction::Down => "Down",
        }
    }

    fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

/// Jet calibration variation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeVariation {
    /// Central calibration
    Nominal,
    /// Total JES uncertainty shift, `JES_Total_{type}`
    Jes(String, Direction),
    /// JER scale-factor shift, `JER_{type}`
    Jer(String, Direction),
}

impl ShapeVariation {
    /// Parse a configured shape variation name into its up/down pair.
    pub fn pair(name: &str) -> Result<[ShapeVariation; 2]> {
        let make = |d| {
            if name.starts_with("JES_") {
                Ok(ShapeVariation::Jes(name.to_string(), d))
            } else if name.starts_with("JER_") {
                Ok(ShapeVariation::Jer(name.to_string(), d))
            } else {
                Err(Error::Config(format!("unsupported shape variation '{name}'")))
            }
        };
        Ok([make(Direction::Up)?, make(Direction::Down)?])
    }

    /// Label used as histogram variation (`nominal`, `JES_Total_AK8PFPuppiUp`, ...).
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Whether this is the central calibration.
    pub fn is_nominal(&self) -> bool {
        matches!(self, ShapeVariation::Nominal)
    }
}

impl fmt::Display for ShapeVariation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeVariation::Nominal => f.write_str("nominal"),
            ShapeVariation::Jes(n, d) | ShapeVariation::Jer(n, d) => write!(f, "{n}{}", d.suffix()),
        }
    }
}

/// JERC evaluator for one data-taking period.
pub struct JetCalibrator {
    set: CorrectionSet,
    config: JetCalibrationConfig,
}

impl fmt::Debug for JetCalibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JetCalibrator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl JetCalibrator {
    /// Load the JERC file of a period.
    pub fn from_config(config: &JetCalibrationConfig) -> Result<Self> {
        let set = CorrectionSet::from_file(&config.file)?;
        Ok(Self::new(set, config.clone()))
    }

    /// Calibrator over an already loaded correction set.
    pub fn new(set: CorrectionSet, config: JetCalibrationConfig) -> Self {
        Self { set, config }
    }

    fn jec_tag(&self, is_mc: bool, era: Option<&str>) -> Result<Option<&str>> {
        if is_mc {
            return Ok(self.config.jec_mc.as_deref());
        }
        if self.config.jec_data.is_empty() {
            return Ok(None);
        }
        let era = era.ok_or_else(|| Error::Config("data dataset without 'era' needs a JEC tag".into()))?;
        self.config
            .jec_data
            .get(era)
            .map(|s| Some(s.as_str()))
            .ok_or_else(|| Error::Config(format!("no data JEC tag for era '{era}'")))
    }

    /// Recompute pt and mass from the raw values with the L1L2L3Res stack.
    pub fn apply_jec(&self, jets: &mut [FatJet], rho: f64, run: u32, is_mc: bool, era: Option<&str>) -> Result<()> {
        let Some(tag) = self.jec_tag(is_mc, era)? else { return Ok(()) };
        let compound = self.set.compound(&format!("{tag}_L1L2L3Res_{}", self.config.jet_type))?;
        for j in jets.iter_mut() {
            let pt_raw = (1.0 - j.raw_factor) * j.pt;
            let mass_raw = (1.0 - j.raw_factor) * j.mass;
            let bag = InputBag::new()
                .real("JetA", j.area)
                .real("JetEta", j.eta)
                .real("JetPt", pt_raw)
                .real("JetPhi", j.phi)
                .real("Rho", rho)
                .real("run", run as f64);
            let factor = compound.evaluate_named(&bag)?;
            j.pt_raw = Some(pt_raw);
            j.mass_raw = Some(mass_raw);
            j.pt = pt_raw * factor;
            j.mass = mass_raw * factor;
        }
        Ok(())
    }

    /// Hybrid JER smearing (simulation).
    ///
    /// Jets matched to a generator jet within `3·σ·pt` are scaled, the others
    /// smeared stochastically. A Gaussian is drawn for every jet, matched or
    /// not, so the random sequence depends only on the jet multiplicity.
    pub fn apply_jer(
        &self,
        jets: &mut [FatJet],
        genjets: &[GenJet],
        rho: f64,
        shift: Option<Direction>,
        rng: &mut StdRng,
    ) -> Result<()> {
        let Some(tag) = self.config.jer.as_deref() else { return Ok(()) };
        let ty = &self.config.jet_type;
        let sf_corr = self.set.get(&format!("{tag}_ScaleFactor_{ty}"))?;
        let res_corr = self.set.get(&format!("{tag}_PtResolution_{ty}"))?;
        let systematic = match shift {
            None => "nom",
            Some(Direction::Up) => "up",
            Some(Direction::Down) => "down",
        };
        for j in jets.iter_mut() {
            let sf = sf_corr.evaluate_named(
                &InputBag::new().real("JetEta", j.eta).real("JetPt", j.pt).string("systematic", systematic),
            )?;
            let res =
                res_corr.evaluate_named(&InputBag::new().real("JetEta", j.eta).real("JetPt", j.pt).real("Rho", rho))?;
            let gauss: f64 = rng.sample(StandardNormal);
            let matched = usize::try_from(j.gen_jet_idx)
                .ok()
                .and_then(|i| genjets.get(i))
                .filter(|g| (j.pt - g.pt).abs() < JER_MATCH_SIGMAS * res * j.pt);
            let factor = jer_factor(j.pt, matched.map(|g| g.pt), sf, res, gauss);
            j.pt *= factor;
            j.mass *= factor;
        }
        Ok(())
    }

    /// Scale pt and mass by `1 ± σ_JES`.
    pub fn apply_jes_shift(&self, jets: &mut [FatJet], direction: Direction) -> Result<()> {
        let tag = self
            .config
            .jec_mc
            .as_deref()
            .ok_or_else(|| Error::Config("JES variation requires a simulation JEC tag".into()))?;
        let unc = self.set.get(&format!("{tag}_Total_{}", self.config.jet_type))?;
        for j in jets.iter_mut() {
            let u = unc.evaluate_named(&InputBag::new().real("JetEta", j.eta).real("JetPt", j.pt))?;
            let k = 1.0 + direction.sign() * u;
            j.pt *= k;
            j.mass *= k;
        }
        Ok(())
    }

    /// Calibrate the fat jets of one event: JEC, then JER (simulation), then
    /// the JES shift when requested.
    pub fn calibrate(
        &self,
        event: &mut mt_events::Event,
        is_mc: bool,
        era: Option<&str>,
        variation: &ShapeVariation,
        rng: &mut StdRng,
    ) -> Result<()> {
        let (rho, run) = (event.rho, event.run);
        self.apply_jec(&mut event.fatjets, rho, run, is_mc, era)?;
        if !is_mc {
            return Ok(());
        }
        let jer_shift = match variation {
            ShapeVariation::Jer(_, d) => Some(*d),
            _ => None,
        };
        self.apply_jer(&mut event.fatjets, &event.genjets_ak8, rho, jer_shift, rng)?;
        if let ShapeVariation::Jes(_, d) = variation {
            self.apply_jes_shift(&mut event.fatjets, *d)?;
        }
        Ok(())
    }
}

/// JER random generator of a chunk, seeded with its first event number.
pub fn chunk_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Key under which a chunk seed is recorded.
pub fn chunk_seed_key(file: &str, start: usize, stop: usize) -> String {
    format!("chunk_{file}_{start}-{stop}")
}

/// Hybrid smearing factor: scaling with the matched generator jet, else
/// stochastic smearing with the unit normal draw `gauss`. Clipped at 0 so
/// a jet never gets a negative momentum.
fn jer_factor(pt: f64, gen_pt: Option<f64>, sf: f64, res: f64, gauss: f64) -> f64 {
    let factor = match gen_pt {
        Some(g) => 1.0 + (sf - 1.0) * (pt - g) / pt,
        None => 1.0 + gauss * res * (sf * sf - 1.0).max(0.0).sqrt(),
    };
    factor.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mt_events::Event;
    use std::path::PathBuf;

    const JERC: &str = r#"{
        "schema_version": 2,
        "corrections": [
            {"name": "MC_L1_AK8PFPuppi", "inputs": [{"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
             "output": {"name": "c", "type": "real"}, "data": 1.1},
            {"name": "MC_L2_AK8PFPuppi", "inputs": [{"name": "JetEta", "type": "real"}],
             "output": {"name": "c", "type": "real"}, "data": 1.0},
            {"name": "MC_Total_AK8PFPuppi", "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"}],
             "output": {"name": "u", "type": "real"}, "data": 0.02},
            {"name": "JR_ScaleFactor_AK8PFPuppi",
             "inputs": [{"name": "JetEta", "type": "real"}, {"name": "systematic", "type": "string"}],
             "output": {"name": "sf", "type": "real"},
             "data": {"nodetype": "category", "input": "systematic",
                      "content": [{"key": "nom", "value": 1.1}, {"key": "up", "value": 1.2}, {"key": "down", "value": 1.0}]}},
            {"name": "JR_PtResolution_AK8PFPuppi",
             "inputs": [{"name": "JetEta", "type": "real"}, {"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
             "output": {"name": "res", "type": "real"}, "data": 0.1}
        ],
        "compound_corrections": [
            {"name": "MC_L1L2L3Res_AK8PFPuppi",
             "inputs": [{"name": "JetA", "type": "real"}, {"name": "JetEta", "type": "real"},
                        {"name": "JetPt", "type": "real"}, {"name": "Rho", "type": "real"}],
             "output": {"name": "c", "type": "real"},
             "inputs_update": ["JetPt"], "input_op": "*", "output_op": "*",
             "stack": ["MC_L1_AK8PFPuppi", "MC_L2_AK8PFPuppi"]}
        ]
    }"#;

    fn calibrator() -> JetCalibrator {
        let set = CorrectionSet::from_json_str(JERC).unwrap();
        JetCalibrator::new(
            set,
            JetCalibrationConfig {
                file: PathBuf::from("unused"),
                jec_mc: Some("MC".into()),
                jec_data: Default::default(),
                jer: Some("JR".into()),
                jet_type: "AK8PFPuppi".into(),
            },
        )
    }

    fn event() -> Event {
        Event {
            event: 42,
            rho: 20.0,
            fatjets: vec![
                FatJet { pt: 400.0, eta: 0.5, mass: 100.0, raw_factor: 0.2, gen_jet_idx: 0, ..Default::default() },
                FatJet { pt: 300.0, eta: -1.0, mass: 80.0, raw_factor: 0.0, gen_jet_idx: -1, ..Default::default() },
            ],
            genjets_ak8: vec![GenJet { pt: 330.0, ..Default::default() }],
            ..Default::default()
        }
    }

    #[test]
    fn jec_rescales_raw_momentum() {
        let c = calibrator();
        let mut ev = event();
        c.apply_jec(&mut ev.fatjets, ev.rho, 1, true, None).unwrap();
        assert_relative_eq!(ev.fatjets[0].pt_raw.unwrap(), 320.0);
        assert_relative_eq!(ev.fatjets[0].pt, 352.0, max_relative = 1e-12);
        assert_relative_eq!(ev.fatjets[0].mass, 88.0, max_relative = 1e-12);
        // data without data tags is left untouched
        let mut data = event();
        c.apply_jec(&mut data.fatjets, data.rho, 1, false, Some("C")).unwrap();
        assert_eq!(data.fatjets[0].pt, 400.0);
    }

    #[test]
    fn hybrid_smearing() {
        let c = calibrator();
        let mut ev = event();
        let mut rng = chunk_rng(ev.event);
        c.calibrate(&mut ev, true, None, &ShapeVariation::Nominal, &mut rng).unwrap();
        // jet 0: 352 GeV matched to 330 GeV (|Δ| < 3·0.1·352): scaling method
        let expected = 352.0 * (1.0 + 0.1 * (352.0 - 330.0) / 352.0);
        assert_relative_eq!(ev.fatjets[0].pt, expected, max_relative = 1e-12);

        // same seed, same result
        let mut again = event();
        c.calibrate(&mut again, true, None, &ShapeVariation::Nominal, &mut chunk_rng(42)).unwrap();
        assert_eq!(again.fatjets[1].pt, ev.fatjets[1].pt);
        assert_ne!(ev.fatjets[1].pt, 330.0);
    }

    #[test]
    fn smearing_factor_never_negative() {
        // stochastic: 1 + (-10)·0.2·sqrt(1.5² - 1) < 0
        assert_eq!(jer_factor(300.0, None, 1.5, 0.2, -10.0), 0.0);
        let mild = jer_factor(300.0, None, 1.5, 0.2, 0.5);
        assert_relative_eq!(mild, 1.0 + 0.5 * 0.2 * 1.25_f64.sqrt(), max_relative = 1e-12);
        // sf below 1 does not smear unmatched jets
        assert_eq!(jer_factor(300.0, None, 0.9, 0.2, 3.0), 1.0);
        assert_relative_eq!(jer_factor(352.0, Some(330.0), 1.1, 0.1, 0.0), 1.0 + 0.1 * 22.0 / 352.0, max_relative = 1e-12);
    }

    #[test]
    fn shape_variations() {
        let c = calibrator();
        let [up, down] = ShapeVariation::pair("JES_Total_AK8PFPuppi").unwrap();
        assert_eq!(up.label(), "JES_Total_AK8PFPuppiUp");
        assert_eq!(down.to_string(), "JES_Total_AK8PFPuppiDown");

        let mut nom = event();
        c.calibrate(&mut nom, true, None, &ShapeVariation::Nominal, &mut chunk_rng(1)).unwrap();
        let mut shifted = event();
        c.calibrate(&mut shifted, true, None, &up, &mut chunk_rng(1)).unwrap();
        assert_relative_eq!(shifted.fatjets[0].pt, nom.fatjets[0].pt * 1.02, max_relative = 1e-12);

        let [jer_up, _] = ShapeVariation::pair("JER_AK8PFPuppi").unwrap();
        let mut smeared = event();
        c.calibrate(&mut smeared, true, None, &jer_up, &mut chunk_rng(1)).unwrap();
        let expected = 352.0 * (1.0 + 0.2 * (352.0 - 330.0) / 352.0);
        assert_relative_eq!(smeared.fatjets[0].pt, expected, max_relative = 1e-12);

        assert!(ShapeVariation::pair("MET").is_err());
        assert_eq!(chunk_seed_key("a.parquet", 0, 100), "chunk_a.parquet_0-100");
    }
}
