//! Event and jet selections.
//!
//! Cuts are declared in the configuration as tagged maps
//! (`{type: pt_msd, pt: 300, msd: 40}`). Event-level cuts give one boolean
//! per event; jet-level cuts give one boolean per `FatJetGood` jet, and an
//! event passes a jet-level cut when at least one jet does. Within one cut
//! list jet masks are combined jet by jet, so "a jet passing A and B" is
//! required rather than "a jet passing A and another passing B".

use mt_core::{Error, Flavor, Result};
use mt_events::Event;
use serde::{Deserialize, Serialize};

use crate::config::Parameters;
use crate::lumimask::LumiMask;
use crate::objects::{Objects, collection_pts};

/// Trigger family used by default.
pub const HLT_FAMILY: &str = "BTagMu";

fn default_family() -> String {
    HLT_FAMILY.to_string()
}

/// One selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cut {
    /// Always passes.
    Passthrough,
    /// At least `min` good primary vertices.
    NPvGood {
        /// Minimum vertex count
        min: u32,
    },
    /// All event filter flags configured for the period.
    EventFlags,
    /// Certified luminosity sections (data only).
    GoldenJson,
    /// Logical OR of the period's configured trigger paths.
    Hlt {
        /// Trigger family key in `HLT_triggers`
        #[serde(default = "default_family")]
        family: String,
    },
    /// At least `n` objects of `coll` with pt ≥ `pt`.
    NObjMin {
        /// Collection
        coll: String,
        /// Minimum multiplicity
        n: usize,
        /// Minimum pt
        #[serde(default)]
        pt: Option<f64>,
    },
    /// At least `n` fat jets of `coll` with msoftdrop ≥ `msd`.
    NObjMinMsd {
        /// Collection (`FatJet` or `FatJetGood`)
        coll: String,
        /// Minimum multiplicity
        n: usize,
        /// Minimum soft-drop mass
        msd: f64,
    },
    /// Jet with pt > `pt` and msoftdrop > `msd`.
    PtMsd {
        /// Minimum pt
        pt: f64,
        /// Minimum soft-drop mass
        msd: f64,
    },
    /// Jet with pt > `pt` and `msd_lo` < msoftdrop < `msd_hi`.
    PtMsdWindow {
        /// Minimum pt
        pt: f64,
        /// Soft-drop mass lower bound
        msd_lo: f64,
        /// Soft-drop mass upper bound
        msd_hi: f64,
    },
    /// Jet with `lo` ≤ pt < `hi` (no upper bound when `hi` is unset).
    PtBin {
        /// Lower edge
        lo: f64,
        /// Upper edge
        #[serde(default)]
        hi: Option<f64>,
    },
    /// Jet with τ21 < `max`.
    Tau21Max {
        /// Upper bound
        max: f64,
    },
    /// Jet with tagger score above the working point.
    TaggerPass {
        /// Score field
        tagger: String,
        /// Threshold
        wp: f64,
    },
    /// Jet with tagger score at or below the working point.
    TaggerFail {
        /// Score field
        tagger: String,
        /// Threshold
        wp: f64,
    },
    /// Jet with at least `n` matched good muons.
    NMuonMin {
        /// Minimum matched muons
        n: usize,
    },
    /// Jet of the given hadron flavour (simulation).
    Flavor {
        /// Flavour class
        flavor: Flavor,
    },
}

/// Everything a cut may look at.
pub struct CutContext<'a> {
    /// The event
    pub event: &'a Event,
    /// Preselected objects (absent during the skim)
    pub objects: Option<&'a Objects>,
    /// Data-taking period
    pub year: &'a str,
    /// Simulation flag
    pub is_mc: bool,
    /// Analysis parameters
    pub params: &'a Parameters,
    /// Golden JSON of the period, if loaded
    pub lumi_mask: Option<&'a LumiMask>,
}

/// Result of one cut.
#[derive(Debug, Clone, PartialEq)]
pub enum CutMask {
    /// Event-level decision
    Event(bool),
    /// Decision per `FatJetGood` jet
    Jets(Vec<bool>),
}

impl Cut {
    /// Short name used in logs and errors.
    pub fn name(&self) -> String {
        match self {
            Cut::Passthrough => "passthrough".into(),
            Cut::NPvGood { min } => format!("nPVgood_{min}"),
            Cut::EventFlags => "event_flags".into(),
            Cut::GoldenJson => "golden_json_lumi".into(),
            Cut::Hlt { family } => format!("HLT_trigger_{family}"),
            Cut::NObjMin { coll, n, pt } => match pt {
                Some(pt) => format!("n{coll}_min{n}_pt{pt}"),
                None => format!("n{coll}_min{n}"),
            },
            Cut::NObjMinMsd { coll, n, msd } => format!("n{coll}_min{n}_msd{msd}"),
            Cut::PtMsd { pt, msd } => format!("pt{pt}msd{msd}"),
            Cut::PtMsdWindow { pt, msd_lo, msd_hi } => format!("pt{pt}msd{msd_lo}to{msd_hi}"),
            Cut::PtBin { lo, hi } => match hi {
                Some(hi) => format!("Pt-{lo}to{hi}"),
                None => format!("Pt-{lo}toInf"),
            },
            Cut::Tau21Max { max } => format!("tau21_{max}"),
            Cut::TaggerPass { tagger, wp } => format!("{tagger}_pass{wp}"),
            Cut::TaggerFail { tagger, wp } => format!("{tagger}_fail{wp}"),
            Cut::NMuonMin { n } => format!("nmu{n}"),
            Cut::Flavor { flavor } => format!("flavor_{flavor}"),
        }
    }

    /// Whether the cut acts per jet.
    pub fn is_jet_level(&self) -> bool {
        matches!(
            self,
            Cut::PtMsd { .. }
                | Cut::PtMsdWindow { .. }
                | Cut::PtBin { .. }
                | Cut::Tau21Max { .. }
                | Cut::TaggerPass { .. }
                | Cut::TaggerFail { .. }
                | Cut::NMuonMin { .. }
                | Cut::Flavor { .. }
        )
    }

    /// Evaluate on one event.
    pub fn evaluate(&self, ctx: &CutContext<'_>) -> Result<CutMask> {
        let ev = ctx.event;
        let mask = match self {
            Cut::Passthrough => CutMask::Event(true),
            Cut::NPvGood { min } => CutMask::Event(ev.n_pv_good >= *min),
            Cut::EventFlags => CutMask::Event(event_flags(ctx)?),
            Cut::GoldenJson => {
                if ctx.is_mc {
                    CutMask::Event(true)
                } else {
                    let mask = ctx.lumi_mask.ok_or_else(|| {
                        Error::Config(format!("golden_json cut: no lumi_mask configured for '{}'", ctx.year))
                    })?;
                    CutMask::Event(mask.contains(ev.run, ev.luminosity_block))
                }
            }
            Cut::Hlt { family } => {
                let paths = ctx.params.hlt_triggers.get(ctx.year).and_then(|f| f.get(family)).ok_or_else(|| {
                    Error::Config(format!("no HLT_triggers configured for '{}' / '{family}'", ctx.year))
                })?;
                CutMask::Event(paths.iter().any(|p| ev.fired(p)))
            }
            Cut::NObjMin { coll, n, pt } => {
                let pts = collection_pts(ev, ctx.objects, coll)
                    .ok_or_else(|| Error::Config(format!("cut {}: unknown or unavailable collection '{coll}'", self.name())))?;
                let min = pt.unwrap_or(f64::NEG_INFINITY);
                CutMask::Event(pts.iter().filter(|&&p| p >= min).count() >= *n)
            }
            Cut::NObjMinMsd { coll, n, msd } => {
                let jets = match (coll.as_str(), ctx.objects) {
                    ("FatJet", _) => &ev.fatjets,
                    ("FatJetGood", Some(o)) => &o.fatjets_good,
                    (name, Some(o)) if o.tagged_fatjets.contains_key(name) => &o.tagged_fatjets[name],
                    _ => {
                        return Err(Error::Config(format!(
                            "cut {}: msoftdrop is only defined for FatJet, FatJetGood and its muon-tagged subsets",
                            self.name()
                        )));
                    }
                };
                CutMask::Event(jets.iter().filter(|j| j.msoftdrop >= *msd).count() >= *n)
            }
            _ => CutMask::Jets(self.jet_mask(ctx)?),
        };
        Ok(mask)
    }

    fn jet_mask(&self, ctx: &CutContext<'_>) -> Result<Vec<bool>> {
        let objects = ctx
            .objects
            .ok_or_else(|| Error::Config(format!("jet-level cut {} cannot run before object preselection", self.name())))?;
        objects
            .fatjets_good
            .iter()
            .map(|j| {
                Ok(match self {
                    Cut::PtMsd { pt, msd } => j.pt > *pt && j.msoftdrop > *msd,
                    Cut::PtMsdWindow { pt, msd_lo, msd_hi } => {
                        j.pt > *pt && j.msoftdrop > *msd_lo && j.msoftdrop < *msd_hi
                    }
                    Cut::PtBin { lo, hi } => j.pt >= *lo && hi.is_none_or(|h| j.pt < h),
                    Cut::Tau21Max { max } => j.tau21 < *max,
                    Cut::TaggerPass { tagger, wp } => tagger_score(j, tagger)? > *wp,
                    Cut::TaggerFail { tagger, wp } => tagger_score(j, tagger)? <= *wp,
                    Cut::NMuonMin { n } => j.matched_muons.len() >= *n,
                    Cut::Flavor { flavor } => j.hadron_counts().is_some_and(|(b, c)| flavor.matches(b, c)),
                    _ => true,
                })
            })
            .collect()
    }
}

fn tagger_score(jet: &mt_events::FatJet, tagger: &str) -> Result<f64> {
    jet.field(tagger).ok_or_else(|| Error::Input(format!("fat jet has no '{tagger}' field")))
}

fn event_flags(ctx: &CutContext<'_>) -> Result<bool> {
    let mut names: Vec<&String> = ctx.params.event_flags.get(ctx.year).map(|v| v.iter().collect()).unwrap_or_default();
    if !ctx.is_mc
        && let Some(extra) = ctx.params.event_flags_data.get(ctx.year)
    {
        names.extend(extra);
    }
    for name in names {
        match ctx.event.flag(name) {
            Some(true) => {}
            Some(false) => return Ok(false),
            None => return Err(Error::Input(format!("event flag '{name}' is not stored in the input"))),
        }
    }
    Ok(true)
}

/// Evaluate a cut list.
///
/// Returns `None` when the event fails, otherwise the combined mask of the
/// `FatJetGood` jets (all true if the list has no jet-level cut).
pub fn evaluate_cuts(cuts: &[Cut], ctx: &CutContext<'_>) -> Result<Option<Vec<bool>>> {
    let n_jets = ctx.objects.map(|o| o.fatjets_good.len()).unwrap_or(0);
    let mut jets = vec![true; n_jets];
    let mut jet_level = false;
    for cut in cuts {
        match cut.evaluate(ctx)? {
            CutMask::Event(false) => return Ok(None),
            CutMask::Event(true) => {}
            CutMask::Jets(m) => {
                jet_level = true;
                for (a, b) in jets.iter_mut().zip(m) {
                    *a &= b;
                }
            }
        }
    }
    if jet_level && !jets.iter().any(|&p| p) {
        return Ok(None);
    }
    Ok(Some(jets))
}

/// A named cut list: a category or a subsample definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Name
    pub name: String,
    /// Cuts, all required
    pub cuts: Vec<Cut>,
}

impl Selection {
    /// Named selection.
    pub fn new(name: impl Into<String>, cuts: Vec<Cut>) -> Self {
        Self { name: name.into(), cuts }
    }

    /// See [`evaluate_cuts`].
    pub fn evaluate(&self, ctx: &CutContext<'_>) -> Result<Option<Vec<bool>>> {
        evaluate_cuts(&self.cuts, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_events::FatJet;
    use std::collections::BTreeMap;

    fn jet(pt: f64, msd: f64, tau21: f64, xbb: f64) -> FatJet {
        FatJet {
            pt,
            msoftdrop: msd,
            tau21,
            extra: BTreeMap::from([("particleNetMD_Xbb".to_string(), xbb)]),
            ..Default::default()
        }
    }

    fn params() -> Parameters {
        let mut p = Parameters::default();
        p.hlt_triggers.insert(
            "2022_preEE".into(),
            BTreeMap::from([("BTagMu".to_string(), vec!["BTagMu_AK8Jet300_Mu5".to_string()])]),
        );
        p.event_flags.insert("2022_preEE".into(), vec!["goodVertices".into()]);
        p
    }

    #[test]
    fn yaml_cuts_parse() {
        let yaml = "- {type: passthrough}\n- {type: n_obj_min, coll: FatJet, n: 1, pt: 200}\n- {type: pt_bin, lo: 425}\n- {type: flavor, flavor: bb}\n- {type: hlt}\n";
        let cuts: Vec<Cut> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(cuts[1], Cut::NObjMin { coll: "FatJet".into(), n: 1, pt: Some(200.0) });
        assert_eq!(cuts[2].name(), "Pt-425toInf");
        assert_eq!(cuts[3], Cut::Flavor { flavor: Flavor::BB });
        assert_eq!(cuts[4], Cut::Hlt { family: "BTagMu".into() });
    }

    #[test]
    fn event_level_cuts() {
        let p = params();
        let mut ev = Event { n_pv_good: 3, fatjets: vec![jet(250.0, 35.0, 0.3, 0.1)], ..Default::default() };
        ev.hlt.insert("BTagMu_AK8Jet300_Mu5".into(), true);
        ev.flags.insert("goodVertices".into(), true);
        let ctx = CutContext { event: &ev, objects: None, year: "2022_preEE", is_mc: true, params: &p, lumi_mask: None };
        let skim = vec![
            Cut::NPvGood { min: 1 },
            Cut::EventFlags,
            Cut::GoldenJson,
            Cut::Hlt { family: "BTagMu".into() },
            Cut::NObjMin { coll: "FatJet".into(), n: 1, pt: Some(200.0) },
            Cut::NObjMinMsd { coll: "FatJet".into(), n: 1, msd: 30.0 },
        ];
        assert_eq!(evaluate_cuts(&skim, &ctx).unwrap(), Some(vec![]));
        assert_eq!(evaluate_cuts(&[Cut::NObjMin { coll: "Muon".into(), n: 2, pt: Some(3.0) }], &ctx).unwrap(), None);

        // data without a lumi mask is a configuration error
        let data = CutContext { is_mc: false, ..ctx };
        assert!(Cut::GoldenJson.evaluate(&data).is_err());
        // jet-level cuts need the preselected jets
        assert!(Cut::Tau21Max { max: 0.3 }.evaluate(&data).is_err());

        let bare = Event::default();
        let ctx = CutContext { event: &bare, objects: None, year: "2022_preEE", is_mc: true, params: &p, lumi_mask: None };
        assert!(Cut::EventFlags.evaluate(&ctx).unwrap_err().to_string().contains("goodVertices"));
        assert_eq!(Cut::Hlt { family: "BTagMu".into() }.evaluate(&ctx).unwrap(), CutMask::Event(false));
    }

    #[test]
    fn jet_masks_combine_per_jet() {
        let p = params();
        let ev = Event::default();
        let objects = Objects {
            fatjets_good: vec![jet(500.0, 100.0, 0.5, 0.9), jet(320.0, 90.0, 0.2, 0.1)],
            ..Default::default()
        };
        let ctx = CutContext {
            event: &ev,
            objects: Some(&objects),
            year: "2022_preEE",
            is_mc: true,
            params: &p,
            lumi_mask: None,
        };
        let pass = Selection::new(
            "x",
            vec![
                Cut::PtMsdWindow { pt: 300.0, msd_lo: 80.0, msd_hi: 170.0 },
                Cut::TaggerPass { tagger: "particleNetMD_Xbb".into(), wp: 0.5 },
            ],
        );
        assert_eq!(pass.evaluate(&ctx).unwrap(), Some(vec![true, false]));
        // jet 0 passes the tagger, jet 1 passes tau21; no single jet passes both
        let none = Selection::new(
            "y",
            vec![Cut::TaggerPass { tagger: "particleNetMD_Xbb".into(), wp: 0.5 }, Cut::Tau21Max { max: 0.3 }],
        );
        assert_eq!(none.evaluate(&ctx).unwrap(), None);
        assert_eq!(
            Cut::PtBin { lo: 300.0, hi: Some(350.0) }.evaluate(&ctx).unwrap(),
            CutMask::Jets(vec![false, true])
        );
        assert!(Cut::TaggerFail { tagger: "missing".into(), wp: 0.1 }.evaluate(&ctx).is_err());
        assert_eq!(Cut::Flavor { flavor: Flavor::L }.evaluate(&ctx).unwrap(), CutMask::Jets(vec![false, false]));
    }
}
