//! ΔR matching between object collections.

use mt_events::{Candidate, FatJet, Muon, SecondaryVertex, SubJet};

/// Cone used to attach muons and SVs to AK8 jets.
pub const FATJET_CONE: f64 = 0.8;
/// Cone used to attach a muon to a subjet.
pub const SUBJET_CONE: f64 = 0.4;

/// One matched object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Index into the second collection
    pub index: usize,
    /// ΔR to the object it was matched to
    pub dr: f64,
}

/// Assign every `obj2` to its closest `obj1`, keeping it only if the distance
/// is below that `obj1`'s radius.
///
/// Returns, per `obj1`, the matched `obj2` in input order. Each `obj2` ends
/// up in at most one list. Ties go to the first `obj1`.
pub fn run_deltar_matching<A: Candidate, B: Candidate>(
    obj1: &[A],
    obj2: &[B],
    radius: impl Fn(usize) -> f64,
) -> Vec<Vec<Match>> {
    let mut out = vec![Vec::new(); obj1.len()];
    for (j, b) in obj2.iter().enumerate() {
        let closest = obj1
            .iter()
            .enumerate()
            .map(|(i, a)| (i, a.delta_r(b)))
            .fold(None, |best: Option<(usize, f64)>, (i, dr)| match best {
                Some((_, d)) if d <= dr => best,
                _ => Some((i, dr)),
            });
        if let Some((i, dr)) = closest
            && dr < radius(i)
        {
            out[i].push(Match { index: j, dr });
        }
    }
    out
}

/// Muons within [`FATJET_CONE`] of each jet.
pub fn muons_matched_to_fatjet(jets: &[FatJet], muons: &[Muon]) -> Vec<Vec<Match>> {
    run_deltar_matching(jets, muons, |_| FATJET_CONE)
}

/// Secondary vertices within [`FATJET_CONE`] of each jet.
pub fn sv_matched_to_fatjet(jets: &[FatJet], svs: &[SecondaryVertex]) -> Vec<Vec<Match>> {
    run_deltar_matching(jets, svs, |_| FATJET_CONE)
}

/// Leading muon matched to subjet `pos` (0 or 1) of each jet.
///
/// With `unique`, the cone shrinks to half the distance between the two
/// subjets so that a muon cannot be claimed by both; jets missing either
/// subjet then get no match.
pub fn muon_matched_to_subjet(
    jets: &[FatJet],
    subjets: &[SubJet],
    muons: &[Muon],
    pos: usize,
    unique: bool,
) -> Vec<Option<Match>> {
    let mut owners = Vec::new();
    let mut cones = Vec::new();
    let mut targets = Vec::new();
    for (ij, jet) in jets.iter().enumerate() {
        let idx = jet.subjet_indices(subjets.len());
        let Some(sj) = idx.get(pos).copied().flatten() else { continue };
        let cone = if unique {
            let (Some(a), Some(b)) = (idx[0], idx[1]) else { continue };
            SUBJET_CONE.min(0.5 * subjets[a].delta_r(&subjets[b]))
        } else {
            SUBJET_CONE
        };
        owners.push(ij);
        cones.push(cone);
        targets.push(subjets[sj].clone());
    }
    let matched = run_deltar_matching(&targets, muons, |i| cones[i]);
    let mut out = vec![None; jets.len()];
    for (k, m) in matched.into_iter().enumerate() {
        out[owners[k]] = m.first().copied();
    }
    out
}
