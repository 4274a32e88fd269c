//! Secondary-vertex mass observables.

use mt_events::{Candidate, FatJet, LorentzVector, SecondaryVertex};

/// Value of a log-mass observable when the mass is zero.
pub const LOG_MASS_DEFAULT: f64 = -5.0;

/// Vertex mass corrected for missing momentum:
/// `sqrt(m² + p² sin²θ) + p sinθ`, θ the vertex pointing angle.
pub fn corrected_mass(sv: &SecondaryVertex) -> f64 {
    let p = sv.p4().p();
    let pt_miss = p * sv.p_angle.sin();
    (sv.mass * sv.mass + pt_miss * pt_miss).sqrt() + pt_miss
}

/// `ln(m)`, or [`LOG_MASS_DEFAULT`] when `m` is not positive.
pub fn log_mass(m: f64) -> f64 {
    if m > 0.0 { m.ln() } else { LOG_MASS_DEFAULT }
}

/// Mass of the summed four-vectors.
pub fn summed_mass(svs: &[&SecondaryVertex]) -> f64 {
    svs.iter().map(|s| s.p4()).sum::<LorentzVector>().mass()
}

/// Mass of the vertex with the largest flight significance, 0 if none.
pub fn sv1_mass(svs: &[&SecondaryVertex]) -> f64 {
    svs.iter()
        .copied()
        .fold(None, |best: Option<&SecondaryVertex>, s| match best {
            Some(b) if b.dxy_sig >= s.dxy_sig => Some(b),
            _ => Some(s),
        })
        .map(|s| s.mass)
        .unwrap_or(0.0)
}

/// Mass of the summed vertices projected onto the jet axis.
pub fn projected_mass(jet: &FatJet, svs: &[&SecondaryVertex]) -> f64 {
    if svs.is_empty() {
        return 0.0;
    }
    let sum: LorentzVector = svs.iter().map(|s| s.p4()).sum();
    sum.project_onto(&jet.p4()).mass()
}

/// Fill the SV observables of `jet` from the vertices at `indices`.
///
/// The vertices are expected to carry their corrected mass already.
pub fn assign_sv_observables(jet: &mut FatJet, svs: &[SecondaryVertex], indices: Vec<usize>) {
    let matched: Vec<&SecondaryVertex> = indices.iter().filter_map(|&i| svs.get(i)).collect();
    jet.sumcorr_sv_mass = summed_mass(&matched);
    jet.logsumcorr_sv_mass = log_mass(jet.sumcorr_sv_mass);
    jet.sv1_mass = sv1_mass(&matched);
    jet.logsv1_mass = log_mass(jet.sv1_mass);
    let proj = projected_mass(jet, &matched);
    jet.extra.insert("projmass".into(), proj);
    jet.extra.insert("logprojmass".into(), log_mass(proj));
    jet.matched_svs = indices;
}
