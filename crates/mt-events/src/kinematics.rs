//! Four-vectors and angular distances.

use std::f64::consts::PI;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul};

/// Cartesian Lorentz vector `(px, py, pz, E)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LorentzVector {
    /// x momentum
    pub px: f64,
    /// y momentum
    pub py: f64,
    /// z momentum
    pub pz: f64,
    /// energy
    pub e: f64,
}

impl LorentzVector {
    /// Construct from Cartesian components.
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Construct from collider coordinates.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let e = (px * px + py * py + pz * pz + mass * mass).sqrt();
        Self { px, py, pz, e }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Momentum magnitude.
    pub fn p(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    /// Pseudorapidity (0 for a vector along the beam axis with zero pt).
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return 0.0;
        }
        (self.pz / pt).asinh()
    }

    /// Azimuthal angle in (-π, π].
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Squared invariant mass.
    pub fn mass2(&self) -> f64 {
        self.e * self.e - self.px * self.px - self.py * self.py - self.pz * self.pz
    }

    /// Invariant mass, clamped at zero for spacelike rounding residue.
    pub fn mass(&self) -> f64 {
        self.mass2().max(0.0).sqrt()
    }

    /// Minkowski product with metric (+, -, -, -).
    pub fn dot(&self, other: &LorentzVector) -> f64 {
        self.e * other.e - self.px * other.px - self.py * other.py - self.pz * other.pz
    }

    /// Projection of `self` onto `axis`: `(self·axis / axis·axis) axis`.
    ///
    /// Returns the zero vector when `axis` is lightlike or null.
    pub fn project_onto(&self, axis: &LorentzVector) -> LorentzVector {
        let norm = axis.dot(axis);
        if norm == 0.0 {
            return LorentzVector::default();
        }
        *axis * (self.dot(axis) / norm)
    }
}

impl Add for LorentzVector {
    type Output = LorentzVector;

    fn add(self, o: LorentzVector) -> LorentzVector {
        LorentzVector::new(self.px + o.px, self.py + o.py, self.pz + o.pz, self.e + o.e)
    }
}

impl AddAssign for LorentzVector {
    fn add_assign(&mut self, o: LorentzVector) {
        *self = *self + o;
    }
}

impl Mul<f64> for LorentzVector {
    type Output = LorentzVector;

    fn mul(self, k: f64) -> LorentzVector {
        LorentzVector::new(self.px * k, self.py * k, self.pz * k, self.e * k)
    }
}

impl Sum for LorentzVector {
    fn sum<I: Iterator<Item = LorentzVector>>(iter: I) -> Self {
        iter.fold(LorentzVector::default(), |a, b| a + b)
    }
}

/// Azimuthal difference wrapped into [-π, π).
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    (phi1 - phi2 + PI).rem_euclid(2.0 * PI) - PI
}

/// Angular distance `sqrt(Δη² + Δφ²)`.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    (deta * deta + dphi * dphi).sqrt()
}

/// Anything with collider kinematics.
pub trait Candidate {
    /// Transverse momentum.
    fn pt(&self) -> f64;
    /// Pseudorapidity.
    fn eta(&self) -> f64;
    /// Azimuth.
    fn phi(&self) -> f64;
    /// Mass.
    fn mass(&self) -> f64;

    /// Four-vector.
    fn p4(&self) -> LorentzVector {
        LorentzVector::from_pt_eta_phi_m(self.pt(), self.eta(), self.phi(), self.mass())
    }

    /// Angular distance to another candidate.
    fn delta_r<C: Candidate + ?Sized>(&self, other: &C) -> f64 {
        delta_r(self.eta(), self.phi(), other.eta(), other.phi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn collider_coordinates_round_trip() {
        let v = LorentzVector::from_pt_eta_phi_m(45.0, -1.2, 2.9, 5.0);
        assert_relative_eq!(v.pt(), 45.0, max_relative = 1e-12);
        assert_relative_eq!(v.eta(), -1.2, max_relative = 1e-12);
        assert_relative_eq!(v.phi(), 2.9, max_relative = 1e-12);
        assert_relative_eq!(v.mass(), 5.0, max_relative = 1e-9);
    }

    #[test]
    fn invariant_mass_of_back_to_back_pair() {
        let a = LorentzVector::from_pt_eta_phi_m(50.0, 0.0, 0.0, 0.0);
        let b = LorentzVector::from_pt_eta_phi_m(50.0, 0.0, PI, 0.0);
        let s: LorentzVector = [a, b].into_iter().sum();
        assert_relative_eq!(s.mass(), 100.0, max_relative = 1e-12);
        assert!(s.pt() < 1e-9);
    }

    #[test]
    fn delta_phi_wraps() {
        assert_relative_eq!(delta_phi(3.0, -3.0), 6.0 - 2.0 * PI, epsilon = 1e-12);
        assert_relative_eq!(delta_phi(-3.0, 3.0), 2.0 * PI - 6.0, epsilon = 1e-12);
        assert_relative_eq!(delta_r(0.5, 3.1, 0.5, -3.1), 2.0 * PI - 6.2, epsilon = 1e-12);
    }

    #[test]
    fn projection_scales_the_axis() {
        let jet = LorentzVector::from_pt_eta_phi_m(400.0, 0.3, 1.0, 90.0);
        let half = jet * 0.5;
        let proj = half.project_onto(&jet);
        assert_relative_eq!(proj.mass(), 45.0, max_relative = 1e-9);
        assert_eq!(half.project_onto(&LorentzVector::default()), LorentzVector::default());
    }
}
