use std::iter::Sum;

use jetty::PseudoJet;
use noisy_float::prelude::*;
use serde::{Deserialize, Serialize};

/// A basic four-vector
///
/// The zero component is the energy component. The remainder are
/// the spatial components.
#[derive(
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Debug,
    Clone,
    Copy,
    Default,
)]
pub struct FourVector {
    pt: N64,
    p: [N64; 4],
}

impl FourVector {
    /// Construct a new four-vector with all components set to zero
    pub fn new() -> Self {
        Self::default()
    }

    /// The spatial norm \sqrt{\sum v_i^2} with i = 1,2,3
    pub fn spatial_norm(&self) -> N64 {
        self.spatial_norm_sq().sqrt()
    }

    /// The square \sum v_i^2 with i = 1,2,3 of the spatial norm
    pub fn spatial_norm_sq(&self) -> N64 {
        self.p.iter().skip(1).map(|e| *e * *e).sum()
    }

    /// The scalar transverse momentum
    pub fn pt(&self) -> N64 {
        self.pt
    }

    const fn len() -> usize {
        4
    }

    fn update_pt(&mut self) {
        self.pt = (self.p[1] * self.p[1] + self.p[2] * self.p[2]).sqrt();
    }

    /// The invariant mass
    ///
    /// Spacelike vectors have a negative mass square, in which case
    /// minus the square root of its absolute value is returned.
    pub fn m(&self) -> f64 {
        let m_sq = self.m_sq().raw();
        if m_sq >= 0. {
            m_sq.sqrt()
        } else {
            -(-m_sq).sqrt()
        }
    }

    /// The invariant mass square v_0^2 - \sum v_i^2 with i = 1,2,3
    pub fn m_sq(&self) -> N64 {
        self.p[0] * self.p[0] - self.spatial_norm_sq()
    }

    /// The pseudorapidity
    ///
    /// Vectors along the beam axis have infinite pseudorapidity,
    /// the null vector has pseudorapidity zero.
    pub fn eta(&self) -> f64 {
        let pt = self.pt.raw();
        let pz = self.p[3].raw();
        if pt == 0. {
            return match pz.partial_cmp(&0.) {
                Some(std::cmp::Ordering::Greater) => f64::INFINITY,
                Some(std::cmp::Ordering::Less) => f64::NEG_INFINITY,
                _ => 0.,
            };
        }
        (pz / pt).asinh()
    }

    /// The azimuthal angle in the range (-π, π]
    pub fn phi(&self) -> f64 {
        self.p[2].raw().atan2(self.p[1].raw())
    }

    /// The distance \sqrt{Δη^2 + Δφ^2} in the pseudorapidity-azimuth plane
    pub fn delta_r(&self, other: &FourVector) -> f64 {
        let deta = self.eta() - other.eta();
        let dphi = delta_phi(self.phi(), other.phi());
        (deta * deta + dphi * dphi).sqrt()
    }
}

fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    use std::f64::consts::PI;
    let mut dphi = (phi1 - phi2).abs();
    if dphi > PI {
        dphi = 2. * PI - dphi;
    }
    dphi
}

impl std::convert::From<[N64; 4]> for FourVector {
    fn from(p: [N64; 4]) -> FourVector {
        let mut res = FourVector {
            p,
            pt: std::default::Default::default(),
        };
        res.update_pt();
        res
    }
}

impl std::convert::From<[f64; 4]> for FourVector {
    fn from(p: [f64; 4]) -> FourVector {
        [n64(p[0]), n64(p[1]), n64(p[2]), n64(p[3])].into()
    }
}

impl std::ops::Index<usize> for FourVector {
    type Output = N64;

    fn index(&self, i: usize) -> &Self::Output {
        &self.p[i]
    }
}

impl std::ops::AddAssign for FourVector {
    fn add_assign(&mut self, rhs: FourVector) {
        for i in 0..Self::len() {
            self.p[i] += rhs[i]
        }
        self.update_pt();
    }
}

impl std::ops::Add for FourVector {
    type Output = Self;

    fn add(mut self, rhs: FourVector) -> Self::Output {
        self += rhs;
        self
    }
}

impl std::ops::MulAssign<N64> for FourVector {
    fn mul_assign(&mut self, rhs: N64) {
        for p in &mut self.p {
            *p *= rhs;
        }
        self.update_pt();
    }
}

impl Sum for FourVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(FourVector::new(), |acc, p| acc + p)
    }
}

impl<'a> Sum<&'a FourVector> for FourVector {
    fn sum<I: Iterator<Item = &'a FourVector>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl From<PseudoJet> for FourVector {
    fn from(p: PseudoJet) -> Self {
        [p.e(), p.px(), p.py(), p.pz()].into()
    }
}

impl From<&FourVector> for PseudoJet {
    fn from(p: &FourVector) -> Self {
        [p[0], p[1], p[2], p[3]].into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinematics() {
        let p = FourVector::from([5., 3., 0., 4.]);
        assert_eq!(p.pt(), n64(3.));
        assert!(p.m().abs() < 1e-12);
        assert!((p.eta() - (4f64 / 3.).asinh()).abs() < 1e-12);
        assert_eq!(p.phi(), 0.);

        let q = FourVector::from([5., -3., 0., 4.]);
        let sum = p + q;
        assert!((sum.m() - 6.).abs() < 1e-12);
        assert!((p.delta_r(&q) - std::f64::consts::PI).abs() < 1e-12);

        let along_beam = FourVector::from([1., 0., 0., -1.]);
        assert_eq!(along_beam.eta(), f64::NEG_INFINITY);
        assert_eq!(FourVector::new().eta(), 0.);
    }
}
