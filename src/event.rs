use std::ops::Index;

use noisy_float::prelude::*;
use particle_id::ParticleID;

use crate::four_vector::FourVector;

/// Event weights
///
/// The first entry is the central weight, followed by the named
/// weights requested when parsing, in the order they were requested.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Weights(Vec<N64>);

impl Weights {
    /// The central weight
    pub fn central(&self) -> N64 {
        self.0.first().copied().unwrap_or_default()
    }

    /// The named weight with the given position in the list of
    /// requested weight names
    pub fn named(&self, idx: usize) -> Option<N64> {
        self.0.get(idx + 1).copied()
    }

    /// Number of weights, including the central weight
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no weights at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &N64> {
        self.0.iter()
    }
}

impl Index<usize> for Weights {
    type Output = N64;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.0[idx]
    }
}

impl From<Vec<N64>> for Weights {
    fn from(w: Vec<N64>) -> Self {
        Self(w)
    }
}

/// Builder for [Event]
#[derive(Clone, Debug, Default)]
pub struct EventBuilder {
    weights: Vec<N64>,
    outgoing_by_pid: Vec<(ParticleID, FourVector)>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            weights: Vec::new(),
            outgoing_by_pid: Vec::with_capacity(cap),
        }
    }

    pub fn add_outgoing(&mut self, pid: ParticleID, p: FourVector) -> &mut Self {
        self.outgoing_by_pid.push((pid, p));
        self
    }

    /// Add a weight. The first added weight is the central one.
    pub fn add_weight(&mut self, weight: N64) -> &mut Self {
        self.weights.push(weight);
        self
    }

    /// Multiply all momenta by the given factor
    pub fn rescale_energies(&mut self, factor: N64) -> &mut Self {
        for (_, p) in &mut self.outgoing_by_pid {
            *p *= factor;
        }
        self
    }

    pub fn build(self) -> Event {
        Event {
            weights: Weights(self.weights),
            outgoing_by_pid: compress_outgoing(self.outgoing_by_pid),
        }
    }
}

impl From<EventBuilder> for Event {
    fn from(b: EventBuilder) -> Self {
        b.build()
    }
}

fn compress_outgoing(
    mut out: Vec<(ParticleID, FourVector)>,
) -> Vec<(ParticleID, Box<[FourVector]>)> {
    out.sort_unstable_by(|a, b| b.cmp(a));
    let mut outgoing_by_pid: Vec<(ParticleID, Vec<_>)> = Vec::new();
    for (id, p) in out {
        match outgoing_by_pid.last_mut() {
            Some((pid, v)) if *pid == id => v.push(p),
            _ => outgoing_by_pid.push((id, vec![p])),
        }
    }
    outgoing_by_pid
        .into_iter()
        .map(|(id, p)| (id, p.into_boxed_slice()))
        .collect()
}

/// A scattering event: weights and outgoing particles
///
/// Outgoing particles are grouped by particle id, in descending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub weights: Weights,
    outgoing_by_pid: Vec<(ParticleID, Box<[FourVector]>)>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outgoing(&self) -> &[(ParticleID, Box<[FourVector]>)] {
        self.outgoing_by_pid.as_slice()
    }

    pub fn outgoing_with_pid(&self, pid: ParticleID) -> &[FourVector] {
        self.outgoing_by_pid
            .binary_search_by(|probe| pid.cmp(&probe.0))
            .map(|idx| &*self.outgoing_by_pid[idx].1)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use particle_id::sm_elementary_particles::{electron, gluon, photon};

    #[test]
    fn grouped_by_pid() {
        let mut ev = EventBuilder::new();
        ev.add_weight(n64(2.))
            .add_outgoing(gluon, [1., 0., 1., 0.].into())
            .add_outgoing(electron, [2., 2., 0., 0.].into())
            .add_outgoing(gluon, [3., 0., 0., 3.].into());
        let ev = ev.build();
        assert_eq!(ev.weights.central(), n64(2.));
        assert_eq!(ev.weights.named(0), None);
        assert_eq!(ev.outgoing().len(), 2);
        assert_eq!(ev.outgoing_with_pid(gluon).len(), 2);
        assert_eq!(ev.outgoing_with_pid(electron).len(), 1);
        assert!(ev.outgoing_with_pid(photon).is_empty());
    }
}
