use std::{
    fmt::{self, Display},
    str::FromStr,
};

use jetty::{anti_kt_f, cambridge_aachen_f, kt_f, Cluster, PseudoJet};
use noisy_float::prelude::*;
use particle_id::{
    sm_elementary_particles::{bottom, electron, gluon, muon, photon},
    ParticleID,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    event::{Event, Weights},
    four_vector::FourVector,
    traits::Reconstruct,
};

/// A dressed charged lepton
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Lepton {
    /// Particle id of the bare lepton
    pub id: ParticleID,
    /// Momentum including the photons clustered to the lepton
    pub p: FourVector,
}

impl Lepton {
    pub fn is_electron(&self) -> bool {
        self.id.abs() == electron
    }

    pub fn is_muon(&self) -> bool {
        self.id.abs() == muon
    }

    /// Electric charge in units of the positron charge
    pub fn charge(&self) -> i32 {
        if self.id.id() > 0 {
            -1
        } else {
            1
        }
    }
}

/// Event after reconstruction of physics objects
///
/// All objects are ordered by descending transverse momentum.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoEvent {
    pub weights: Weights,
    pub leptons: Vec<Lepton>,
    pub jets: Vec<FourVector>,
    pub photons: Vec<FourVector>,
    /// Sum of neutrino momenta
    pub missing: FourVector,
}

impl RecoEvent {
    /// Restore the ordering by descending transverse momentum
    pub fn sort_by_pt(&mut self) {
        self.leptons.sort_by(|a, b| b.p.pt().cmp(&a.p.pt()));
        self.jets.sort_by(|a, b| b.pt().cmp(&a.pt()));
        self.photons.sort_by(|a, b| b.pt().cmp(&a.pt()));
    }
}

/// Reconstruction of jets, dressed leptons, photons and missing momentum
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Reconstruction {
    jet_def: JetDefinition,
    lepton_def: LeptonDefinition,
    photon_def: Option<PhotonDefinition>,
}

impl Reconstruction {
    /// Construct a new reconstruction using the given jet clustering
    pub fn new(jet_def: JetDefinition) -> Self {
        Self {
            jet_def,
            lepton_def: Default::default(),
            photon_def: None,
        }
    }

    /// Set the lepton definition
    pub fn with_lepton_def(mut self, lepton_def: LeptonDefinition) -> Self {
        self.lepton_def = lepton_def;
        self
    }

    /// Enable photon isolation
    pub fn with_photon_def(mut self, photon_def: PhotonDefinition) -> Self {
        self.photon_def = Some(photon_def);
        self
    }

    fn is_isolated(
        &self,
        p: &FourVector,
        event: &[(ParticleID, Box<[FourVector]>)],
    ) -> bool {
        let Some(photon_def) = self.photon_def.as_ref() else {
            return true;
        };
        let photon_pt = p.pt();
        if photon_pt < photon_def.min_pt {
            return false;
        }
        let p = PseudoJet::from(p);
        let mut cone_mom = PseudoJet::new();
        for (e_id, particles) in event {
            // ignore neutrinos/muons in isolation cone
            if !e_id.abs().is_neutrino() && !is_muon(e_id.abs()) {
                for ep in particles.iter() {
                    let ep = PseudoJet::from(ep);
                    if ep.delta_r(&p) < photon_def.radius {
                        cone_mom += ep;
                    }
                }
            }
        }
        // remove momentum of the photon itself from the cone
        cone_mom -= p;
        let e_fraction = n64(photon_def.min_e_fraction);
        let cone_et = (cone_mom.e() * cone_mom.e()
            - cone_mom.pz() * cone_mom.pz())
        .sqrt();
        photon_pt > e_fraction * cone_et
    }
}

impl Reconstruct for Reconstruction {
    type Error = std::convert::Infallible;

    fn reconstruct(&self, ev: Event) -> Result<RecoEvent, Self::Error> {
        let outgoing = ev.outgoing();
        let mut reco = RecoEvent::default();
        let mut bare_leptons = Vec::new();
        let mut photons = Vec::new();
        let mut to_jets = Vec::new();

        for (id, out) in outgoing {
            if id.abs().is_neutrino() {
                reco.missing = out.iter().fold(reco.missing, |acc, p| acc + *p);
            } else if is_light_lepton(id.abs()) {
                bare_leptons.extend(out.iter().map(|p| Lepton { id: *id, p: *p }));
            } else if is_photon(*id) {
                photons.extend(out.iter().copied());
            } else if is_parton(*id) || is_hadron(id.abs()) {
                to_jets.extend(out.iter().map(PseudoJet::from));
            }
        }

        let dressing_radius = self.lepton_def.dressing_radius;
        for p in photons {
            let closest = bare_leptons
                .iter_mut()
                .map(|l| (l.p.delta_r(&p), l))
                .filter(|(dr, _)| *dr < dressing_radius)
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, lepton)) = closest {
                lepton.p += p;
            } else if self.is_isolated(&p, outgoing) {
                reco.photons.push(p);
            } else {
                to_jets.push(PseudoJet::from(&p));
            }
        }

        reco.leptons = bare_leptons
            .into_iter()
            .filter(|l| self.lepton_def.accepts(&l.p))
            .collect();
        reco.jets = cluster(to_jets, &self.jet_def)
            .into_iter()
            .map(FourVector::from)
            .collect();
        reco.weights = ev.weights;
        reco.sort_by_pt();
        Ok(reco)
    }
}

/// Placeholder for an unknown jet algorithm
#[derive(Debug, Clone, Error)]
pub struct UnknownJetAlgorithm(String);

impl Display for UnknownJetAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown jet algorithm: {}", self.0)
    }
}

impl FromStr for JetAlgorithm {
    type Err = UnknownJetAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anti_kt" | "antikt" | "anti-kt" => Ok(Self::AntiKt),
            "kt" => Ok(Self::Kt),
            "Cambridge/Aachen" | "Cambridge-Aachen" | "Cambridge_Aachen"
            | "cambridge/aachen" | "cambridge-aachen" | "cambridge_aachen" => {
                Ok(Self::CambridgeAachen)
            }
            _ => Err(UnknownJetAlgorithm(s.to_string())),
        }
    }
}

/// Jet clustering algorithms
#[derive(Deserialize, Serialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum JetAlgorithm {
    /// The [anti-kt](https://arxiv.org/abs/0802.1189) algorithm
    #[default]
    AntiKt,
    /// The [Cambridge](https://arxiv.org/abs/hep-ph/9707323)/[Aachen](https://arxiv.org/abs/hep-ph/9907280) algorithm
    CambridgeAachen,
    /// The [kt](https://arxiv.org/abs/hep-ph/9305266) algorithm
    Kt,
}

/// Definition of a jet
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq)]
pub struct JetDefinition {
    /// Jet algorithm
    pub algorithm: JetAlgorithm,
    /// Jet radius parameter
    pub radius: f64,
    /// Minimum jet transverse momentum
    pub min_pt: f64,
}

impl Default for JetDefinition {
    fn default() -> Self {
        Self {
            algorithm: JetAlgorithm::AntiKt,
            radius: 0.4,
            min_pt: 30.,
        }
    }
}

/// Definition of a dressed lepton
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq)]
pub struct LeptonDefinition {
    /// Photons closer than this distance are added to the lepton
    pub dressing_radius: f64,
    /// Minimum transverse momentum
    pub min_pt: f64,
    /// Maximum absolute pseudorapidity
    pub max_eta: f64,
}

impl LeptonDefinition {
    fn accepts(&self, p: &FourVector) -> bool {
        p.pt() >= self.min_pt && p.eta().abs() < self.max_eta
    }
}

impl Default for LeptonDefinition {
    fn default() -> Self {
        Self {
            dressing_radius: 0.1,
            min_pt: 10.,
            max_eta: 2.5,
        }
    }
}

/// Definition of an isolated photon
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq)]
pub struct PhotonDefinition {
    /// Minimum energy fraction
    pub min_e_fraction: f64,
    /// Radius parameter
    pub radius: f64,
    /// Minimum transverse momentum
    pub min_pt: f64,
}

pub(crate) fn is_parton(id: ParticleID) -> bool {
    id.id().abs() <= bottom.id() || id == gluon
}

pub(crate) fn is_hadron(id: ParticleID) -> bool {
    particle_id::hadrons::HADRONS.contains(&id.abs())
}

pub(crate) fn is_light_lepton(id: ParticleID) -> bool {
    id == electron || id == muon
}

pub(crate) fn is_photon(id: ParticleID) -> bool {
    id == photon
}

pub(crate) fn is_muon(id: ParticleID) -> bool {
    id == muon
}

/// Cluster the given `partons` into jets
pub fn cluster(
    partons: Vec<PseudoJet>,
    jet_def: &JetDefinition,
) -> Vec<PseudoJet> {
    let minpt2 = jet_def.min_pt * jet_def.min_pt;
    let cut = |jet: PseudoJet| jet.pt2() > minpt2;
    let r = jet_def.radius;
    match jet_def.algorithm {
        JetAlgorithm::AntiKt => partons.cluster_if(anti_kt_f(r), cut),
        JetAlgorithm::Kt => partons.cluster_if(kt_f(r), cut),
        JetAlgorithm::CambridgeAachen => {
            partons.cluster_if(cambridge_aachen_f(r), cut)
        }
    }
}
