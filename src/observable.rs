use itertools::Itertools;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{four_vector::FourVector, reco::RecoEvent};

/// Nominal Z boson mass in GeV
pub const Z_MASS: f64 = 91.1876;

/// Named kinematic quantities of a reconstructed event
///
/// Observables that are undefined for a given event, e.g. the
/// transverse momentum of the third lepton in an event with two
/// leptons, evaluate to NaN. NaN values are never histogrammed and
/// fail every comparison.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Observable {
    /// Number of charged leptons
    #[strum(serialize = "n_l")]
    NLeptons,
    /// Number of electrons
    #[strum(serialize = "n_e")]
    NElectrons,
    /// Number of muons
    #[strum(serialize = "n_mu")]
    NMuons,
    NJets,
    NPhotons,
    /// Sum of lepton charges
    #[strum(serialize = "q_l")]
    LeptonCharge,
    #[strum(serialize = "pt_l1")]
    PtL1,
    #[strum(serialize = "pt_l2")]
    PtL2,
    #[strum(serialize = "pt_l3")]
    PtL3,
    #[strum(serialize = "eta_l1")]
    EtaL1,
    #[strum(serialize = "eta_l2")]
    EtaL2,
    #[strum(serialize = "eta_l3")]
    EtaL3,
    #[strum(serialize = "pt_j1")]
    PtJ1,
    #[strum(serialize = "pt_j2")]
    PtJ2,
    #[strum(serialize = "eta_j1")]
    EtaJ1,
    #[strum(serialize = "eta_j2")]
    EtaJ2,
    /// Transverse momentum of the leading photon
    #[strum(serialize = "pt_a1")]
    PtA1,
    /// Mass of the opposite-sign same-flavour lepton pair closest to the Z mass
    MLl,
    /// Transverse momentum of the Z candidate pair
    PtLl,
    /// Mass of the three leading leptons
    #[strum(serialize = "m_3l")]
    M3l,
    /// Mass of the two leading jets
    MJj,
    /// Pseudorapidity difference of the two leading jets
    DetaJj,
    /// Missing transverse momentum
    Met,
    /// Scalar sum of jet transverse momenta
    Ht,
}

impl Observable {
    /// Value of the observable in the given event
    pub fn value(&self, ev: &RecoEvent) -> f64 {
        use Observable::*;
        match self {
            NLeptons => ev.leptons.len() as f64,
            NElectrons => ev.leptons.iter().filter(|l| l.is_electron()).count() as f64,
            NMuons => ev.leptons.iter().filter(|l| l.is_muon()).count() as f64,
            NJets => ev.jets.len() as f64,
            NPhotons => ev.photons.len() as f64,
            LeptonCharge => ev.leptons.iter().map(|l| l.charge()).sum::<i32>() as f64,
            PtL1 => pt(ev.leptons.first().map(|l| &l.p)),
            PtL2 => pt(ev.leptons.get(1).map(|l| &l.p)),
            PtL3 => pt(ev.leptons.get(2).map(|l| &l.p)),
            EtaL1 => eta(ev.leptons.first().map(|l| &l.p)),
            EtaL2 => eta(ev.leptons.get(1).map(|l| &l.p)),
            EtaL3 => eta(ev.leptons.get(2).map(|l| &l.p)),
            PtJ1 => pt(ev.jets.first()),
            PtJ2 => pt(ev.jets.get(1)),
            EtaJ1 => eta(ev.jets.first()),
            EtaJ2 => eta(ev.jets.get(1)),
            PtA1 => pt(ev.photons.first()),
            MLl => z_candidate(ev).map(|p| p.m()).unwrap_or(f64::NAN),
            PtLl => pt(z_candidate(ev).as_ref()),
            M3l => {
                if ev.leptons.len() < 3 {
                    f64::NAN
                } else {
                    ev.leptons.iter().take(3).map(|l| l.p).sum::<FourVector>().m()
                }
            }
            MJj => {
                if ev.jets.len() < 2 {
                    f64::NAN
                } else {
                    (ev.jets[0] + ev.jets[1]).m()
                }
            }
            DetaJj => {
                if ev.jets.len() < 2 {
                    f64::NAN
                } else {
                    (ev.jets[0].eta() - ev.jets[1].eta()).abs()
                }
            }
            Met => ev.missing.pt().raw(),
            Ht => ev.jets.iter().map(|j| j.pt().raw()).sum(),
        }
    }
}

fn pt(p: Option<&FourVector>) -> f64 {
    p.map(|p| p.pt().raw()).unwrap_or(f64::NAN)
}

fn eta(p: Option<&FourVector>) -> f64 {
    p.map(|p| p.eta()).unwrap_or(f64::NAN)
}

// opposite-sign same-flavour lepton pair with mass closest to the Z mass
fn z_candidate(ev: &RecoEvent) -> Option<FourVector> {
    ev.leptons
        .iter()
        .tuple_combinations()
        .filter(|(l1, l2)| l1.id.id() == -l2.id.id())
        .map(|(l1, l2)| l1.p + l2.p)
        .min_by(|p1, p2| {
            (p1.m() - Z_MASS).abs().total_cmp(&(p2.m() - Z_MASS).abs())
        })
}
