use thiserror::Error;

use crate::{
    event::Event,
    hepmc2::{HepMCError, HepMCParser},
    lhef::{self, LHEFParser},
    reader::EventRecord,
};

/// Conversion from raw event records into the internal event format
///
/// Apart from the central weight, only the weights with the names
/// passed to [Converter::with_weight_names] are kept, in that order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Converter {
    weight_names: Vec<String>,
}

impl Converter {
    /// Converter keeping only the central weight
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter keeping the central weight and the given named weights
    pub fn with_weight_names(weight_names: Vec<String>) -> Self {
        Self { weight_names }
    }

    /// Names of the weights to extract in addition to the central one
    pub fn weight_names(&self) -> &[String] {
        self.weight_names.as_slice()
    }

    /// Convert a single event record
    pub fn convert(&self, record: &EventRecord) -> Result<Event, ConversionError> {
        match record {
            EventRecord::HepMC(record) => Ok(self.parse_hepmc(record)?),
            EventRecord::LHEF(record) => Ok(self.parse_lhef(record)?),
        }
    }
}

/// Error converting an event record
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Invalid HepMC2 record
    #[error("Failed to parse HepMC record")]
    HepMC(#[from] HepMCError),
    /// Invalid Les Houches Event record
    #[error("Failed to parse Les Houches Event record")]
    LHEF(#[from] lhef::Error),
}
