use std::path::Path;

use log::{debug, trace};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    converter::{ConversionError, Converter},
    reader::{CombinedReader, FileReadError},
    reco::RecoEvent,
    traits::Reconstruct,
};

// Number of records read before they are converted in parallel
const CHUNK_SIZE: usize = 4096;

/// The reconstructed events of one process
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventSample {
    events: Vec<RecoEvent>,
    weight_names: Vec<String>,
}

impl EventSample {
    /// Read, convert and reconstruct all events in the given files
    ///
    /// The files are read one after the other and the event order is
    /// preserved. Records are converted in parallel. The first error
    /// aborts loading.
    pub fn load<P, R>(
        files: &[P],
        converter: &Converter,
        reconstruction: &R,
    ) -> Result<Self, SampleError>
    where
        P: AsRef<Path>,
        R: Reconstruct + Sync,
        R::Error: std::error::Error + Send + Sync + 'static,
    {
        let mut reader = CombinedReader::from_files(files)?;
        let mut events = Vec::new();
        loop {
            let records = reader
                .by_ref()
                .take(CHUNK_SIZE)
                .collect::<Result<Vec<_>, _>>()?;
            if records.is_empty() {
                break;
            }
            trace!("Converting {} event records", records.len());
            let chunk: Result<Vec<_>, SampleError> = records
                .par_iter()
                .map(|record| {
                    let event = converter.convert(record)?;
                    reconstruction
                        .reconstruct(event)
                        .map_err(|err| SampleError::Reconstruction(Box::new(err)))
                })
                .collect();
            events.append(&mut chunk?);
        }
        debug!("Read {} events from {} file(s)", events.len(), files.len());
        Ok(Self {
            events,
            weight_names: converter.weight_names().to_vec(),
        })
    }

    /// Sample consisting of the given events
    ///
    /// `weight_names` are the names of the named weights of each event.
    pub fn from_events(events: Vec<RecoEvent>, weight_names: Vec<String>) -> Self {
        Self {
            events,
            weight_names,
        }
    }

    pub fn events(&self) -> &[RecoEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecoEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Names of the named weights, in storage order
    pub fn weight_names(&self) -> &[String] {
        &self.weight_names
    }
}

impl<'a> IntoIterator for &'a EventSample {
    type Item = &'a RecoEvent;
    type IntoIter = std::slice::Iter<'a, RecoEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Error loading an event sample
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Failed to read event record")]
    Read(#[from] FileReadError),
    #[error("Failed to convert event record")]
    Conversion(#[from] ConversionError),
    #[error("Failed to reconstruct event")]
    Reconstruction(#[source] Box<dyn std::error::Error + Send + Sync>),
}
