use std::fmt::{self, Display};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::EventSample;

/// Process-level normalisation information
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct WeightInfo {
    cross_section: f64,
    sum_of_weights: f64,
}

impl WeightInfo {
    pub fn new(cross_section: f64, sum_of_weights: f64) -> Self {
        Self {
            cross_section,
            sum_of_weights,
        }
    }

    /// Cross section in pb, including any k-factor
    pub fn cross_section(&self) -> f64 {
        self.cross_section
    }

    /// Total generated weight
    pub fn sum_of_weights(&self) -> f64 {
        self.sum_of_weights
    }

    /// Factor converting a sum of event weights into a yield at the
    /// given luminosity
    pub fn scale(&self, luminosity: f64) -> f64 {
        luminosity * self.cross_section / self.sum_of_weights
    }
}

/// Selection of the weight summed up to obtain the total generated weight
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub enum WeightSelector {
    /// The central event weight
    #[default]
    Central,
    /// The named weight with the given name
    Named(String),
}

impl Display for WeightSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightSelector::Central => write!(f, "central weight"),
            WeightSelector::Named(name) => write!(f, "weight \"{name}\""),
        }
    }
}

impl WeightSelector {
    /// Selector from a weight name, where an empty name or `weight`
    /// selects the central weight
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | "weight" | "central" => WeightSelector::Central,
            name => WeightSelector::Named(name.to_owned()),
        }
    }

    /// The name of the selected weight, if it is a named weight
    pub fn name(&self) -> Option<&str> {
        match self {
            WeightSelector::Central => None,
            WeightSelector::Named(name) => Some(name),
        }
    }
}

/// Determines the [WeightInfo] of a process from its events
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightInfoProducer {
    selector: WeightSelector,
}

impl WeightInfoProducer {
    pub fn new(selector: WeightSelector) -> Self {
        Self { selector }
    }

    /// Sum the selected weight over all events, without any cut
    ///
    /// `cross_section` is the total cross section, including any
    /// k-factor. The sum of weights has to be positive.
    pub fn produce(
        &self,
        sample: &EventSample,
        cross_section: f64,
    ) -> Result<WeightInfo, WeightInfoError> {
        let sum_of_weights = match &self.selector {
            WeightSelector::Central => {
                sample.iter().map(|ev| ev.weights.central().raw()).sum()
            }
            WeightSelector::Named(name) => {
                let missing = || WeightInfoError::MissingWeight(name.clone());
                let idx = sample
                    .weight_names()
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(missing)?;
                let mut sum = 0.;
                for ev in sample {
                    sum += ev.weights.named(idx).ok_or_else(missing)?.raw();
                }
                sum
            }
        };
        debug!(
            "Sum of {} over {} events: {sum_of_weights}",
            self.selector,
            sample.len()
        );
        if !(sum_of_weights > 0.) {
            return Err(WeightInfoError::NonPositiveSum(sum_of_weights));
        }
        Ok(WeightInfo::new(cross_section, sum_of_weights))
    }
}

/// Error determining the normalisation of a process
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WeightInfoError {
    #[error("Sum of weights is not positive: {0}")]
    NonPositiveSum(f64),
    #[error("Events have no weight \"{0}\"")]
    MissingWeight(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::Weights, reco::RecoEvent};
    use noisy_float::prelude::*;

    fn sample(weights: &[[f64; 2]]) -> EventSample {
        let events = weights
            .iter()
            .map(|w| RecoEvent {
                weights: Weights::from(vec![n64(w[0]), n64(w[1])]),
                ..Default::default()
            })
            .collect();
        EventSample::from_events(events, vec!["nominal".to_owned()])
    }

    #[test]
    fn sum_of_weights() {
        let sample = sample(&[[1., 2.], [3., -1.], [-0.5, 4.]]);
        let central = WeightInfoProducer::default().produce(&sample, 10.).unwrap();
        assert_eq!(central, WeightInfo::new(10., 3.5));
        assert_eq!(central.scale(2.), 20. / 3.5);

        let named = WeightInfoProducer::new(WeightSelector::from_name("nominal"))
            .produce(&sample, 10.)
            .unwrap();
        assert_eq!(named.sum_of_weights(), 5.);
    }

    #[test]
    fn errors() {
        let sample = sample(&[[1., 2.], [-3., -2.]]);
        assert_eq!(
            WeightInfoProducer::default().produce(&sample, 1.),
            Err(WeightInfoError::NonPositiveSum(-2.))
        );
        assert_eq!(
            WeightInfoProducer::new(WeightSelector::from_name("nominal"))
                .produce(&sample, 1.),
            Err(WeightInfoError::NonPositiveSum(0.))
        );
        assert_eq!(
            WeightInfoProducer::new(WeightSelector::from_name("other"))
                .produce(&sample, 1.),
            Err(WeightInfoError::MissingWeight("other".to_owned()))
        );
        let empty = EventSample::default();
        assert!(WeightInfoProducer::default().produce(&empty, 1.).is_err());
    }
}
