use std::path::PathBuf;

use derive_builder::Builder;
use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    config::{ConfigStore, ProcessInfo},
    converter::Converter,
    expr::{referenced_weights, ExprError},
    producer::WeightedHistProducer,
    progress_bar::{Progress, ProgressBar},
    reader::{expand_pattern, PatternError},
    reco::Reconstruction,
    sample::{EventSample, SampleError},
    weights::{WeightInfoError, WeightInfoProducer, WeightSelector},
};

/// Settings shared by all processes of a [HistFactory]
#[derive(Builder, Clone, Debug)]
pub struct FactoryContext {
    /// Integrated luminosity in inverse pb
    #[builder(default = "1000.")]
    luminosity: f64,
    /// Selection applied to all events
    #[builder(default, setter(into))]
    cut: String,
    /// Per-event weight of simulated events
    #[builder(default = "\"weight\".to_owned()", setter(into))]
    weight: String,
    /// Weight summed up for the normalisation
    #[builder(default)]
    weight_sum: WeightSelector,
    /// Additional named weights to extract from the event files
    #[builder(default)]
    extra_weights: Vec<String>,
    #[builder(default)]
    reconstruction: Reconstruction,
}

impl Default for FactoryContext {
    fn default() -> Self {
        Self {
            luminosity: 1000.,
            cut: String::new(),
            weight: "weight".to_owned(),
            weight_sum: WeightSelector::Central,
            extra_weights: Vec::new(),
            reconstruction: Reconstruction::default(),
        }
    }
}

impl FactoryContext {
    pub fn luminosity(&self) -> f64 {
        self.luminosity
    }

    pub fn cut(&self) -> &str {
        &self.cut
    }

    // all named weights needed by the cut, the event weight or the normalisation
    fn weight_names(&self) -> Result<Vec<String>, ExprError> {
        let mut names = referenced_weights(&self.cut)?;
        names.extend(referenced_weights(&self.weight)?);
        names.extend(self.weight_sum.name().map(str::to_owned));
        names.extend(self.extra_weights.iter().cloned());
        Ok(unique(names))
    }

    // data events are unweighted, only the cut can refer to named weights
    fn data_weight_names(&self) -> Result<Vec<String>, ExprError> {
        Ok(unique(referenced_weights(&self.cut)?))
    }
}

fn unique(names: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

/// A process with the producer for its histograms
#[derive(Clone, Debug)]
pub struct FactoryEntry {
    pub info: ProcessInfo,
    pub producer: WeightedHistProducer,
}

/// Histogram producers for a set of processes
///
/// Each process is loaded exactly once. The order of the processes is
/// the order in which they were requested.
#[derive(Clone, Debug, Default)]
pub struct HistFactory {
    entries: Vec<(String, FactoryEntry)>,
}

impl HistFactory {
    /// Load the given processes
    ///
    /// Processes that are not part of the configuration are skipped.
    /// The first process that cannot be loaded or normalised aborts
    /// the construction.
    pub fn build<S: AsRef<str>>(
        context: &FactoryContext,
        config: &ConfigStore,
        processes: &[S],
    ) -> Result<Self, FactoryError> {
        let mut requested: Vec<&ProcessInfo> = Vec::with_capacity(processes.len());
        for name in processes {
            let name = name.as_ref();
            match config.process(name) {
                Some(info) if !requested.iter().any(|r| r.name == name) => {
                    requested.push(info)
                }
                Some(_) => debug!("Process `{name}` requested more than once"),
                None => warn!("Skipping unknown process `{name}`"),
            }
        }
        if requested.is_empty() {
            return Ok(Self::default());
        }

        let converter = Converter::with_weight_names(context.weight_names()?);
        let data_converter = Converter::with_weight_names(context.data_weight_names()?);
        info!("Loading {} process(es)", requested.len());
        let progress = ProgressBar::new(requested.len() as u64, "processes loaded:");
        let entries: Result<Vec<_>, _> = requested
            .into_par_iter()
            .map(|info| {
                let converter = if info.is_data {
                    &data_converter
                } else {
                    &converter
                };
                let entry = load_process(context, converter, info);
                progress.inc(1);
                entry.map(|e| (info.name.clone(), e))
            })
            .collect();
        progress.finish();
        Ok(Self { entries: entries? })
    }

    /// Factory with the given producers
    pub fn from_entries(entries: Vec<(String, FactoryEntry)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, process: &str) -> Option<&FactoryEntry> {
        self.entries
            .iter()
            .find(|(name, _)| name == process)
            .map(|(_, e)| e)
    }

    pub fn contains(&self, process: &str) -> bool {
        self.get(process).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactoryEntry)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn load_process(
    context: &FactoryContext,
    converter: &Converter,
    info: &ProcessInfo,
) -> Result<FactoryEntry, FactoryError> {
    let process = || info.name.clone();
    let files = expand_pattern(&info.file_path).map_err(|source| {
        FactoryError::Files {
            process: process(),
            source,
        }
    })?;
    debug!("Files for `{}`: {files:?}", info.name);
    let sample = EventSample::load(&files, converter, &context.reconstruction)
        .map_err(|source| FactoryError::Sample {
            process: process(),
            files: files.clone(),
            source,
        })?;
    debug!("`{}`: {} events", info.name, sample.len());

    let producer = if info.is_data {
        WeightedHistProducer::data(sample, context.cut.as_str())
    } else {
        let weight_info = WeightInfoProducer::new(context.weight_sum.clone())
            .produce(&sample, info.total_cross_section())
            .map_err(|source| FactoryError::Normalisation {
                process: process(),
                source,
            })?;
        debug!(
            "`{}`: cross section {} pb, sum of weights {}",
            info.name,
            weight_info.cross_section(),
            weight_info.sum_of_weights()
        );
        WeightedHistProducer::simulation(
            sample,
            weight_info,
            context.weight.as_str(),
            context.luminosity,
            context.cut.as_str(),
        )
    };
    Ok(FactoryEntry {
        info: info.clone(),
        producer,
    })
}

/// Error building a [HistFactory]
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Failed to find event files for process `{process}`")]
    Files {
        process: String,
        source: PatternError,
    },
    #[error("Failed to load events for process `{process}` from {files:?}")]
    Sample {
        process: String,
        files: Vec<PathBuf>,
        source: SampleError,
    },
    #[error("Failed to normalise process `{process}`")]
    Normalisation {
        process: String,
        source: WeightInfoError,
    },
    #[error("Invalid weight expression")]
    Expression(#[from] ExprError),
}
