//! `stackhist` turns collider event samples into normalised, stacked
//! histograms.
//!
//! Every simulated process is normalised to a target integrated
//! luminosity, processes are summed into plot groups over a set of
//! detector channels ("states"), and the groups are stacked, compared
//! to data and written out as SVG and JSON.
//!
//! # How to use
//!
//! The `stackhist` binary covers the usual workflow. For use as a
//! library, the steps are
//!
//! 1. load the analysis configuration with [config::ConfigStore::load],
//! 2. load the processes with [factory::HistFactory::build],
//! 3. fill one histogram per plot group with [aggregate::config_hist],
//! 4. assemble the plot with [plot::make_plot],
//! 5. write it with [output::save_plot].
//!
//! ## Most relevant modules
//!
//! - [config] for the typed analysis configuration
//! - [factory] and [producer] for per-process histograms
//! - [aggregate] for plot groups
//! - [plot] and [render] for plots
//! - [reader] and [sample] for event input
//! - [expr] for cut and weight expressions
//!

/// Plot group histograms
pub mod aggregate;
/// Analysis configuration
pub mod config;
/// Conversion between input events and internal format
pub mod converter;
/// Scattering event class
pub mod event;
/// Cut, weight and branch expressions
pub mod expr;
/// Per-process histogram producers
pub mod factory;
/// Four-vector class
pub mod four_vector;
/// HepMC2 interface
pub mod hepmc2;
/// Weighted histograms
pub mod hist;
/// LesHouches Event File interface
pub mod lhef;
/// Observables of reconstructed events
pub mod observable;
/// Output files
pub mod output;
mod parsing;
/// Plot assembly
pub mod plot;
/// Weighted histograms of a single process
pub mod producer;
/// Progress bar
pub mod progress_bar;
/// Event readers
pub mod reader;
/// Reconstruction of physics objects
pub mod reco;
/// SVG output
pub mod render;
/// Event samples
pub mod sample;
/// Common traits
pub mod traits;
/// Process normalisation
pub mod weights;

use lazy_static::lazy_static;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
lazy_static! {
    pub static ref VERSION_MAJOR: u32 =
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap();
    pub static ref VERSION_MINOR: u32 =
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap();
    pub static ref VERSION_PATCH: u32 =
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap();
}
pub const GIT_REV: Option<&str> = option_env!("VERGEN_GIT_SHA");
pub const GIT_BRANCH: Option<&str> = option_env!("VERGEN_GIT_BRANCH");
