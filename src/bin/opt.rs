use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lazy_static::lazy_static;
use regex::Regex;
use stackhist::{
    output::svg_path,
    plot::{LegendPosition, Rebin, Uncertainties},
    reco::{JetAlgorithm, JetDefinition, LeptonDefinition, PhotonDefinition, Reconstruction},
};
use thiserror::Error;

lazy_static! {
    static ref RANGE_RE: Regex =
        Regex::new(r"^\s*(?P<min>[^,:\s]+)\s*[,:]\s*(?P<max>[^,:\s]+)\s*$").unwrap();
}

pub(crate) fn parse_range(s: &str) -> Result<(f64, f64), ParseRangeErr> {
    let Some(captures) = RANGE_RE.captures(s) else {
        return Err(ParseRangeErr::Format(s.to_owned()));
    };
    let parse = |name: &str| {
        captures[name]
            .parse::<f64>()
            .map_err(|_| ParseRangeErr::Format(s.to_owned()))
    };
    let (min, max) = (parse("min")?, parse("max")?);
    if min < max {
        Ok((min, max))
    } else {
        Err(ParseRangeErr::Empty(min, max))
    }
}

#[derive(Debug, Clone, Error)]
pub(crate) enum ParseRangeErr {
    #[error("Expected a range of the form `min,max`, got `{0}`")]
    Format(String),
    #[error("Empty range: minimum {0} is not below maximum {1}")]
    Empty(f64, f64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Copy, Clone, Parser)]
pub(crate) struct JetOpt {
    /// Jet algorithm.
    #[clap(
        long,
        default_value = "anti-kt",
        help = "Jet algorithm.\nPossible settings are 'anti-kt', 'kt', 'Cambridge-Aachen'."
    )]
    pub jetalgorithm: JetAlgorithm,
    /// Jet radius parameter.
    #[clap(long, default_value = "0.4")]
    pub jetradius: f64,
    /// Minimum jet transverse momentum in GeV.
    #[clap(long, default_value = "30.")]
    pub jetpt: f64,
}

impl From<JetOpt> for JetDefinition {
    fn from(j: JetOpt) -> Self {
        Self {
            algorithm: j.jetalgorithm,
            radius: j.jetradius,
            min_pt: j.jetpt,
        }
    }
}

#[derive(Debug, Copy, Clone, Parser)]
pub(crate) struct LeptonOpt {
    /// Radius for dressing leptons with photons.
    #[clap(long, default_value = "0.1")]
    pub leptonradius: f64,
    /// Minimum lepton transverse momentum in GeV.
    #[clap(long, default_value = "10.")]
    pub leptonpt: f64,
    /// Maximum absolute lepton pseudorapidity.
    #[clap(long, default_value = "2.5")]
    pub leptoneta: f64,
}

impl From<LeptonOpt> for LeptonDefinition {
    fn from(l: LeptonOpt) -> Self {
        Self {
            dressing_radius: l.leptonradius,
            min_pt: l.leptonpt,
            max_eta: l.leptoneta,
        }
    }
}

#[derive(Debug, Copy, Clone, Parser)]
pub(crate) struct PhotonOpt {
    /// Minimum fraction of photon transverse energy.
    #[clap(long, requires_all = ["photonradius", "photonpt"])]
    pub photonefrac: Option<f64>,
    /// Photon isolation radius.
    #[clap(long, requires_all = ["photonefrac", "photonpt"])]
    pub photonradius: Option<f64>,
    /// Minimum photon transverse momentum in GeV.
    #[clap(long, requires_all = ["photonefrac", "photonradius"])]
    pub photonpt: Option<f64>,
}

impl PhotonOpt {
    fn definition(&self) -> Option<PhotonDefinition> {
        let (Some(min_e_fraction), Some(radius), Some(min_pt)) =
            (self.photonefrac, self.photonradius, self.photonpt)
        else {
            return None;
        };
        Some(PhotonDefinition {
            min_e_fraction,
            radius,
            min_pt,
        })
    }
}

#[derive(Debug, Copy, Clone, Parser)]
pub(crate) struct ParticleDefinitions {
    #[clap(flatten)]
    pub(crate) jet_def: JetOpt,

    #[clap(flatten)]
    pub(crate) lepton_def: LeptonOpt,

    #[clap(flatten)]
    pub(crate) photon_def: PhotonOpt,
}

impl From<ParticleDefinitions> for Reconstruction {
    fn from(defs: ParticleDefinitions) -> Self {
        let reco = Reconstruction::new(defs.jet_def.into())
            .with_lepton_def(defs.lepton_def.into());
        match defs.photon_def.definition() {
            Some(photon_def) => reco.with_photon_def(photon_def),
            None => reco,
        }
    }
}

#[derive(Debug, Parser)]
#[clap(about, author, version)]
pub(crate) struct Opt {
    /// Directory with the analysis configuration.
    #[clap(long, default_value = "config")]
    pub(crate) config_dir: PathBuf,

    /// Event selection, used to look up the event files.
    #[clap(short, long)]
    pub(crate) selection: String,

    /// Comma-separated list of branches to plot.
    #[clap(short, long, value_delimiter = ',', required = true)]
    pub(crate) branches: Vec<String>,

    /// Plot groups to stack.
    ///
    /// Either the name of a preset or a comma-separated list of plot
    /// groups or processes. The first group is drawn at the bottom of
    /// the stack.
    #[clap(short, long)]
    pub(crate) files_to_plot: String,

    /// Plot groups drawn as signals on top of the stack.
    #[clap(long, default_value = "")]
    pub(crate) signal_files: String,

    /// Plot group with the data, 'none' for simulation only.
    #[clap(long, default_value = "data")]
    pub(crate) data: String,

    /// Comma-separated list of states to sum over. Defaults to all states.
    #[clap(short, long, value_delimiter = ',')]
    pub(crate) channels: Vec<String>,

    /// Selection applied to all events.
    #[clap(long, default_value = "")]
    pub(crate) cut: String,

    /// Per-event weight expression for simulated events.
    #[clap(long, default_value = "weight")]
    pub(crate) weight: String,

    /// Event weight summed up for the normalisation.
    #[clap(long, default_value = "weight")]
    pub(crate) weight_sum: String,

    /// Integrated luminosity in inverse fb.
    ///
    /// A negative value normalises every histogram to unit area.
    #[clap(long, default_value = "-1", allow_negative_numbers = true)]
    pub(crate) lumi: f64,

    /// Centre-of-mass energy in TeV.
    #[clap(long, default_value = "13")]
    pub(crate) energy: f64,

    /// Overlay the histograms instead of stacking them.
    #[clap(long)]
    pub(crate) no_stack: bool,

    /// Stack signals on top of the other groups.
    #[clap(long)]
    pub(crate) stack_signal: bool,

    /// Don't add a data/prediction ratio panel.
    #[clap(long)]
    pub(crate) no_ratio: bool,

    /// Range of the ratio panel.
    #[clap(long, value_parser = parse_range, default_value = "0.4,1.6")]
    pub(crate) ratio_range: (f64, f64),

    /// Title of the ratio panel.
    #[clap(long, default_value = "Data / Pred.")]
    pub(crate) ratio_text: String,

    /// Logarithmic y axis.
    #[clap(long)]
    pub(crate) logy: bool,

    /// Legend position, 'left' or 'right'.
    #[clap(long, default_value = "right")]
    pub(crate) legend: LegendPosition,

    /// Rebinning, either a factor or a comma-separated list of new bin edges.
    #[clap(long)]
    pub(crate) rebin: Option<Rebin>,

    /// Uncertainty bands: 'none', 'separate' or 'combined'.
    ///
    /// Defaults to 'combined' for stacked plots and 'separate' otherwise.
    #[clap(long)]
    pub(crate) uncertainties: Option<Uncertainties>,

    /// Keep the overflow out of the last bin.
    #[clap(long)]
    pub(crate) no_overflow: bool,

    /// Multiply the automatic y maximum by this factor.
    #[clap(long, default_value = "1.")]
    pub(crate) scale_ymax: f64,

    /// Multiply the automatic y minimum by this factor.
    #[clap(long, default_value = "1.")]
    pub(crate) scale_ymin: f64,

    /// Write 'Simulation' next to the experiment label.
    #[clap(long)]
    pub(crate) simulation: bool,

    /// Write 'Preliminary' next to the experiment label.
    #[clap(long)]
    pub(crate) preliminary: bool,

    /// Write 'Thesis' next to the experiment label.
    #[clap(long)]
    pub(crate) thesis: bool,

    /// Additional text below the experiment label.
    #[clap(long)]
    pub(crate) extra_text: Option<String>,

    /// Don't draw experiment and luminosity labels.
    #[clap(long)]
    pub(crate) no_decorations: bool,

    /// Write the plot to this file instead of the dated output directory.
    #[clap(short, long)]
    pub(crate) output_file: Option<PathBuf>,

    /// Suffix for output file names.
    #[clap(short, long, default_value = "")]
    pub(crate) append_to_name: String,

    /// Additional folder below the selection in the output directory.
    #[clap(long)]
    pub(crate) folder_name: Option<String>,

    /// Root directory for output. Defaults to `$HOME/stackhist`.
    #[clap(long)]
    pub(crate) storage_root: Option<PathBuf>,

    /// Web directory where the output is mirrored.
    #[clap(long)]
    pub(crate) html_root: Option<PathBuf>,

    /// Don't mirror the output to the web directory.
    #[clap(long)]
    pub(crate) no_html: bool,

    /// Write a log with the event counts of each process and state.
    #[clap(long)]
    pub(crate) event_counts: bool,

    #[clap(flatten)]
    pub(crate) particle_def: ParticleDefinitions,

    #[clap(
        short,
        long,
        default_value_t,
        help = "Number of threads.

If set to 0, a default number of threads is chosen.
The default can be set with the `RAYON_NUM_THREADS` environment
variable."
    )]
    pub(crate) threads: usize,

    /// Verbosity level.
    #[clap(value_enum, short, long, default_value = "info")]
    pub(crate) loglevel: LogLevel,

    /// Print debug information. Shortcut for `--loglevel debug`.
    #[clap(long, conflicts_with = "quiet")]
    pub(crate) debug: bool,

    /// Only print warnings and errors. Shortcut for `--loglevel warn`.
    #[clap(short, long)]
    pub(crate) quiet: bool,
}

impl Opt {
    pub(crate) fn validate(self) -> Result<Self, ValidationError> {
        if self.output_file.is_some() && self.branches.len() > 1 {
            return Err(ValidationError::OutputFileBranches(self.branches.len()));
        }
        if let Some(file) = &self.output_file {
            if svg_path(file).is_err() {
                return Err(ValidationError::OutputFormat(file.clone()));
            }
        }
        if self.energy <= 0. {
            return Err(ValidationError::Energy(self.energy));
        }
        Ok(self)
    }

    pub(crate) fn log_level(&self) -> &'static str {
        if self.debug {
            LogLevel::Debug.as_str()
        } else if self.quiet {
            LogLevel::Warn.as_str()
        } else {
            self.loglevel.as_str()
        }
    }

    /// Integrated luminosity in inverse fb, `None` for unit normalisation
    pub(crate) fn luminosity(&self) -> Option<f64> {
        (self.lumi >= 0.).then_some(self.lumi)
    }

    pub(crate) fn data_group(&self) -> Option<&str> {
        match self.data.trim() {
            "" | "none" => None,
            data => Some(data),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub(crate) enum ValidationError {
    #[error("--output-file can only be used with a single branch, got {0}")]
    OutputFileBranches(usize),
    #[error("Output file {0:?} is not an SVG file")]
    OutputFormat(PathBuf),
    #[error("Centre-of-mass energy has to be positive, got {0}")]
    Energy(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges() {
        assert_eq!(parse_range("0.4,1.6").unwrap(), (0.4, 1.6));
        assert_eq!(parse_range(" 0 : 2 ").unwrap(), (0., 2.));
        assert!(matches!(parse_range("2,1"), Err(ParseRangeErr::Empty(..))));
        assert!(matches!(parse_range("1"), Err(ParseRangeErr::Format(_))));
    }

    #[test]
    fn options() {
        let opt = Opt::try_parse_from([
            "stackhist", "-s", "3l", "-b", "m_3l,pt_l1", "-f", "wz,zz", "--lumi", "35.9",
            "--data", "none", "--rebin", "2", "--legend", "left",
        ])
        .unwrap()
        .validate()
        .unwrap();
        assert_eq!(opt.branches, ["m_3l", "pt_l1"]);
        assert_eq!(opt.luminosity(), Some(35.9));
        assert_eq!(opt.data_group(), None);
        assert_eq!(opt.rebin, Some(Rebin::Factor(2)));
        assert_eq!(opt.legend, LegendPosition::Left);
        assert_eq!(opt.ratio_range, (0.4, 1.6));
        assert_eq!(opt.log_level(), "info");

        let opt = Opt::try_parse_from([
            "stackhist", "-s", "3l", "-b", "m_3l,pt_l1", "-f", "wz", "-o", "plot.svg",
        ])
        .unwrap();
        assert_eq!(opt.luminosity(), None);
        assert_eq!(opt.data_group(), Some("data"));
        assert!(matches!(
            opt.validate(),
            Err(ValidationError::OutputFileBranches(2))
        ));

        let opt = Opt::try_parse_from([
            "stackhist", "-s", "3l", "-b", "m_3l", "-f", "wz", "-o", "plot.pdf",
        ])
        .unwrap();
        assert!(matches!(
            opt.validate(),
            Err(ValidationError::OutputFormat(_))
        ));
    }
}
