use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{aggregate::GroupHist, config::Style, hist::Hist1D};

/// Colours used for plot groups without a configured colour
pub const PALETTE: [&str; 10] = [
    "#5790fc", "#f89c20", "#e42536", "#964a8b", "#9c9ca1", "#7a21dd",
    "#86c8dd", "#b9ac70", "#a96b59", "#3f90da",
];

const DATA_COLOR: &str = "#000000";
const LOG_FALLBACK_MIN: f64 = 1e-2;

/// Position of the legend
#[derive(
    Deserialize, Serialize, Display, EnumString, Copy, Clone, Debug, Default, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LegendPosition {
    Left,
    #[default]
    Right,
}

/// Which statistical uncertainties are shown as bands
#[derive(
    Deserialize, Serialize, Display, EnumString, Copy, Clone, Debug, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Uncertainties {
    None,
    /// One band per histogram
    Separate,
    /// One band around the stack total
    Combined,
}

/// Rebinning applied before plotting
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub enum Rebin {
    /// Merge groups of neighbouring bins
    Factor(usize),
    /// New bin edges, which must be a subset of the old ones
    Edges(Vec<f64>),
}

impl FromStr for Rebin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(factor) = s.trim().parse() {
            return Ok(Rebin::Factor(factor));
        }
        let edges: Result<Vec<f64>, _> =
            s.split(',').map(|e| e.trim().parse::<f64>()).collect();
        match edges {
            Ok(edges) if edges.len() >= 2 => Ok(Rebin::Edges(edges)),
            _ => Err(format!(
                "`{s}` is neither a rebinning factor nor a list of bin edges"
            )),
        }
    }
}

/// Options for assembling a plot
#[derive(Clone, Debug, TypedBuilder)]
pub struct PlotOptions {
    /// Stack the main histograms instead of overlaying them
    #[builder(default = true)]
    pub stacked: bool,
    /// Draw signal histograms on top of the stack
    #[builder(default)]
    pub stack_signal: bool,
    #[builder(default)]
    pub logy: bool,
    #[builder(default)]
    pub legend: LegendPosition,
    /// Defaults to a combined band for stacks and separate bands otherwise
    #[builder(default, setter(strip_option))]
    pub uncertainties: Option<Uncertainties>,
    /// Show the data/prediction ratio if there is data
    #[builder(default = true)]
    pub ratio: bool,
    #[builder(default = (0.4, 1.6))]
    pub ratio_range: (f64, f64),
    #[builder(default = "Data / Pred.".to_owned(), setter(into))]
    pub ratio_title: String,
    #[builder(default, setter(strip_option))]
    pub rebin: Option<Rebin>,
    /// Move the overflow into the last bin
    #[builder(default = true)]
    pub fold_overflow: bool,
    /// Scale every histogram to unit integral
    #[builder(default)]
    pub unit_norm: bool,
    #[builder(default, setter(into))]
    pub x_title: String,
    #[builder(default = "Events".to_owned(), setter(into))]
    pub y_title: String,
    /// Multipliers for the automatic y range
    #[builder(default = 1.)]
    pub scale_ymax: f64,
    #[builder(default = 1.)]
    pub scale_ymin: f64,
    /// Draw the experiment and luminosity labels
    #[builder(default = true)]
    pub decorations: bool,
    #[builder(default = "CMS".to_owned(), setter(into))]
    pub experiment: String,
    #[builder(default)]
    pub simulation: bool,
    #[builder(default)]
    pub preliminary: bool,
    #[builder(default)]
    pub thesis: bool,
    /// Integrated luminosity in inverse fb for the luminosity label
    #[builder(default, setter(strip_option))]
    pub luminosity: Option<f64>,
    /// Centre-of-mass energy in TeV
    #[builder(default = 13.)]
    pub energy: f64,
    #[builder(default, setter(strip_option, into))]
    pub extra_text: Option<String>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A histogram as drawn
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PlotHist {
    pub name: String,
    pub title: String,
    pub color: String,
    pub style: Style,
    /// Lower end of the bars, non-zero inside a stack
    pub base: Vec<f64>,
    /// Upper end of the bars
    pub top: Vec<f64>,
    pub errors: Vec<f64>,
}

impl PlotHist {
    fn new(group: &GroupHist, hist: Hist1D, color: String) -> Self {
        Self {
            name: group.name.clone(),
            title: group.title.clone(),
            color,
            style: group.style,
            base: vec![0.; hist.nbins()],
            top: hist.contents().to_vec(),
            errors: hist.errors().collect(),
        }
    }

    /// Bin contents without the stack offset
    pub fn contents(&self) -> Vec<f64> {
        self.top.iter().zip(&self.base).map(|(t, b)| t - b).collect()
    }

    fn put_on(&mut self, base: &[f64]) {
        for ((b, t), offset) in self.base.iter_mut().zip(self.top.iter_mut()).zip(base) {
            *b += offset;
            *t += offset;
        }
    }
}

/// A symmetric band per bin
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Band {
    pub color: String,
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
}

/// Kind of legend entry, deciding the marker drawn next to it
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Data,
    Stack,
    Signal,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct LegendEntry {
    pub title: String,
    pub color: String,
    pub style: Style,
    pub kind: EntryKind,
}

/// A single point in the ratio panel
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct RatioPoint {
    pub bin: usize,
    pub value: f64,
    pub error: f64,
}

/// Data divided by the stack sum
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RatioPanel {
    pub title: String,
    pub range: (f64, f64),
    pub points: Vec<RatioPoint>,
    /// Relative uncertainty of the prediction around one
    pub band: Band,
}

/// Labels drawn above the main panel
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Decorations {
    /// Experiment label including tags like "Simulation"
    pub label: String,
    pub lumi_label: Option<String>,
    pub extra_text: Option<String>,
}

/// A fully assembled plot, ready for rendering
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Plot {
    pub edges: Vec<f64>,
    pub x_title: String,
    pub y_title: String,
    pub logy: bool,
    pub y_range: (f64, f64),
    pub stacked: bool,
    /// Main histograms, from the bottom of the stack to the top
    pub stack: Vec<PlotHist>,
    pub signals: Vec<PlotHist>,
    pub data: Option<PlotHist>,
    pub bands: Vec<Band>,
    pub legend_position: LegendPosition,
    pub legend: Vec<LegendEntry>,
    pub ratio: Option<RatioPanel>,
    pub decorations: Option<Decorations>,
}

/// Assemble a plot from normalised plot group histograms
///
/// `stack` is ordered from the bottom of the stack to the top.
pub fn make_plot(
    stack: &[GroupHist],
    signals: &[GroupHist],
    data: Option<&GroupHist>,
    options: &PlotOptions,
) -> Result<Plot, PlotError> {
    let edges = match stack.iter().chain(signals).chain(data).next() {
        Some(first) => prepare(&first.hist, options).edges().to_vec(),
        None => return Err(PlotError::Empty),
    };
    let prepared = |groups: &[GroupHist]| -> Result<Vec<Hist1D>, PlotError> {
        groups
            .iter()
            .map(|group| {
                let hist = prepare(&group.hist, options);
                if hist.edges() != edges {
                    return Err(PlotError::Incompatible(group.name.clone()));
                }
                Ok(hist)
            })
            .collect()
    };
    let mut stack_hists = prepared(stack)?;
    let mut signal_hists = prepared(signals)?;
    let mut data_hist = match data {
        Some(data) => prepared(std::slice::from_ref(data))?.pop(),
        None => None,
    };
    if options.unit_norm {
        normalise_stack(&mut stack_hists, options.stacked);
        for hist in signal_hists.iter_mut().chain(&mut data_hist) {
            *hist = hist.normalized();
        }
    }

    let mut palette = PALETTE.iter().cycle();
    let mut to_plot = |group: &GroupHist, hist: Hist1D, color: Option<&str>| {
        let color = match color.or(group.color.as_deref()) {
            Some(color) => color.to_owned(),
            None => palette.next().copied().unwrap_or(DATA_COLOR).to_owned(),
        };
        PlotHist::new(group, hist, color)
    };
    let mut stack: Vec<_> = stack
        .iter()
        .zip(stack_hists)
        .map(|(g, h)| to_plot(g, h, None))
        .collect();
    let mut signals: Vec<_> = signals
        .iter()
        .zip(signal_hists)
        .map(|(g, h)| to_plot(g, h, None))
        .collect();
    let data = data
        .zip(data_hist)
        .map(|(g, h)| to_plot(g, h, Some(DATA_COLOR)));

    let nbins = edges.len() - 1;
    let mut total = vec![0.; nbins];
    let mut total_err2 = vec![0.; nbins];
    for hist in &mut stack {
        for (i, (c, e)) in hist.top.iter().zip(&hist.errors).enumerate() {
            total_err2[i] += e * e;
            if !options.stacked {
                total[i] += c;
            }
        }
        if options.stacked {
            hist.put_on(&total);
            total.copy_from_slice(&hist.top);
        }
    }
    if options.stacked && options.stack_signal {
        for signal in &mut signals {
            signal.put_on(&total);
        }
    }

    let uncertainties = options.uncertainties.unwrap_or(if options.stacked {
        Uncertainties::Combined
    } else {
        Uncertainties::Separate
    });
    let bands = match uncertainties {
        Uncertainties::None => Vec::new(),
        Uncertainties::Separate => stack
            .iter()
            .map(|h| band(&h.color, &h.top, &h.errors))
            .collect(),
        Uncertainties::Combined if stack.is_empty() => Vec::new(),
        Uncertainties::Combined => {
            let errors: Vec<_> = total_err2.iter().map(|e2| e2.sqrt()).collect();
            let total = if options.stacked {
                total.clone()
            } else {
                stack.iter().fold(vec![0.; nbins], |mut acc, h| {
                    acc.iter_mut().zip(&h.top).for_each(|(a, t)| *a += t);
                    acc
                })
            };
            vec![band(DATA_COLOR, &total, &errors)]
        }
    };

    let y_range = y_range(&stack, &signals, data.as_ref(), options);
    debug!("y range: {y_range:?}");

    let ratio = match (&data, options.ratio, stack.is_empty()) {
        (Some(data), true, false) => {
            let sum = if options.stacked {
                total.clone()
            } else {
                stack.iter().fold(vec![0.; nbins], |mut acc, h| {
                    acc.iter_mut().zip(&h.top).for_each(|(a, t)| *a += t);
                    acc
                })
            };
            Some(ratio_panel(data, &sum, &total_err2, options))
        }
        _ => None,
    };

    let decorations = options.decorations.then(|| decorations(options));
    let legend = legend(&stack, &signals, data.as_ref());

    Ok(Plot {
        edges,
        x_title: options.x_title.clone(),
        y_title: options.y_title.clone(),
        logy: options.logy,
        y_range,
        stacked: options.stacked,
        stack,
        signals,
        data,
        bands,
        legend_position: options.legend,
        legend,
        ratio,
        decorations,
    })
}

// a stack is normalised as a whole, overlays one by one
fn normalise_stack(hists: &mut [Hist1D], stacked: bool) {
    if !stacked {
        for hist in hists.iter_mut() {
            *hist = hist.normalized();
        }
        return;
    }
    let integral: f64 = hists.iter().map(Hist1D::integral).sum();
    if integral != 0. {
        hists.iter_mut().for_each(|h| h.scale(1. / integral));
    }
}

// rebinning and overflow
fn prepare(hist: &Hist1D, options: &PlotOptions) -> Hist1D {
    let mut hist = match &options.rebin {
        Some(Rebin::Factor(1)) | None => hist.clone(),
        Some(Rebin::Factor(factor)) => hist.rebin(*factor).unwrap_or_else(|err| {
            warn!("Ignoring rebinning: {err}");
            hist.clone()
        }),
        Some(Rebin::Edges(edges)) => hist.rebin_edges(edges.clone()).unwrap_or_else(|err| {
            warn!("Ignoring rebinning: {err}");
            hist.clone()
        }),
    };
    if options.fold_overflow {
        hist.fold_overflow();
    }
    hist
}

fn band(color: &str, centre: &[f64], errors: &[f64]) -> Band {
    Band {
        color: color.to_owned(),
        lo: centre.iter().zip(errors).map(|(c, e)| c - e).collect(),
        hi: centre.iter().zip(errors).map(|(c, e)| c + e).collect(),
    }
}

fn y_range(
    stack: &[PlotHist],
    signals: &[PlotHist],
    data: Option<&PlotHist>,
    options: &PlotOptions,
) -> (f64, f64) {
    let mc = stack.iter().chain(signals);
    let max_top = mc.clone().flat_map(|h| h.top.iter().copied());
    let data_max = data
        .into_iter()
        .flat_map(|d| d.top.iter().zip(&d.errors).map(|(t, e)| t + e));
    let max = max_top.chain(data_max).fold(0., f64::max);
    let ymax = 1.1 * max * options.scale_ymax;

    let ymin = y_min(mc.chain(data), options.logy) * options.scale_ymin;
    let ymax = if ymax > ymin { ymax } else { ymin + 1. };
    (ymin, ymax)
}

fn y_min<'a>(hists: impl Iterator<Item = &'a PlotHist>, logy: bool) -> f64 {
    let contents = hists.flat_map(|h| h.contents().into_iter());
    if logy {
        let min_positive = contents.filter(|c| *c > 0.).reduce(f64::min);
        min_positive.map(|m| m / 2.).unwrap_or(LOG_FALLBACK_MIN)
    } else {
        contents.fold(0., f64::min)
    }
}

fn ratio_panel(
    data: &PlotHist,
    sum: &[f64],
    sum_err2: &[f64],
    options: &PlotOptions,
) -> RatioPanel {
    let points = data
        .top
        .iter()
        .zip(&data.errors)
        .zip(sum)
        .enumerate()
        .filter(|(_, (_, s))| **s != 0.)
        .map(|(bin, ((d, e), s))| RatioPoint {
            bin,
            value: d / s,
            error: e / s,
        })
        .collect();
    let rel_err: Vec<_> = sum
        .iter()
        .zip(sum_err2)
        .map(|(s, e2)| if *s != 0. { e2.sqrt() / s.abs() } else { 0. })
        .collect();
    RatioPanel {
        title: options.ratio_title.clone(),
        range: options.ratio_range,
        points,
        band: band(DATA_COLOR, &vec![1.; sum.len()], &rel_err),
    }
}

fn decorations(options: &PlotOptions) -> Decorations {
    let mut label = options.experiment.clone();
    for (enabled, tag) in [
        (options.simulation, "Simulation"),
        (options.preliminary, "Preliminary"),
        (options.thesis, "Thesis"),
    ] {
        if enabled {
            label.push(' ');
            label.push_str(tag);
        }
    }
    let lumi_label = if options.unit_norm {
        None
    } else {
        options
            .luminosity
            .map(|lumi| format!("{lumi} fb⁻¹ ({} TeV)", options.energy))
    };
    Decorations {
        label,
        lumi_label,
        extra_text: options.extra_text.clone(),
    }
}

// data first, then the stack from top to bottom, then signals
fn legend(
    stack: &[PlotHist],
    signals: &[PlotHist],
    data: Option<&PlotHist>,
) -> Vec<LegendEntry> {
    let data = data.map(|h| (h, EntryKind::Data));
    let stack = stack.iter().rev().map(|h| (h, EntryKind::Stack));
    let signals = signals.iter().map(|h| (h, EntryKind::Signal));
    let mut entries: Vec<LegendEntry> = Vec::new();
    for (hist, kind) in data.into_iter().chain(stack).chain(signals) {
        if entries.iter().any(|e| e.title == hist.title) {
            continue;
        }
        entries.push(LegendEntry {
            title: hist.title.clone(),
            color: hist.color.clone(),
            style: hist.style,
            kind,
        });
    }
    entries
}

impl Plot {
    /// Write the plot in JSON format
    pub fn save_json(&self, path: &Path) -> Result<(), PlotError> {
        let file = File::create(path).map_err(|source| PlotError::Io {
            file: path.to_owned(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|source| {
            PlotError::Json {
                file: path.to_owned(),
                source,
            }
        })
    }

    /// Read a plot written with [Plot::save_json]
    pub fn load_json(path: &Path) -> Result<Self, PlotError> {
        let file = File::open(path).map_err(|source| PlotError::Io {
            file: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| PlotError::Json {
            file: path.to_owned(),
            source,
        })
    }

    pub fn nbins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Switch between a logarithmic and a linear y axis
    ///
    /// The lower end of the y range is recomputed, the upper end is kept.
    pub fn set_logy(&mut self, logy: bool) {
        if logy == self.logy {
            return;
        }
        let hists = self.stack.iter().chain(&self.signals).chain(&self.data);
        let ymin = y_min(hists, logy);
        let ymax = if self.y_range.1 > ymin {
            self.y_range.1
        } else {
            ymin + 1.
        };
        self.logy = logy;
        self.y_range = (ymin, ymax);
    }
}

/// Error assembling, writing or reading a plot
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Nothing to plot")]
    Empty,
    #[error("Binning of `{0}` differs from the other histograms")]
    Incompatible(String),
    #[error("Failed to access {file:?}")]
    Io {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to convert plot in {file:?}")]
    Json {
        file: PathBuf,
        source: serde_json::Error,
    },
}
