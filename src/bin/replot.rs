mod opt;

use std::path::PathBuf;

use crate::opt::{parse_range, LogLevel};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use stackhist::{
    output::save_plot_as,
    plot::{LegendPosition, Plot},
    VERSION,
};

/// Render a plot saved in JSON format again, optionally with changed
/// display settings
#[derive(Debug, Parser)]
#[clap(about, author, version)]
struct Opt {
    /// Plot in JSON format, as written next to every SVG plot.
    #[clap(name = "INFILE")]
    infile: PathBuf,

    /// Output SVG file. Defaults to the input file with an `.svg` extension.
    ///
    /// The possibly modified plot is also written in JSON format next to
    /// the output file.
    #[clap(short, long)]
    outfile: Option<PathBuf>,

    /// Logarithmic y axis.
    #[clap(long, conflicts_with = "linear")]
    logy: bool,

    /// Linear y axis.
    #[clap(long)]
    linear: bool,

    /// Legend position, 'left' or 'right'.
    #[clap(long)]
    legend: Option<LegendPosition>,

    /// Range of the ratio panel.
    #[clap(long, value_parser = parse_range)]
    ratio_range: Option<(f64, f64)>,

    /// Remove the ratio panel.
    #[clap(long)]
    no_ratio: bool,

    /// Remove experiment and luminosity labels.
    #[clap(long)]
    no_decorations: bool,

    /// Verbosity level.
    #[clap(value_enum, short, long, default_value = "info")]
    loglevel: LogLevel,
}

fn main() -> Result<()> {
    let args = argfile::expand_args_from(
        std::env::args_os(),
        argfile::parse_fromfile,
        argfile::PREFIX,
    )
    .with_context(|| "Failed to read argument file")?;
    let opt = Opt::parse_from(args);

    let env = Env::default().filter_or("STACKHIST_LOG", opt.loglevel.as_str());
    env_logger::init_from_env(env);
    info!("stackhist-replot {VERSION}");
    debug!("settings: {:#?}", opt);

    let written = replot(&opt)?;
    info!("Written {written:?}");
    Ok(())
}

fn replot(opt: &Opt) -> Result<Vec<PathBuf>> {
    let mut plot = Plot::load_json(&opt.infile)?;
    if opt.logy {
        plot.set_logy(true);
    } else if opt.linear {
        plot.set_logy(false);
    }
    if let Some(legend) = opt.legend {
        plot.legend_position = legend;
    }
    if let (Some(range), Some(ratio)) = (opt.ratio_range, plot.ratio.as_mut()) {
        ratio.range = range;
    }
    if opt.no_ratio {
        plot.ratio = None;
    }
    if opt.no_decorations {
        plot.decorations = None;
    }
    let outfile = opt
        .outfile
        .clone()
        .unwrap_or_else(|| opt.infile.with_extension("svg"));
    let written = save_plot_as(&plot, &outfile)
        .with_context(|| format!("Failed to write plot to {outfile:?}"))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackhist::{
        aggregate::GroupHist,
        config::Style,
        hist::Hist1D,
        plot::{make_plot, PlotOptions},
    };

    fn saved_plot(dir: &std::path::Path) -> PathBuf {
        let mut hist = Hist1D::uniform(2, 0., 2.).unwrap();
        hist.fill(0.5, 4.);
        hist.fill(1.5, 8.);
        let group = GroupHist {
            name: "wz".to_owned(),
            title: "WZ".to_owned(),
            color: None,
            style: Style::Fill,
            hist: hist.clone(),
            counts: Vec::new(),
        };
        let data = GroupHist {
            name: "data".to_owned(),
            title: "Data".to_owned(),
            ..group.clone()
        };
        let options = PlotOptions::builder().luminosity(1.).build();
        let plot = make_plot(&[group], &[], Some(&data), &options).unwrap();
        let file = dir.join("n_e.json");
        plot.save_json(&file).unwrap();
        file
    }

    #[test]
    fn rerender() {
        let dir = tempfile::tempdir().unwrap();
        let infile = saved_plot(dir.path());
        let original = Plot::load_json(&infile).unwrap();
        assert!(original.ratio.is_some());

        let outfile = dir.path().join("log/n_e.svg");
        let opt = Opt::try_parse_from([
            "stackhist-replot",
            infile.to_str().unwrap(),
            "-o",
            outfile.to_str().unwrap(),
            "--logy",
            "--legend",
            "left",
            "--no-ratio",
        ])
        .unwrap();
        let written = replot(&opt).unwrap();
        assert_eq!(written, [outfile.clone(), dir.path().join("log/n_e.json")]);
        assert!(std::fs::read_to_string(&outfile).unwrap().starts_with("<svg"));

        let plot = Plot::load_json(&written[1]).unwrap();
        assert!(plot.logy);
        assert_eq!(plot.y_range.0, 2.);
        assert_eq!(plot.legend_position, LegendPosition::Left);
        assert!(plot.ratio.is_none());
        assert_eq!(plot.stack, original.stack);

        // default output next to the input
        let opt = Opt::try_parse_from([
            "stackhist-replot",
            infile.to_str().unwrap(),
            "--ratio-range",
            "0.5,1.5",
        ])
        .unwrap();
        let written = replot(&opt).unwrap();
        assert_eq!(written[0], dir.path().join("n_e.svg"));
        let plot = Plot::load_json(&infile).unwrap();
        assert_eq!(plot.ratio.unwrap().range, (0.5, 1.5));

        let opt = Opt::try_parse_from([
            "stackhist-replot",
            infile.to_str().unwrap(),
            "-o",
            "n_e.png",
        ])
        .unwrap();
        assert!(replot(&opt).is_err());
    }
}
