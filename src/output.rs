use std::{
    fmt::Display,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone};
use log::{debug, info};
use thiserror::Error;

use crate::{
    aggregate::GroupHist,
    plot::{Plot, PlotError},
    render::{render_svg, RenderError},
};

const LOG_DIR: &str = "logs";

/// Where the output of one run is written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    root: PathBuf,
    dir: PathBuf,
}

impl OutputPaths {
    /// `<storage_root>/<selection>[/<folder>]/<YYYY-MM-DD>/<HHhMM>`
    pub fn dated<Tz>(
        storage_root: &Path,
        selection: &str,
        folder: Option<&str>,
        timestamp: &DateTime<Tz>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut dir = storage_root.join(selection);
        if let Some(folder) = folder.filter(|f| !f.is_empty()) {
            dir.push(folder);
        }
        dir.push(timestamp.format("%Y-%m-%d").to_string());
        dir.push(timestamp.format("%Hh%M").to_string());
        Self {
            root: storage_root.to_owned(),
            dir,
        }
    }

    /// Storage root the output directory lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory including missing parents
    pub fn create(&self) -> Result<(), OutputError> {
        create_dir(&self.dir)
    }
}

/// Write `<name>.svg` and `<name>.json` into `dir`
///
/// Returns the written files.
pub fn save_plot(plot: &Plot, dir: &Path, name: &str) -> Result<Vec<PathBuf>, OutputError> {
    create_dir(dir)?;
    save_plot_as(plot, &dir.join(format!("{name}.svg")))
}

/// The SVG file to write for a requested output file
///
/// A missing extension is completed to `.svg`, other formats are rejected.
pub fn svg_path(file: &Path) -> Result<PathBuf, OutputError> {
    match file.extension() {
        None => Ok(file.with_extension("svg")),
        Some(ext) if ext.eq_ignore_ascii_case("svg") => Ok(file.to_owned()),
        Some(_) => Err(OutputError::Format(file.to_owned())),
    }
}

/// Write the plot to exactly the given file and its JSON sibling
pub fn save_plot_as(plot: &Plot, file: &Path) -> Result<Vec<PathBuf>, OutputError> {
    let svg = svg_path(file)?;
    if let Some(parent) = svg.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent)?;
    }
    let json = svg.with_extension("json");
    render_svg(plot, &svg)?;
    plot.save_json(&json)?;
    info!("Written plot to {svg:?}");
    Ok(vec![svg, json])
}

/// Write the per-member event counts to `logs/<name>_event_info.log`
pub fn write_event_counts(
    dir: &Path,
    name: &str,
    groups: &[&GroupHist],
) -> Result<PathBuf, OutputError> {
    let log_dir = dir.join(LOG_DIR);
    create_dir(&log_dir)?;
    let path = log_dir.join(format!("{name}_event_info.log"));
    debug!("Writing event counts to {path:?}");
    let io_err = |source| OutputError::Io {
        path: path.clone(),
        source,
    };
    let file = File::create(&path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "# group\tprocess\tstate\tevents\tyield").map_err(io_err)?;
    for group in groups {
        for count in &group.counts {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                group.name, count.process, count.state, count.count.events, count.count.weighted
            )
            .map_err(io_err)?;
        }
        let total = group.total();
        writeln!(
            out,
            "{}\ttotal\t-\t{}\t{}",
            group.name, total.events, total.weighted
        )
        .map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(path)
}

/// Copy files to the same location relative to `html_root` as they
/// have relative to `storage_root`
pub fn mirror(
    files: &[PathBuf],
    storage_root: &Path,
    html_root: &Path,
) -> Result<Vec<PathBuf>, OutputError> {
    let mut copies = Vec::with_capacity(files.len());
    for file in files {
        let relative = file
            .strip_prefix(storage_root)
            .map_err(|_| OutputError::OutsideRoot {
                file: file.clone(),
                root: storage_root.to_owned(),
            })?;
        let target = html_root.join(relative);
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        fs::copy(file, &target).map_err(|source| OutputError::Io {
            path: target.clone(),
            source,
        })?;
        debug!("Copied {file:?} to {target:?}");
        copies.push(target);
    }
    Ok(copies)
}

fn create_dir(dir: &Path) -> Result<(), OutputError> {
    fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_owned(),
        source,
    })
}

/// Error writing output files
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write to {path:?}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unsupported output format of {0:?}, only SVG can be written")]
    Format(PathBuf),
    #[error("Cannot mirror {file:?}: not inside {root:?}")]
    OutsideRoot { file: PathBuf, root: PathBuf },
    #[error("Failed to save plot")]
    Plot(#[from] PlotError),
    #[error("Failed to render plot")]
    Render(#[from] RenderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::MemberCount,
        config::Style,
        hist::Hist1D,
        plot::{make_plot, PlotOptions},
        producer::EventCount,
    };
    use chrono::{NaiveDate, Utc};

    fn group() -> GroupHist {
        let mut hist = Hist1D::uniform(2, 0., 2.).unwrap();
        hist.fill(0.5, 2.);
        hist.fill(1.5, 1.);
        let count = |state: &str, events, weighted| MemberCount {
            process: "wz".to_owned(),
            state: state.to_owned(),
            count: EventCount { events, weighted },
        };
        GroupHist {
            name: "wz".to_owned(),
            title: "WZ".to_owned(),
            color: None,
            style: Style::Fill,
            hist,
            counts: vec![count("eee", 1, 2.), count("mmm", 1, 1.)],
        }
    }

    #[test]
    fn dated() {
        let time = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(14, 7, 30)
            .unwrap();
        let time = Utc.from_utc_datetime(&time);
        let root = Path::new("/store");
        let paths = OutputPaths::dated(root, "3lDYControl", None, &time);
        assert_eq!(paths.dir(), Path::new("/store/3lDYControl/2024-05-01/14h07"));
        let paths = OutputPaths::dated(root, "3lDYControl", Some("unblind"), &time);
        assert_eq!(
            paths.dir(),
            Path::new("/store/3lDYControl/unblind/2024-05-01/14h07")
        );
        assert_eq!(paths.root(), root);
    }

    #[test]
    fn save_and_mirror() {
        let group = group();
        let plot = make_plot(&[group.clone()], &[], None, &PlotOptions::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("store");
        let html = dir.path().join("www");
        let time = Utc::now();
        let paths = OutputPaths::dated(&storage, "sel", None, &time);
        paths.create().unwrap();
        assert!(paths.dir().is_dir());

        let mut files = save_plot(&plot, paths.dir(), "m3l").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.is_file()));
        assert_eq!(Plot::load_json(&files[1]).unwrap(), plot);

        let log = write_event_counts(paths.dir(), "m3l", &[&group]).unwrap();
        assert!(log.ends_with("logs/m3l_event_info.log"));
        let content = fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "wz\twz\teee\t1\t2");
        assert_eq!(lines[3], "wz\ttotal\t-\t2\t3");
        files.push(log);

        let copies = mirror(&files, &storage, &html).unwrap();
        for (file, copy) in files.iter().zip(&copies) {
            assert_eq!(
                copy.strip_prefix(&html).unwrap(),
                file.strip_prefix(&storage).unwrap()
            );
            assert_eq!(fs::read(file).unwrap(), fs::read(copy).unwrap());
        }
        assert!(matches!(
            mirror(&[dir.path().join("elsewhere.svg")], &storage, &html),
            Err(OutputError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn explicit_file() {
        let plot = make_plot(&[group()], &[], None, &PlotOptions::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let files = save_plot_as(&plot, &dir.path().join("sub/plot.svg")).unwrap();
        assert_eq!(files[0], dir.path().join("sub/plot.svg"));
        assert_eq!(files[1], dir.path().join("sub/plot.json"));
        assert!(files[0].is_file());

        let files = save_plot_as(&plot, &dir.path().join("noext")).unwrap();
        assert_eq!(files[0], dir.path().join("noext.svg"));
        assert!(matches!(
            save_plot_as(&plot, &dir.path().join("plot.pdf")),
            Err(OutputError::Format(_))
        ));
        assert!(!dir.path().join("plot.svg").exists());
        assert!(!dir.path().join("plot.json").exists());
    }
}
