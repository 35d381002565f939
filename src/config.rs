//! Analysis configuration
//!
//! The configuration is read from a directory with the following
//! layout. Each entry is a directory containing any number of JSON or
//! YAML files, each file holding a map from names to records.
//!
//! ```text
//! file_info/<selection>/   process -> { file_path, is_data }
//! montecarlo/              process -> { cross_section, kfactor }
//! plot_groups/             group -> { members, title, color, style }
//! hist_info/               branch -> { nbins, xmin, xmax } or { edges }
//! states/                  state -> selection expression
//! presets/                 preset -> list of plot groups
//! ```
//!
//! Files are read in lexicographic order and later entries replace
//! earlier ones with the same name. Files that cannot be parsed are
//! reported and skipped. Invalid entries are dropped with a warning.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::hist::Binning;

/// A process with its event files and normalisation
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ProcessInfo {
    pub name: String,
    /// Path or glob pattern of the event files
    pub file_path: String,
    /// Cross section in pb
    pub cross_section: f64,
    pub kfactor: f64,
    pub is_data: bool,
}

impl ProcessInfo {
    /// Cross section including the k-factor
    pub fn total_cross_section(&self) -> f64 {
        self.cross_section * self.kfactor
    }
}

#[derive(Deserialize, Clone, Debug)]
struct FileEntry {
    file_path: String,
    #[serde(default)]
    is_data: bool,
}

/// Monte Carlo normalisation of a process
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct McInfo {
    /// Cross section in pb
    pub cross_section: f64,
    #[serde(default = "unit_kfactor")]
    pub kfactor: f64,
}

fn unit_kfactor() -> f64 {
    1.
}

/// How a plot group is drawn
#[derive(
    Deserialize, Serialize, Display, EnumString, Copy, Clone, Debug, Default, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Style {
    /// Filled area
    #[default]
    Fill,
    /// Outline only
    Line,
    /// Points with error bars
    Marker,
}

/// A named set of processes drawn as one histogram
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PlotGroup {
    #[serde(default)]
    pub name: String,
    pub members: Vec<String>,
    /// Legend entry, defaults to the group name
    pub title: Option<String>,
    /// Fill or line colour as `#rrggbb`
    pub color: Option<String>,
    #[serde(default)]
    pub style: Style,
}

impl PlotGroup {
    /// The legend title
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Histogram binning and axis titles for a branch
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BinSpec {
    #[serde(flatten)]
    pub binning: Binning,
    pub x_title: Option<String>,
    pub y_title: Option<String>,
}

/// Where output files are written
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    /// Root directory for plots
    pub storage_root: PathBuf,
    /// Web-servable directory that mirrors the storage root
    pub html_root: Option<PathBuf>,
}

/// Validated analysis configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigStore {
    file_info: BTreeMap<String, ProcessInfo>,
    monte_carlo: BTreeMap<String, McInfo>,
    plot_groups: BTreeMap<String, PlotGroup>,
    hist_info: BTreeMap<String, BinSpec>,
    states: BTreeMap<String, String>,
    presets: BTreeMap<String, Vec<String>>,
    load_errors: Vec<String>,
}

impl ConfigStore {
    /// Load the configuration in `dir` for the given event selection
    pub fn load(dir: &Path, selection: &str) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::NoDir(dir.to_owned()));
        }
        let mut store = Self::default();

        let monte_carlo: BTreeMap<String, McInfo> =
            store.read_category(&dir.join("montecarlo"))?;
        for (name, info) in monte_carlo {
            if !(info.cross_section >= 0.) {
                warn!("Ignoring `{name}`: invalid cross section {}", info.cross_section);
            } else if !(info.kfactor > 0.) {
                warn!("Ignoring `{name}`: invalid k-factor {}", info.kfactor);
            } else {
                store.monte_carlo.insert(name, info);
            }
        }

        let file_dir = dir.join("file_info").join(selection);
        if !file_dir.is_dir() {
            warn!("No file information for selection `{selection}` in {file_dir:?}");
        }
        let files: BTreeMap<String, FileEntry> = store.read_category(&file_dir)?;
        for (name, entry) in files {
            let (cross_section, kfactor) = if entry.is_data {
                (1., 1.)
            } else if let Some(mc) = store.monte_carlo.get(&name) {
                (mc.cross_section, mc.kfactor)
            } else {
                warn!("Ignoring simulated process `{name}` without Monte Carlo information");
                continue;
            };
            let info = ProcessInfo {
                name: name.clone(),
                file_path: entry.file_path,
                cross_section,
                kfactor,
                is_data: entry.is_data,
            };
            store.file_info.insert(name, info);
        }

        let plot_groups: BTreeMap<String, PlotGroup> =
            store.read_category(&dir.join("plot_groups"))?;
        store.plot_groups = plot_groups
            .into_iter()
            .map(|(name, mut group)| {
                group.name = name.clone();
                (name, group)
            })
            .collect();

        let hist_info: BTreeMap<String, BinSpec> =
            store.read_category(&dir.join("hist_info"))?;
        for (name, spec) in hist_info {
            match spec.binning.edges() {
                Ok(_) => {
                    store.hist_info.insert(name, spec);
                }
                Err(err) => warn!("Ignoring binning for `{name}`: {err}"),
            }
        }

        store.states = store.read_category(&dir.join("states"))?;
        store.presets = store.read_category(&dir.join("presets"))?;
        Ok(store)
    }

    // Read and merge all files in a configuration directory
    fn read_category<T: DeserializeOwned>(
        &mut self,
        dir: &Path,
    ) -> Result<BTreeMap<String, T>, ConfigError> {
        let mut res = BTreeMap::new();
        if !dir.is_dir() {
            debug!("Skipping missing configuration directory {dir:?}");
            return Ok(res);
        }
        let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy())).join("*");
        let pattern = pattern.to_string_lossy();
        let mut files = glob::glob(&pattern)?
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();
        for file in files.into_iter().filter(|f| f.is_file()) {
            match read_file::<BTreeMap<String, T>>(&file) {
                Ok(Some(entries)) => {
                    for (name, entry) in entries {
                        if res.insert(name.clone(), entry).is_some() {
                            debug!("`{name}` from {file:?} replaces earlier entry");
                        }
                    }
                }
                Ok(None) => debug!("Skipping {file:?}: not a JSON or YAML file"),
                Err(err) => {
                    let msg = format!("{err}");
                    error!("{msg}");
                    self.load_errors.push(msg);
                }
            }
        }
        Ok(res)
    }

    /// All processes, including data
    pub fn file_info(&self) -> &BTreeMap<String, ProcessInfo> {
        &self.file_info
    }

    /// Look up a single process
    pub fn process(&self, name: &str) -> Option<&ProcessInfo> {
        self.file_info.get(name)
    }

    pub fn monte_carlo_info(&self) -> &BTreeMap<String, McInfo> {
        &self.monte_carlo
    }

    /// Look up a plot group
    ///
    /// Returns `None` if there is no group with the given name. Callers
    /// usually treat the name as a single process in that case.
    pub fn plot_group(&self, name: &str) -> Option<&PlotGroup> {
        self.plot_groups.get(name)
    }

    pub fn plot_group_members(&self, name: &str) -> Option<&[String]> {
        self.plot_group(name).map(|g| g.members.as_slice())
    }

    /// Binning and axis titles for a branch
    pub fn hist_bin_info(&self, branch: &str) -> Option<&BinSpec> {
        self.hist_info.get(branch)
    }

    /// Selection expression of a state
    pub fn state(&self, name: &str) -> Option<&str> {
        self.states.get(name).map(|s| s.as_str())
    }

    pub fn states(&self) -> &BTreeMap<String, String> {
        &self.states
    }

    pub fn preset(&self, name: &str) -> Option<&[String]> {
        self.presets.get(name).map(|p| p.as_slice())
    }

    /// Resolve a file set selector into a list of plot groups
    ///
    /// The selector is either the name of a preset or a comma-separated
    /// list of plot groups or processes.
    pub fn resolve_file_set(&self, selector: &str) -> Vec<String> {
        if let Some(preset) = self.preset(selector) {
            return preset.to_vec();
        }
        selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Messages for all configuration files that could not be read
    pub fn load_errors(&self) -> &[String] {
        &self.load_errors
    }
}

fn read_file<T: DeserializeOwned>(file: &Path) -> Result<Option<T>, ConfigError> {
    let ext = file.extension().and_then(|e| e.to_str());
    let is_yaml = match ext {
        Some("json") => false,
        Some("yaml" | "yml") => true,
        _ => return Ok(None),
    };
    let content = fs::read_to_string(file).map_err(|source| ConfigError::Io {
        file: file.to_owned(),
        source,
    })?;
    let res = if is_yaml {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            file: file.to_owned(),
            source,
        })?
    } else {
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            file: file.to_owned(),
            source,
        })?
    };
    Ok(Some(res))
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory {0:?} does not exist")]
    NoDir(PathBuf),
    #[error("Failed to read {file:?}: {source}")]
    Io {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {file:?}: {source}")]
    Json {
        file: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to parse {file:?}: {source}")]
    Yaml {
        file: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Invalid configuration path")]
    Pattern(#[from] glob::PatternError),
    #[error("Failed to access configuration file")]
    Glob(#[from] glob::GlobError),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn log_init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    pub(crate) fn write(dir: &Path, file: &str, content: &str) {
        let path = dir.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn load() {
        log_init();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "file_info/3l/mc.json",
            r#"{
                "wz": {"file_path": "/data/wz*.hepmc"},
                "zz": {"file_path": "/data/zz.hepmc.gz"},
                "ttz": {"file_path": "/data/ttz.lhe"},
                "data": {"file_path": "/data/data.hepmc", "is_data": true}
            }"#,
        );
        write(root, "file_info/2l/other.json", r#"{"dy": {"file_path": "dy"}}"#);
        write(
            root,
            "montecarlo/xsec.yaml",
            "wz: {cross_section: 4.4, kfactor: 1.1}\nzz: {cross_section: -1}\n",
        );
        write(root, "montecarlo/z_more.json", r#"{"zz": {"cross_section": 1.2}}"#);
        write(
            root,
            "plot_groups/groups.yaml",
            "diboson:\n  members: [wz, zz]\n  title: VV\n  color: '#ff0000'\n  style: line\n",
        );
        write(
            root,
            "hist_info/bins.json",
            r#"{
                "m_3l": {"nbins": 10, "xmin": 0, "xmax": 500, "x_title": "m_{3l} [GeV]"},
                "pt_l1": {"edges": [0, 50, 20]},
                "n_jets": {"nbins": 0, "xmin": 0, "xmax": 5}
            }"#,
        );
        write(root, "states/states.json", r#"{"eee": "n_e == 3", "mmm": "n_mu == 3"}"#);
        write(root, "presets/presets.json", r#"{"all": ["diboson", "ttz"]}"#);
        write(root, "states/broken.json", r#"{"eem": "#);
        write(root, "states/README", "not configuration");

        let config = ConfigStore::load(root, "3l").unwrap();

        let processes: Vec<_> = config.file_info().keys().cloned().collect();
        assert_eq!(processes, ["data", "wz", "zz"]);
        let wz = config.process("wz").unwrap();
        assert!(!wz.is_data);
        assert!((wz.total_cross_section() - 4.84).abs() < 1e-12);
        assert_eq!(config.process("zz").unwrap().cross_section, 1.2);
        assert!(config.process("data").unwrap().is_data);
        assert!(config.process("dy").is_none());

        let group = config.plot_group("diboson").unwrap();
        assert_eq!(group.title(), "VV");
        assert_eq!(group.style, Style::Line);
        assert_eq!(
            config.plot_group_members("diboson").unwrap(),
            &["wz".to_owned(), "zz".to_owned()]
        );
        assert!(config.plot_group("wz").is_none());

        let bins = config.hist_bin_info("m_3l").unwrap();
        assert_eq!(bins.x_title.as_deref(), Some("m_{3l} [GeV]"));
        assert!(config.hist_bin_info("pt_l1").is_none());
        assert!(config.hist_bin_info("n_jets").is_none());

        assert_eq!(config.state("eee"), Some("n_e == 3"));
        assert_eq!(config.states().len(), 2);
        assert_eq!(config.load_errors().len(), 1);
        assert!(config.load_errors()[0].contains("broken.json"));

        assert_eq!(config.resolve_file_set("all"), ["diboson", "ttz"]);
        assert_eq!(config.resolve_file_set("wz, zz,"), ["wz", "zz"]);
    }

    #[test]
    fn special_characters_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("config[3l]*");
        write(&root, "file_info/3l/mc.json", r#"{"wz": {"file_path": "wz.hepmc"}}"#);
        write(&root, "montecarlo/xsec.json", r#"{"wz": {"cross_section": 4.4}}"#);
        write(&root, "states/states.json", r#"{"eee": "n_e == 3"}"#);
        // would be matched by the unescaped pattern
        write(dir.path(), "config3*/states/other.json", r#"{"mmm": "n_mu == 3"}"#);

        let config = ConfigStore::load(&root, "3l").unwrap();
        assert_eq!(config.process("wz").unwrap().cross_section, 4.4);
        assert_eq!(config.states().keys().collect::<Vec<_>>(), ["eee"]);
        assert!(config.load_errors().is_empty());
    }

    #[test]
    fn missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nothing");
        assert!(matches!(
            ConfigStore::load(&missing, "3l"),
            Err(ConfigError::NoDir(_))
        ));
    }
}
