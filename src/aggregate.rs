use std::fmt::{self, Display};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{ConfigStore, Style},
    factory::{FactoryContext, FactoryError, HistFactory},
    hist::{Hist1D, HistError},
    producer::{DrawError, EventCount, Misconfiguration},
};

/// Event count of one process in one state
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MemberCount {
    pub process: String,
    pub state: String,
    #[serde(flatten)]
    pub count: EventCount,
}

/// Histogram of a plot group, summed over processes and states
#[derive(Clone, Debug, PartialEq)]
pub struct GroupHist {
    pub name: String,
    /// Legend title
    pub title: String,
    pub color: Option<String>,
    pub style: Style,
    pub hist: Hist1D,
    /// Counts for each process and state that was drawn successfully
    pub counts: Vec<MemberCount>,
}

impl GroupHist {
    /// Total count over all processes and states
    pub fn total(&self) -> EventCount {
        let mut total = EventCount::default();
        for c in &self.counts {
            total += c.count;
        }
        total
    }
}

/// Where to take the histogram producers from
#[derive(Copy, Clone, Debug)]
pub enum FactorySource<'a> {
    /// Reuse already loaded processes
    Prebuilt(&'a HistFactory),
    /// Load the processes of the plot group
    Context(&'a FactoryContext),
}

impl<'a> From<&'a HistFactory> for FactorySource<'a> {
    fn from(factory: &'a HistFactory) -> Self {
        Self::Prebuilt(factory)
    }
}

impl<'a> From<&'a FactoryContext> for FactorySource<'a> {
    fn from(context: &'a FactoryContext) -> Self {
        Self::Context(context)
    }
}

/// Member processes of a plot group
///
/// A name that is not a plot group is taken as the name of a single
/// process.
pub fn group_members(config: &ConfigStore, group: &str) -> Vec<String> {
    match config.plot_group_members(group) {
        Some(members) => members.to_vec(),
        None => {
            debug!("`{group}` is not a plot group, treating it as a process");
            vec![group.to_owned()]
        }
    }
}

/// Histogram `branch` for the plot group `group`, summed over all
/// member processes and `states`
///
/// Draw failures for individual processes and states are logged and
/// skipped.
pub fn config_hist<'a, S: AsRef<str>>(
    config: &ConfigStore,
    group: &str,
    branch: &str,
    states: &[S],
    factory: impl Into<FactorySource<'a>>,
) -> Result<GroupHist, AggregateError> {
    let members = group_members(config, group);
    let bins = config
        .hist_bin_info(branch)
        .ok_or_else(|| AggregateError::MissingBins(branch.to_owned()))?;
    let hist = Hist1D::new(&bins.binning)?;

    let built;
    let factory = match factory.into() {
        FactorySource::Prebuilt(factory) => factory,
        FactorySource::Context(context) => {
            built = HistFactory::build(context, config, &members)?;
            &built
        }
    };

    let (title, color, style) = match config.plot_group(group) {
        Some(g) => (g.title().to_owned(), g.color.clone(), g.style),
        None => (group.to_owned(), None, Style::default()),
    };
    let mut res = GroupHist {
        name: group.to_owned(),
        title,
        color,
        style,
        hist,
        counts: Vec::new(),
    };

    for member in &members {
        let Some(entry) = factory.get(member) else {
            warn!("No events for `{member}` in plot group `{group}`");
            continue;
        };
        for state in states {
            let state = state.as_ref();
            let drawn = config
                .state(state)
                .ok_or_else(|| {
                    DrawError::from(Misconfiguration::UnknownState(state.to_owned()))
                })
                .and_then(|selection| {
                    entry.producer.draw(branch, selection, &bins.binning)
                });
            match drawn {
                Ok(drawn) => {
                    debug!(
                        "{group}/{member}/{state}: {} events, yield {}",
                        drawn.count.events, drawn.count.weighted
                    );
                    res.hist.add(&drawn.hist)?;
                    res.counts.push(MemberCount {
                        process: member.clone(),
                        state: state.to_owned(),
                        count: drawn.count,
                    });
                }
                Err(err) => warn!(
                    "Failed to draw `{branch}` for `{member}` in state `{state}`: {}",
                    DrawFailure(&err)
                ),
            }
        }
    }
    Ok(res)
}

// error chain with the failure category
struct DrawFailure<'a>(&'a DrawError);

impl Display for DrawFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            DrawError::Misconfigured(err) => write!(f, "misconfiguration: {err}"),
            DrawError::Evaluation { expr, source } => {
                write!(f, "failed to evaluate `{expr}`: {source}")
            }
        }
    }
}

/// Error aggregating a plot group histogram
#[derive(Debug, Error)]
pub enum AggregateError {
    /// No bin definition for the branch
    #[error("No binning defined for `{0}`")]
    MissingBins(String),
    #[error("Failed to load processes")]
    Factory(#[from] FactoryError),
    #[error("Histogram error")]
    Hist(#[from] HistError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::write,
        event::Weights,
        factory::{
            tests::{hepmc_events, write_config},
            FactoryContextBuilder, FactoryEntry,
        },
        producer::WeightedHistProducer,
        reco::{Lepton, RecoEvent},
        sample::EventSample,
        weights::WeightInfo,
    };
    use noisy_float::prelude::*;
    use particle_id::ParticleID;
    use rand::seq::SliceRandom;
    use rand_xoshiro::{rand_core::SeedableRng, Xoshiro256Plus};
    use std::path::Path;

    fn log_init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.)
    }

    fn event(n_e: usize, n_mu: usize, pt: f64, weight: f64) -> RecoEvent {
        let lepton = |id| Lepton {
            id: ParticleID::new(id),
            p: [pt, pt, 0., 0.].into(),
        };
        let mut leptons = vec![lepton(11); n_e];
        leptons.extend(vec![lepton(13); n_mu]);
        RecoEvent {
            weights: Weights::from(vec![n64(weight)]),
            leptons,
            ..Default::default()
        }
    }

    fn write_analysis_config(root: &Path) {
        write(
            root,
            "hist_info/bins.json",
            r#"{
                "pt_l1": {"nbins": 4, "xmin": 0, "xmax": 100},
                "n_l": {"nbins": 5, "xmin": 0, "xmax": 5}
            }"#,
        );
        write(
            root,
            "states/states.yaml",
            "ee: n_e == 2 && n_mu == 0\nmm: n_mu == 2 && n_e == 0\nbroken: n_tau == 2\n",
        );
        write(
            root,
            "plot_groups/groups.json",
            r#"{
                "both": {"members": ["a", "b"], "title": "A+B", "color": "4060c0"},
                "only_a": {"members": ["a"]},
                "lost": {"members": ["nothing"]}
            }"#,
        );
    }

    fn simulation(events: Vec<RecoEvent>, info: WeightInfo, lumi: f64) -> WeightedHistProducer {
        WeightedHistProducer::simulation(
            EventSample::from_events(events, Vec::new()),
            info,
            "weight",
            lumi,
            "",
        )
    }

    fn factory(entries: Vec<(&str, WeightedHistProducer)>) -> HistFactory {
        let entries = entries
            .into_iter()
            .map(|(name, producer)| {
                let info = crate::config::ProcessInfo {
                    name: name.to_owned(),
                    file_path: String::new(),
                    cross_section: producer.weight_info().cross_section(),
                    kfactor: 1.,
                    is_data: producer.is_data(),
                };
                (name.to_owned(), FactoryEntry { info, producer })
            })
            .collect();
        HistFactory::from_entries(entries)
    }

    fn config() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        write_analysis_config(dir.path());
        let config = ConfigStore::load(dir.path(), "any").unwrap();
        (dir, config)
    }

    #[test]
    fn yield_independent_of_order() {
        log_init();
        let (_dir, config) = config();

        let mut events: Vec<_> = (0..100)
            .map(|i| event(2, 0, 10. + (i % 9) as f64 * 10., 0.5 + (i % 7) as f64))
            .collect();
        let total: f64 = events.iter().map(|e| e.weights.central().raw()).sum();
        let (lumi, xs, kfactor, sum) = (140., 3.2, 1.25, 71.);
        let info = WeightInfo::new(xs * kfactor, sum);
        let expected = lumi * xs * kfactor * total / sum;

        let mut rng = Xoshiro256Plus::seed_from_u64(17);
        let mut previous: Option<Hist1D> = None;
        for _ in 0..3 {
            let factory = factory(vec![("a", simulation(events.clone(), info, lumi))]);
            let res = config_hist(&config, "a", "pt_l1", &["ee"], &factory).unwrap();
            assert!(close(res.total().weighted, expected));
            assert_eq!(res.total().events, 100);
            let integral = res.hist.integral() + res.hist.overflow();
            assert!(close(integral, expected));
            if let Some(previous) = previous {
                for (a, b) in previous.contents().iter().zip(res.hist.contents()) {
                    assert!(close(*a, *b));
                }
            }
            previous = Some(res.hist);
            events.shuffle(&mut rng);
        }
    }

    #[test]
    fn data_yield() {
        let (_dir, config) = config();
        let events = vec![event(2, 0, 30., 7.); 13];
        let data = WeightedHistProducer::data(EventSample::from_events(events, Vec::new()), "");
        let factory = factory(vec![("data", data)]);
        let res = config_hist(&config, "data", "n_l", &["ee", "mm"], &factory).unwrap();
        assert_eq!(res.hist.integral(), 13.);
        assert_eq!(res.total().events, 13);
        assert_eq!(res.total().weighted, 13.);
        assert_eq!(res.hist.content(2), 13.);
    }

    #[test]
    fn sum_over_members_and_states() {
        log_init();
        let (_dir, config) = config();
        let info = WeightInfo::new(1., 1.);
        let a = vec![event(2, 0, 10., 1.), event(0, 2, 30., 2.), event(0, 2, 60., 1.)];
        let b = vec![event(2, 0, 80., 3.), event(2, 0, 10., 0.5), event(1, 1, 10., 9.)];
        let factory = factory(vec![
            ("a", simulation(a, info, 1.)),
            ("b", simulation(b, info, 1.)),
        ]);

        let res = config_hist(&config, "both", "pt_l1", &["ee", "mm"], &factory).unwrap();
        assert_eq!(res.title, "A+B");
        assert_eq!(res.color.as_deref(), Some("4060c0"));
        assert_eq!(res.counts.len(), 4);

        let mut expected = res.hist.empty_like();
        let bins = &config.hist_bin_info("pt_l1").unwrap().binning;
        for process in ["a", "b"] {
            let producer = &factory.get(process).unwrap().producer;
            for state in ["ee", "mm"] {
                let selection = config.state(state).unwrap();
                let drawn = producer.draw("pt_l1", selection, bins).unwrap();
                expected.add(&drawn.hist).unwrap();
            }
        }
        assert_eq!(res.hist, expected);
        assert_eq!(res.hist.contents(), &[1.5, 2., 1., 3.]);

        // a failing state contributes nothing
        let with_broken =
            config_hist(&config, "both", "pt_l1", &["ee", "broken", "mm", "missing"], &factory)
                .unwrap();
        assert_eq!(with_broken.hist, res.hist);
        assert_eq!(with_broken.counts.len(), 4);
        let without_mm = config_hist(&config, "both", "pt_l1", &["ee", "broken"], &factory).unwrap();
        assert_eq!(without_mm.hist.contents(), &[1.5, 0., 0., 3.]);
    }

    #[test]
    fn unknown_group_and_process() {
        let (_dir, config) = config();
        let factory = factory(Vec::new());
        let res = config_hist(&config, "nonexistent", "pt_l1", &["ee"], &factory).unwrap();
        assert_eq!(res.title, "nonexistent");
        assert_eq!(res.hist.integral(), 0.);
        assert!(res.counts.is_empty());
        let res = config_hist(&config, "lost", "pt_l1", &["ee"], &factory).unwrap();
        assert_eq!(res.hist.integral(), 0.);

        assert!(matches!(
            config_hist(&config, "a", "m_jj", &["ee"], &factory),
            Err(AggregateError::MissingBins(_))
        ));
    }

    #[test]
    fn single_member_group() {
        let (_dir, config) = config();
        let info = WeightInfo::new(2., 5.);
        let events = vec![event(2, 0, 10., 1.), event(2, 0, 50., 2.)];
        let factory = factory(vec![("a", simulation(events, info, 10.))]);
        let group = config_hist(&config, "only_a", "pt_l1", &["ee"], &factory).unwrap();
        let bare = config_hist(&config, "a", "pt_l1", &["ee"], &factory).unwrap();
        assert_eq!(group.hist, bare.hist);
        assert_eq!(group.counts, bare.counts);
    }

    #[test]
    fn from_files() {
        log_init();
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events");
        std::fs::create_dir(&events).unwrap();
        std::fs::write(events.join("sig1.hepmc"), hepmc_events(&[(1., 2.), (3., 2.)])).unwrap();
        std::fs::write(events.join("data.hepmc"), hepmc_events(&[(1., 1.); 3])).unwrap();
        let config_dir = dir.path().join("config");
        write_config(&config_dir, &events);
        write(
            &config_dir,
            "states/states.json",
            r#"{"e": "n_e == 1"}"#,
        );
        write(&config_dir, "hist_info/bins.json", r#"{"n_e": {"nbins": 3, "xmin": 0, "xmax": 3}}"#);
        write(
            &config_dir,
            "plot_groups/groups.json",
            r#"{"signal": {"members": ["sig"]}}"#,
        );
        let config = ConfigStore::load(&config_dir, "1e").unwrap();

        for lumi in [10., 1000.] {
            let context = FactoryContextBuilder::default()
                .luminosity(lumi)
                .build()
                .unwrap();
            let sig = config_hist(&config, "signal", "n_e", &["e"], &context).unwrap();
            // L × 3 pb × (1 + 3) / 4
            assert!(close(sig.hist.content(1), 3. * lumi));
            let data = config_hist(&config, "data", "n_e", &["e"], &context).unwrap();
            assert_eq!(data.hist.content(1), 3.);
            assert_eq!(data.total().events, 3);
        }
    }
}
