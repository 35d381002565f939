use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    expr::{EvalError, Expr, ExprError},
    hist::{Binning, Hist1D, HistError},
    sample::EventSample,
    weights::WeightInfo,
};

/// Number of selected events and their normalised yield
#[derive(Deserialize, Serialize, Copy, Clone, Debug, Default, PartialEq)]
pub struct EventCount {
    /// Raw number of events passing the selection
    pub events: usize,
    /// Normalised sum of weights of the passing events
    pub weighted: f64,
}

impl std::ops::AddAssign for EventCount {
    fn add_assign(&mut self, rhs: Self) {
        self.events += rhs.events;
        self.weighted += rhs.weighted;
    }
}

/// A normalised histogram together with the corresponding event count
#[derive(Clone, Debug, PartialEq)]
pub struct Drawn {
    pub hist: Hist1D,
    pub count: EventCount,
}

#[derive(Clone, Debug, PartialEq)]
enum Normalisation {
    Data,
    Simulation {
        weight_info: WeightInfo,
        luminosity: f64,
        weight: String,
    },
}

/// Draws normalised histograms of the events of a single process
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedHistProducer {
    sample: EventSample,
    cut: String,
    normalisation: Normalisation,
}

impl WeightedHistProducer {
    /// Producer for a simulated process
    ///
    /// Each event enters with the value of the `weight` expression.
    /// Histograms are scaled by `luminosity × cross section / sum of
    /// weights`, with the luminosity in inverse pb.
    pub fn simulation(
        sample: EventSample,
        weight_info: WeightInfo,
        weight: impl Into<String>,
        luminosity: f64,
        cut: impl Into<String>,
    ) -> Self {
        Self {
            sample,
            cut: cut.into(),
            normalisation: Normalisation::Simulation {
                weight_info,
                luminosity,
                weight: weight.into(),
            },
        }
    }

    /// Producer for measured data
    ///
    /// Every event has unit weight and no scaling is applied.
    pub fn data(sample: EventSample, cut: impl Into<String>) -> Self {
        Self {
            sample,
            cut: cut.into(),
            normalisation: Normalisation::Data,
        }
    }

    pub fn is_data(&self) -> bool {
        self.normalisation == Normalisation::Data
    }

    pub fn sample(&self) -> &EventSample {
        &self.sample
    }

    /// The normalisation of the process
    pub fn weight_info(&self) -> WeightInfo {
        match &self.normalisation {
            Normalisation::Data => WeightInfo::new(1., 1.),
            Normalisation::Simulation { weight_info, .. } => *weight_info,
        }
    }

    /// Histogram `branch` for all events passing both the cut and
    /// the `selection`
    ///
    /// Events where `branch` is undefined are counted but not filled.
    pub fn draw(
        &self,
        branch: &str,
        selection: &str,
        binning: &Binning,
    ) -> Result<Drawn, DrawError> {
        let names = self.sample.weight_names();
        let compile = |source: &str| {
            Expr::compile(source, names).map_err(Misconfiguration::from)
        };
        let branch_expr = compile(branch)?;
        let cut = compile(&self.cut)?;
        let selection = compile(selection)?;
        let (weight, scale) = match &self.normalisation {
            Normalisation::Data => (Expr::one(), 1.),
            Normalisation::Simulation {
                weight_info,
                luminosity,
                weight,
            } => (compile(weight)?, weight_info.scale(*luminosity)),
        };
        let mut hist = Hist1D::new(binning).map_err(Misconfiguration::from)?;
        let mut count = EventCount::default();
        let mut values = Vec::new();

        let eval_err = |expr: &Expr| {
            let expr = expr.source().to_owned();
            move |source: EvalError| DrawError::Evaluation { expr, source }
        };
        for ev in &self.sample {
            if !cut.passes(ev).map_err(eval_err(&cut))?
                || !selection.passes(ev).map_err(eval_err(&selection))?
            {
                continue;
            }
            let w = weight.eval(ev).map_err(eval_err(&weight))?;
            let x = branch_expr.eval(ev).map_err(eval_err(&branch_expr))?;
            values.push((x, w));
            count.events += 1;
            count.weighted += w;
        }
        hist.fill_many(values);
        hist.scale(scale);
        count.weighted *= scale;
        debug!(
            "`{branch}` with selection `{}`: {} events, yield {}",
            selection.source(),
            count.events,
            count.weighted
        );
        Ok(Drawn { hist, count })
    }
}

/// Error drawing a histogram
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DrawError {
    /// Invalid configuration, independent of the events
    #[error("Misconfiguration")]
    Misconfigured(#[from] Misconfiguration),
    /// Failure evaluating an expression for an event
    #[error("Failed to evaluate `{expr}`")]
    Evaluation {
        expr: String,
        #[source]
        source: EvalError,
    },
}

/// Invalid histogram or selection definition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Misconfiguration {
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error(transparent)]
    Binning(#[from] HistError),
    #[error("Unknown state `{0}`")]
    UnknownState(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::Weights, reco::{Lepton, RecoEvent}};
    use noisy_float::prelude::*;
    use particle_id::ParticleID;

    fn event(n_e: usize, weight: f64) -> RecoEvent {
        let lepton = Lepton {
            id: ParticleID::new(11),
            p: [20., 20., 0., 0.].into(),
        };
        RecoEvent {
            weights: Weights::from(vec![n64(weight), n64(2. * weight)]),
            leptons: vec![lepton; n_e],
            ..Default::default()
        }
    }

    fn sample() -> EventSample {
        let events = vec![event(1, 1.), event(2, 2.), event(2, -1.), event(3, 4.)];
        EventSample::from_events(events, vec!["double".to_owned()])
    }

    fn binning() -> Binning {
        Binning::Uniform {
            nbins: 4,
            xmin: 0.,
            xmax: 4.,
        }
    }

    #[test]
    fn simulation() {
        let info = WeightInfo::new(3., 6.);
        let producer =
            WeightedHistProducer::simulation(sample(), info, "weight", 10., "");
        let drawn = producer.draw("n_e", "n_e >= 2", &binning()).unwrap();
        assert_eq!(drawn.count.events, 3);
        assert_eq!(drawn.count.weighted, 5. * 10. * 3. / 6.);
        assert_eq!(drawn.hist.contents(), &[0., 0., 5., 20.]);
        assert_eq!(drawn.hist.sumw2(), &[0., 0., 125., 400.]);

        let producer = WeightedHistProducer::simulation(
            sample(),
            info,
            "weight(\"double\")",
            10.,
            "n_e < 3",
        );
        let drawn = producer.draw("n_e", "", &binning()).unwrap();
        assert_eq!(drawn.count.events, 3);
        assert_eq!(drawn.hist.contents(), &[0., 10., 10., 0.]);

        let none = producer.draw("n_e", "n_e > 5", &binning()).unwrap();
        assert_eq!(none.count, EventCount::default());
        assert_eq!(none.hist.integral(), 0.);
    }

    #[test]
    fn data() {
        let producer = WeightedHistProducer::data(sample(), "");
        assert!(producer.is_data());
        assert_eq!(producer.weight_info(), WeightInfo::new(1., 1.));
        let drawn = producer.draw("n_e", "", &binning()).unwrap();
        assert_eq!(drawn.count.events, 4);
        assert_eq!(drawn.count.weighted, 4.);
        assert_eq!(drawn.hist.contents(), &[0., 1., 2., 1.]);
    }

    #[test]
    fn errors() {
        let info = WeightInfo::new(1., 1.);
        let producer =
            WeightedHistProducer::simulation(sample(), info, "weight", 1., "");
        assert!(matches!(
            producer.draw("n_electrons", "", &binning()),
            Err(DrawError::Misconfigured(Misconfiguration::Expression(_)))
        ));
        let bad_bins = Binning::Variable { edges: vec![1.] };
        assert!(matches!(
            producer.draw("n_e", "", &bad_bins),
            Err(DrawError::Misconfigured(Misconfiguration::Binning(_)))
        ));

        // events lacking the named weight the sample claims to have
        let events = vec![event(1, 1.)]
            .into_iter()
            .map(|mut ev| {
                ev.weights = Weights::from(vec![n64(1.)]);
                ev
            })
            .collect();
        let sample = EventSample::from_events(events, vec!["double".to_owned()]);
        let producer = WeightedHistProducer::simulation(
            sample,
            info,
            "weight(\"double\")",
            1.,
            "",
        );
        assert!(matches!(
            producer.draw("n_e", "", &binning()),
            Err(DrawError::Evaluation { .. })
        ));
    }
}
