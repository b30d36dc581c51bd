use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use super::indexer::DataIndex;
use super::params::{GisParams, Smoothing};
use crate::context::{argmax, Context, EvalParams};
use crate::dataset::IndexedEvent;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::prior::Prior;

/// Maximum number of Newton steps of a Gaussian update
const NEWTON_MAX_ITERATIONS: usize = 50;
/// Newton steps stop once they move less than this
const NEWTON_TOLERANCE: f64 = 1e-6;

/// State of training after a completed iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// 1-based iteration number
    pub iteration: usize,
    /// Log-likelihood of the training data under the parameters the
    /// iteration started with
    pub log_likelihood: f64,
    /// Fraction of training events (counting multiplicity) whose most
    /// probable outcome was the true one
    pub accuracy: f64,
}

/// Why training stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The log-likelihood gain fell below the threshold
    Converged,
    /// `max_iterations` iterations ran without converging
    MaxIterations,
    /// The progress callback asked to stop
    Cancelled,
}

/// Summary of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Number of completed iterations
    pub iterations: usize,
    /// Log-likelihood of every iteration
    pub log_likelihoods: Vec<f64>,
    /// Training accuracy of the last iteration
    pub accuracy: f64,
    pub termination: Termination,
}

/// Per-worker model expectations and statistics
#[derive(Debug)]
struct Accumulator {
    /// Expectations, shaped like the parameter contexts
    expects: Vec<Vec<f64>>,
    log_likelihood: f64,
    num_correct: u64,
    num_events: u64,
    /// Scratch distribution over outcomes
    dist: Vec<f64>,
}

impl Accumulator {
    fn new(contexts: &[Context], num_outcomes: usize) -> Self {
        Self {
            expects: contexts.iter().map(|ctx| vec![0.0; ctx.len()]).collect(),
            log_likelihood: 0.0,
            num_correct: 0,
            num_events: 0,
            dist: vec![0.0; num_outcomes],
        }
    }

    /// Add the expectations of `events` under the current parameters
    fn accumulate(&mut self, events: &[IndexedEvent], kernel: &EvalParams<'_>, prior: &dyn Prior) {
        for event in events {
            let values = event.values.as_deref();
            prior.log_prior(&mut self.dist, &event.predicates, values);
            kernel.eval(&event.predicates, values, &mut self.dist);

            let weight = f64::from(event.multiplicity);
            for (i, &pid) in event.predicates.iter().enumerate() {
                let value = event.value(i) * weight;
                let outcomes = kernel.contexts[pid as usize].outcomes();
                for (expect, &oid) in self.expects[pid as usize].iter_mut().zip(outcomes) {
                    *expect += self.dist[oid as usize] * value;
                }
            }

            self.log_likelihood += self.dist[event.outcome as usize].ln() * weight;
            if argmax(&self.dist) == Some(event.outcome as usize) {
                self.num_correct += u64::from(event.multiplicity);
            }
            self.num_events += u64::from(event.multiplicity);
        }
    }

    /// Move everything `other` accumulated into `self`, leaving `other` zeroed
    fn absorb(&mut self, other: &mut Accumulator) {
        for (mine, theirs) in self.expects.iter_mut().zip(other.expects.iter_mut()) {
            for (m, t) in mine.iter_mut().zip(theirs.iter_mut()) {
                *m += *t;
                *t = 0.0;
            }
        }
        self.log_likelihood += other.log_likelihood;
        self.num_correct += other.num_correct;
        self.num_events += other.num_events;
        other.reset_totals();
    }

    fn reset_totals(&mut self) {
        self.log_likelihood = 0.0;
        self.num_correct = 0;
        self.num_events = 0;
    }
}

/// GIS update of one parameter, `None` when the model expectation is zero
fn gis_update(observed: f64, model: f64, correction_constant: f64) -> Option<f64> {
    if model > 0.0 {
        Some((observed.ln() - model.ln()) / correction_constant)
    } else {
        None
    }
}

/// Newton solve of `model * exp(C * x) + (param + x) / sigma - observed = 0`
fn gaussian_update(
    param: f64,
    model: f64,
    observed: f64,
    correction_constant: f64,
    sigma: f64,
) -> f64 {
    let mut x0 = 0.0;
    for _ in 0..NEWTON_MAX_ITERATIONS {
        let tmp = model * (correction_constant * x0).exp();
        let f = tmp + (param + x0) / sigma - observed;
        let fp = tmp * correction_constant + 1.0 / sigma;
        if fp == 0.0 {
            break;
        }
        let x = x0 - f / fp;
        if (x - x0).abs() < NEWTON_TOLERANCE {
            x0 = x;
            break;
        }
        x0 = x;
    }
    x0
}

/// Generalized Iterative Scaling over an indexed corpus
pub(crate) struct Gis<'a> {
    index: &'a DataIndex,
    params: &'a GisParams,
    prior: Arc<dyn Prior>,
    /// Parameters being estimated, one context per predicate
    contexts: Vec<Context>,
    /// Observed expectations, shaped like `contexts`
    observed: Vec<Vec<f64>>,
    /// One accumulator per event slice
    workers: Vec<Accumulator>,
    pool: ThreadPool,
}

impl<'a> Gis<'a> {
    /// Compute observed expectations and set every parameter to zero
    pub fn new(index: &'a DataIndex, params: &'a GisParams, prior: Arc<dyn Prior>) -> Result<Self> {
        let events = index.events();
        if events.is_empty() {
            return Err(Error::EmptyTrainingData);
        }
        let num_outcomes = index.outcomes().len();
        let num_preds = index.predicates().len();

        let mut counts = vec![vec![0.0; num_outcomes]; num_preds];
        for event in events {
            let weight = f64::from(event.multiplicity);
            for (i, &pid) in event.predicates.iter().enumerate() {
                counts[pid as usize][event.outcome as usize] += event.value(i) * weight;
            }
        }

        let cutoff = u64::from(params.cutoff());
        let simple = params.smoothing() == Smoothing::Simple;
        let mut contexts = Vec::with_capacity(num_preds);
        let mut observed = Vec::with_capacity(num_preds);
        for (pid, row) in counts.iter().enumerate() {
            let pattern: Vec<u32> = if simple {
                (0..num_outcomes as u32).collect()
            } else if index.predicate_counts()[pid] >= cutoff {
                (0..num_outcomes as u32)
                    .filter(|&oid| row[oid as usize] > 0.0)
                    .collect()
            } else {
                Vec::new()
            };
            observed.push(
                pattern
                    .iter()
                    .map(|&oid| match row[oid as usize] {
                        count if count > 0.0 => count,
                        _ => params.smoothing_observation(),
                    })
                    .collect(),
            );
            contexts.push(Context::zeros(pattern));
        }

        let num_workers = params.threads().min(events.len()).max(1);
        let pool = ThreadPoolBuilder::new().num_threads(num_workers).build()?;
        let workers = (0..num_workers)
            .map(|_| Accumulator::new(&contexts, num_outcomes))
            .collect();

        info!(
            events = index.num_events(),
            unique_events = events.len(),
            predicates = num_preds,
            outcomes = num_outcomes,
            parameters = contexts.iter().map(Context::len).sum::<usize>(),
            correction_constant = index.correction_constant(),
            smoothing = %params.smoothing(),
            threads = num_workers,
            "training GIS model"
        );

        Ok(Self {
            index,
            params,
            prior,
            contexts,
            observed,
            workers,
            pool,
        })
    }

    /// Iterate until convergence, divergence, cancellation or
    /// `max_iterations`.
    ///
    /// `on_progress` sees every completed iteration and stops training by
    /// returning `true`.
    pub fn run<F>(mut self, mut on_progress: F) -> Result<(Model, TrainingReport)>
    where
        F: FnMut(&Progress) -> bool,
    {
        let max_iterations = self.params.max_iterations();
        let ll_threshold = self.params.ll_threshold();
        let mut log_likelihoods: Vec<f64> = Vec::new();
        let mut accuracy = 0.0;
        let mut termination = Termination::MaxIterations;

        for iteration in 1..=max_iterations {
            let (log_likelihood, acc) = self.next_iteration();
            accuracy = acc;
            info!(iteration, log_likelihood, accuracy, "GIS iteration");

            let previous = log_likelihoods.last().copied();
            log_likelihoods.push(log_likelihood);
            if let Some(previous) = previous {
                if log_likelihood < previous {
                    warn!(iteration, previous, log_likelihood, "model diverging");
                    return Err(Error::Diverged {
                        iteration,
                        previous,
                        current: log_likelihood,
                    });
                }
            }

            let progress = Progress {
                iteration,
                log_likelihood,
                accuracy,
            };
            let cancelled = on_progress(&progress);

            if previous.map_or(false, |previous| log_likelihood - previous < ll_threshold) {
                termination = Termination::Converged;
                break;
            }
            if cancelled {
                termination = Termination::Cancelled;
                break;
            }
        }

        info!(
            iterations = log_likelihoods.len(),
            termination = ?termination,
            accuracy,
            "finished training"
        );

        let model = Model::new(
            self.index.predicates().clone(),
            self.index.outcomes().clone(),
            self.contexts,
            1.0,
            0.0,
        )?
        .with_prior(self.prior);
        let report = TrainingReport {
            iterations: log_likelihoods.len(),
            log_likelihoods,
            accuracy,
            termination,
        };
        Ok((model, report))
    }

    /// One GIS iteration: expectations, reduce, update.
    ///
    /// Returns the log-likelihood and accuracy under the parameters the
    /// iteration started with.
    fn next_iteration(&mut self) -> (f64, f64) {
        self.accumulate();
        let (first, rest) = match self.workers.split_first_mut() {
            Some(split) => split,
            None => return (0.0, 0.0),
        };
        for worker in rest {
            first.absorb(worker);
        }
        let log_likelihood = first.log_likelihood;
        let accuracy = first.num_correct as f64 / first.num_events as f64;
        first.reset_totals();

        self.update();
        (log_likelihood, accuracy)
    }

    /// Parallel phase: every worker scores its own contiguous slice of
    /// events into its own accumulator.
    fn accumulate(&mut self) {
        let events = self.index.events();
        let chunk_size = events.len().div_ceil(self.workers.len());
        let kernel = EvalParams {
            contexts: &self.contexts,
            correction_constant: 1.0,
            correction_param: 0.0,
        };
        let prior: &dyn Prior = self.prior.as_ref();
        let workers = &mut self.workers;
        self.pool.install(|| {
            events
                .par_chunks(chunk_size)
                .zip(workers.par_iter_mut())
                .for_each(|(chunk, worker)| worker.accumulate(chunk, &kernel, prior));
        });
    }

    /// Update every parameter from the reduced expectations held by the
    /// first worker and zero them for the next iteration.
    fn update(&mut self) {
        let correction_constant = self.index.correction_constant();
        let smoothing = self.params.smoothing();
        let sigma = self.params.gaussian_sigma();
        let expects = &mut self.workers[0].expects;

        for (pid, ctx) in self.contexts.iter_mut().enumerate() {
            let observed = &self.observed[pid];
            let model = &mut expects[pid];
            for j in 0..ctx.len() {
                let param = ctx.parameters()[j];
                let delta = match smoothing {
                    Smoothing::Gaussian => Some(gaussian_update(
                        param,
                        model[j],
                        observed[j],
                        correction_constant,
                        sigma,
                    )),
                    Smoothing::None | Smoothing::Simple => {
                        gis_update(observed[j], model[j], correction_constant)
                    }
                };
                match delta {
                    Some(delta) => ctx.parameters_mut()[j] += delta,
                    None => warn!(
                        predicate = ?self.index.predicates().get_name(pid as u32),
                        outcome = ?self.index.outcomes().get_name(ctx.outcomes()[j]),
                        "zero model expectation, parameter left unchanged"
                    ),
                }
                model[j] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::prior::UniformPrior;
    use crate::train::indexer::EventIndexer;

    fn repeat(events: &mut Vec<Event>, n: usize, outcome: &str, predicates: &[&str]) {
        for _ in 0..n {
            events.push(Event::new(outcome, predicates.iter().copied()));
        }
    }

    fn corpus() -> Vec<Event> {
        let mut events = Vec::new();
        repeat(&mut events, 3, "win", &["home", "strong"]);
        repeat(&mut events, 1, "lose", &["home", "strong"]);
        repeat(&mut events, 1, "win", &["home", "weak"]);
        repeat(&mut events, 2, "lose", &["home", "weak"]);
        repeat(&mut events, 2, "win", &["away", "strong"]);
        repeat(&mut events, 1, "lose", &["away", "strong"]);
        repeat(&mut events, 1, "win", &["away", "weak"]);
        repeat(&mut events, 3, "lose", &["away", "weak"]);
        events
    }

    fn params(threads: usize) -> GisParams {
        let mut params = GisParams::default();
        params.set_threads(threads).unwrap();
        params.set_max_iterations(1000).unwrap();
        params
    }

    #[test]
    fn test_gaussian_update_solves_equation() {
        let (param, model, observed, cc, sigma) = (0.3, 2.0, 5.0, 2.0, 1.5);
        let x = gaussian_update(param, model, observed, cc, sigma);
        let f = model * (cc * x).exp() + (param + x) / sigma - observed;
        assert!(f.abs() < 1e-6, "residual {}", f);
        assert!(x > 0.0);

        // Zero model expectation is still well defined
        let x = gaussian_update(0.0, 0.0, 1.0, 1.0, 2.0);
        assert!((x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_gis_update() {
        let delta = gis_update(3.0, 1.5, 2.0).unwrap();
        assert!((delta - 2f64.ln() / 2.0).abs() < 1e-12);
        assert_eq!(gis_update(1.0, 0.0, 1.0), None);
    }

    #[test]
    fn test_observed_expectations() {
        let events = corpus();
        let index = EventIndexer::new(0).index(&events).unwrap();
        let params = params(1);
        let gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();

        let home = index.predicates().get("home").unwrap() as usize;
        assert_eq!(gis.contexts[home].outcomes(), &[0, 1]);
        assert_eq!(gis.observed[home], vec![4.0, 3.0]);
    }

    #[test]
    fn test_simple_smoothing_is_dense() {
        let events = vec![Event::new("a", ["x"]), Event::new("b", ["y"])];
        let index = EventIndexer::new(0).index(&events).unwrap();
        let mut params = params(1);
        params.set_smoothing(Smoothing::Simple);
        let gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();

        assert!(gis.contexts.iter().all(|ctx| ctx.len() == 2));
        assert_eq!(gis.observed[0], vec![1.0, 0.1]);
        assert_eq!(gis.observed[1], vec![0.1, 1.0]);
    }

    #[test]
    fn test_run_converges() {
        let events = corpus();
        let index = EventIndexer::new(0).index(&events).unwrap();
        let params = params(2);
        let gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();
        let mut seen = Vec::new();
        let (model, report) = gis
            .run(|progress| {
                seen.push(progress.iteration);
                false
            })
            .unwrap();

        assert_eq!(report.termination, Termination::Converged);
        assert_eq!(report.iterations, seen.len());
        assert!(report
            .log_likelihoods
            .windows(2)
            .all(|w| w[1] >= w[0]));
        // The majority outcome of each (side, strength) group is right
        let correct = 3 + 2 + 2 + 3;
        assert_eq!(index.num_events(), 14);
        let expected = correct as f64 / index.num_events() as f64;
        assert!((report.accuracy - expected).abs() < 1e-12);

        let dist = model.eval(&["home", "strong"], None).unwrap();
        assert!((dist["win"] - 0.75).abs() < 0.05);
        let dist = model.eval(&["away", "weak"], None).unwrap();
        assert!(dist["lose"] > dist["win"]);
        assert_eq!(model.correction_constant(), 1.0);
        assert_eq!(model.correction_param(), 0.0);
    }

    #[test]
    fn test_zero_model_expectation_leaves_parameter() {
        let events = corpus();
        let index = EventIndexer::new(0).index(&events).unwrap();
        let params = params(1);
        let mut gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();
        let home = index.predicates().get("home").unwrap() as usize;

        gis.accumulate();
        gis.workers[0].reset_totals();
        gis.workers[0].expects[home][0] = 0.0;
        gis.update();

        assert_eq!(gis.contexts[home].parameters()[0], 0.0);
        assert!(gis.contexts[home].parameters()[1] != 0.0);
        assert!(gis.workers[0]
            .expects
            .iter()
            .all(|row| row.iter().all(|x| *x == 0.0)));

        // Training carries on from the partially updated parameters
        let (model, report) = gis.run(|progress| progress.iteration == 3).unwrap();
        assert!(report.iterations <= 3);
        let probs = model.eval_probs(&["home", "strong"], None).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_cancelled() {
        let events = corpus();
        let index = EventIndexer::new(0).index(&events).unwrap();
        let params = params(1);
        let gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();
        let (_, report) = gis.run(|progress| progress.iteration == 2).unwrap();
        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(report.iterations, 2);
    }

    #[test]
    fn test_corrupted_expectations_diverge() {
        let events = vec![Event::new("a", ["x"]), Event::new("b", ["x"])];
        let index = EventIndexer::new(0).index(&events).unwrap();
        let params = params(1);
        let mut gis = Gis::new(&index, &params, Arc::new(UniformPrior)).unwrap();
        gis.observed[0][0] = 1e6;

        let err = gis.run(|_| false).unwrap_err();
        assert!(err.is_divergence());
        match err {
            Error::Diverged {
                iteration,
                previous,
                current,
            } => {
                assert_eq!(iteration, 2);
                assert!(current < previous);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_index() {
        let index = EventIndexer::new(0).index(&[]).unwrap();
        let params = params(1);
        assert!(matches!(
            Gis::new(&index, &params, Arc::new(UniformPrior)),
            Err(Error::EmptyTrainingData)
        ));
    }
}
