use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use maxent::train::{Progress, Termination};
use maxent::{Error, Event, EventReader, Model, Prior, Result, Trainer};

fn football() -> Vec<Event> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/football.txt");
    let file = File::open(path).unwrap();
    EventReader::new(BufReader::new(file))
        .collect::<Result<_>>()
        .unwrap()
}

fn trainer(threads: usize) -> Trainer {
    let mut trainer = Trainer::new().with_threads(threads).unwrap();
    trainer.extend(football()).unwrap();
    trainer
}

/// Every (predicate, outcome, weight) triple of a model
fn weights(model: &Model) -> Vec<(String, String, f64)> {
    let mut weights = Vec::new();
    for pid in 0..model.num_predicates() as u32 {
        let name = model.predicate(pid).unwrap();
        for (oid, weight) in model.context(pid).unwrap().iter() {
            let label = model.outcome(oid).unwrap();
            weights.push((name.to_string(), label.to_string(), weight));
        }
    }
    weights
}

#[test]
fn test_football_scenario() {
    let trainer = trainer(2);
    assert_eq!(trainer.num_events(), 96);
    let model = trainer.train().unwrap();

    assert_eq!(model.num_outcomes(), 3);
    assert_eq!(model.num_predicates(), 10);

    let dist = model.eval(&["home", "pdiff=0.6875"], None).unwrap();
    assert_eq!(dist.len(), 3);
    let total: f64 = dist.values().sum();
    assert!((total - 1.0).abs() < 1e-6);

    let probs = model.eval_probs(&["home", "pdiff=0.6875"], None).unwrap();
    assert_eq!(model.best_outcome(&probs), Some("win"));

    // Same data and configuration, same answer
    let again = trainer.train().unwrap();
    let probs_again = again.eval_probs(&["home", "pdiff=0.6875"], None).unwrap();
    assert_eq!(again.best_outcome(&probs_again), Some("win"));
    for (p, q) in probs.iter().zip(&probs_again) {
        assert!((p - q).abs() < 1e-9);
    }
}

#[test]
fn test_probability_normalization() {
    let model = trainer(4).train().unwrap();
    let contexts: Vec<Vec<&str>> = vec![
        vec![],
        vec!["home"],
        vec!["away", "pdiff=0.5625"],
        vec!["home", "pdiff=1.0000"],
        vec!["home", "away", "pdiff=0.8125", "pdiff=0.9375"],
        vec!["never-seen", "pdiff=0.7500"],
    ];
    for context in &contexts {
        let probs = model.eval_probs(context.as_slice(), None).unwrap();
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-6, "{:?} sums to {}", context, total);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}

#[test]
fn test_log_likelihood_non_decreasing() {
    let (_, report) = trainer(3).train_with_report().unwrap();
    assert!(report.iterations >= 2);
    assert!(report.iterations <= 100);
    assert_eq!(report.log_likelihoods.len(), report.iterations);
    for w in report.log_likelihoods.windows(2) {
        assert!(w[1] >= w[0], "log-likelihood dropped from {} to {}", w[0], w[1]);
    }
    assert!(report.log_likelihoods.iter().all(|ll| *ll < 0.0));
    assert!(report.accuracy > 0.5 && report.accuracy <= 1.0);
}

#[test]
fn test_thread_count_determinism() {
    let single = trainer(1).train().unwrap();
    let parallel = trainer(4).train().unwrap();

    let single = weights(&single);
    let parallel = weights(&parallel);
    assert_eq!(single.len(), parallel.len());
    for (a, b) in single.iter().zip(&parallel) {
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert!((a.2 - b.2).abs() < 1e-6, "{} {}: {} vs {}", a.0, a.1, a.2, b.2);
    }
}

#[test]
fn test_progress_and_cancellation() {
    let mut seen: Vec<Progress> = Vec::new();
    let (model, report) = trainer(2)
        .train_with_progress(|progress| {
            seen.push(*progress);
            progress.iteration == 3
        })
        .unwrap();

    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.iterations, 3);
    assert_eq!(
        seen.iter().map(|p| p.iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(seen[2].log_likelihood, report.log_likelihoods[2]);

    // The model of a cancelled run is complete
    let probs = model.eval_probs(&["away"], None).unwrap();
    assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
}

/// Uniform for the first `switch_after` calls, then nearly all mass on the
/// last outcome.
#[derive(Debug)]
struct DriftingPrior {
    calls: AtomicUsize,
    switch_after: usize,
}

impl Prior for DriftingPrior {
    fn log_prior(&self, dist: &mut [f64], _predicates: &[u32], _values: Option<&[f64]>) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed);
        dist.fill(0.0);
        if calls >= self.switch_after {
            if let Some(last) = dist.last_mut() {
                *last = 50.0;
            }
        }
    }
}

#[test]
fn test_divergence_is_an_error() {
    let trainer = trainer(2);
    let index = trainer.index().unwrap();
    let prior = Arc::new(DriftingPrior {
        calls: AtomicUsize::new(0),
        switch_after: index.num_unique_events(),
    });
    let trainer = trainer.with_prior(prior);

    let err = trainer.train_index(&index).unwrap_err();
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
        other => panic!("expected divergence, got {}", other),
    }
}

#[test]
fn test_real_valued_training() {
    let mut trainer = Trainer::new().with_threads(2).unwrap();
    for _ in 0..4 {
        trainer
            .append_with_values("win", &["home", "margin"], &[1.0, 0.9])
            .unwrap();
        trainer
            .append_with_values("lose", &["away", "margin"], &[1.0, 0.2])
            .unwrap();
        trainer
            .append_with_values("win", &["away", "margin"], &[1.0, 0.8])
            .unwrap();
        trainer
            .append_with_values("lose", &["home", "margin"], &[1.0, 0.1])
            .unwrap();
    }
    let index = trainer.index().unwrap();
    assert_eq!(index.correction_constant(), 2.0);
    assert_eq!(index.num_unique_events(), 4);

    let model = trainer.train().unwrap();
    let strong = model.eval(&["home", "margin"], Some(&[1.0, 0.9])).unwrap();
    let weak = model.eval(&["home", "margin"], Some(&[1.0, 0.1])).unwrap();
    assert!(strong["win"] > weak["win"]);
    assert!((strong.values().sum::<f64>() - 1.0).abs() < 1e-6);
}
