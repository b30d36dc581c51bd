use std::fmt;

/// Baseline log-distribution over outcomes
///
/// The trainer and the model consult the same prior, so a model must be
/// evaluated with the prior it was trained with.
pub trait Prior: fmt::Debug + Send + Sync {
    /// Fill `dist` with the log prior of every outcome for the context
    /// given by `predicates` (predicate IDs) and optional `values`.
    ///
    /// `dist.len()` is the number of outcomes.
    fn log_prior(&self, dist: &mut [f64], predicates: &[u32], values: Option<&[f64]>);
}

/// Every outcome equally likely
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformPrior;

impl Prior for UniformPrior {
    fn log_prior(&self, dist: &mut [f64], _predicates: &[u32], _values: Option<&[f64]>) {
        let log_uniform = (1.0 / dist.len() as f64).ln();
        dist.fill(log_uniform);
    }
}
