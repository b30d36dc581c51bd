use crate::error::{Error, Result};

/// Weights of one predicate
///
/// A sparse row over outcomes: the predicate has a parameter only for the
/// outcomes listed in `outcomes`, which is sorted ascending and parallel to
/// `parameters`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    /// Sorted outcome IDs the predicate is active with
    outcomes: Vec<u32>,
    /// Parameter for each entry of `outcomes`
    parameters: Vec<f64>,
}

impl Context {
    /// Create a context from parallel outcome and parameter arrays
    ///
    /// Outcome IDs must be strictly increasing.
    pub fn new(outcomes: Vec<u32>, parameters: Vec<f64>) -> Result<Self> {
        if outcomes.len() != parameters.len() {
            return Err(Error::invalid_model(format!(
                "context has {} outcomes but {} parameters",
                outcomes.len(),
                parameters.len()
            )));
        }
        if outcomes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid_model(
                "context outcomes must be strictly increasing",
            ));
        }
        Ok(Self {
            outcomes,
            parameters,
        })
    }

    /// Create a context with every parameter set to zero
    pub(crate) fn zeros(outcomes: Vec<u32>) -> Self {
        let parameters = vec![0.0; outcomes.len()];
        Self {
            outcomes,
            parameters,
        }
    }

    /// Outcome IDs with a parameter
    pub fn outcomes(&self) -> &[u32] {
        &self.outcomes
    }

    /// Parameters, parallel to `outcomes()`
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [f64] {
        &mut self.parameters
    }

    /// Number of active outcomes
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if the predicate has no active outcome
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Index of `outcome` in this row
    pub fn position(&self, outcome: u32) -> Option<usize> {
        self.outcomes.binary_search(&outcome).ok()
    }

    /// Parameter for `outcome`, `None` if the predicate is inactive for it
    pub fn get(&self, outcome: u32) -> Option<f64> {
        self.position(outcome).map(|i| self.parameters[i])
    }

    /// Iterate over `(outcome, parameter)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.outcomes
            .iter()
            .copied()
            .zip(self.parameters.iter().copied())
    }
}

/// Everything needed to turn a context into a distribution.
///
/// Shared by the trainer and by [`Model`](crate::Model) so training-time
/// predictions and `eval` agree exactly.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EvalParams<'a> {
    pub contexts: &'a [Context],
    pub correction_constant: f64,
    pub correction_param: f64,
}

impl EvalParams<'_> {
    /// Score `predicates` and normalize.
    ///
    /// On entry `dist` holds the log prior of every outcome; on return it
    /// holds the probability of every outcome.
    pub fn eval(&self, predicates: &[u32], values: Option<&[f64]>, dist: &mut [f64]) {
        for (i, &pid) in predicates.iter().enumerate() {
            let value = values.map_or(1.0, |v| v[i]);
            for (oid, param) in self.contexts[pid as usize].iter() {
                dist[oid as usize] += param * value;
            }
        }

        let inverse = 1.0 / self.correction_constant;
        if self.correction_param != 0.0 {
            let mut num_feats = vec![0u32; dist.len()];
            for &pid in predicates {
                for &oid in self.contexts[pid as usize].outcomes() {
                    num_feats[oid as usize] += 1;
                }
            }
            for (score, n) in dist.iter_mut().zip(num_feats) {
                *score = *score * inverse
                    + (1.0 - f64::from(n) / self.correction_constant) * self.correction_param;
            }
        } else {
            for score in dist.iter_mut() {
                *score *= inverse;
            }
        }

        exp_normalize(dist);
    }
}

/// Exponentiate scores and normalize them to sum to one.
///
/// Scores are shifted by their maximum first to keep `exp` finite.
pub(crate) fn exp_normalize(dist: &mut [f64]) {
    let max = dist.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for score in dist.iter_mut() {
        *score = (*score - max).exp();
        sum += *score;
    }
    for p in dist.iter_mut() {
        *p /= sum;
    }
}

/// Index of the largest probability, the first one on ties
pub(crate) fn argmax(dist: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in dist.iter().enumerate() {
        if best.map_or(true, |(_, bp)| p > bp) {
            best = Some((i, p));
        }
    }
    best.map(|(i, _)| i)
}
