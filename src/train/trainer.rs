use std::sync::Arc;

use super::gis::{Gis, Progress, TrainingReport};
use super::indexer::{DataIndex, EventIndexer};
use super::params::{GisParams, Smoothing};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::Model;
use crate::prior::{Prior, UniformPrior};

/// Maximum entropy trainer
///
/// Collects training events, then indexes them and estimates a [`Model`]
/// with Generalized Iterative Scaling.
///
/// ```
/// use maxent::Trainer;
///
/// let mut trainer = Trainer::new().with_cutoff(0);
/// trainer.append("win", &["home", "pdiff=0.9375"]).unwrap();
/// trainer.append("lose", &["away", "pdiff=0.8125"]).unwrap();
/// trainer.append("tie", &["home", "pdiff=0.6875"]).unwrap();
/// let model = trainer.train().unwrap();
///
/// let probs = model.eval_probs(&["home"], None).unwrap();
/// assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct Trainer {
    /// Training events
    events: Vec<Event>,
    /// Training parameters
    params: GisParams,
    /// Prior shared with the trained model
    prior: Arc<dyn Prior>,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer {
    /// Create a new trainer
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            params: GisParams::default(),
            prior: Arc::new(UniformPrior),
        }
    }

    /// Get training parameters
    pub fn params(&self) -> &GisParams {
        &self.params
    }

    /// Get training parameters for mutation
    pub fn params_mut(&mut self) -> &mut GisParams {
        &mut self.params
    }

    /// Set a training parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.params.set(name, value)
    }

    /// Get a training parameter by name
    pub fn get(&self, name: &str) -> Result<String> {
        self.params.get(name)
    }

    pub fn with_cutoff(mut self, cutoff: u32) -> Self {
        self.params.set_cutoff(cutoff);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Result<Self> {
        self.params.set_max_iterations(max_iterations)?;
        Ok(self)
    }

    pub fn with_smoothing(mut self, smoothing: Smoothing) -> Self {
        self.params.set_smoothing(smoothing);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        self.params.set_threads(threads)?;
        Ok(self)
    }

    /// Train and evaluate against `prior` instead of the uniform prior
    pub fn with_prior(mut self, prior: Arc<dyn Prior>) -> Self {
        self.prior = prior;
        self
    }

    /// Append an event with binary predicates
    pub fn append<P: AsRef<str>>(&mut self, outcome: &str, predicates: &[P]) -> Result<()> {
        self.append_event(Event::new(
            outcome,
            predicates.iter().map(|p| p.as_ref().to_string()),
        ))
    }

    /// Append an event with one value per predicate
    pub fn append_with_values<P: AsRef<str>>(
        &mut self,
        outcome: &str,
        predicates: &[P],
        values: &[f64],
    ) -> Result<()> {
        let event = Event::with_values(
            outcome,
            predicates.iter().map(|p| p.as_ref().to_string()),
            values.to_vec(),
        )?;
        self.events.push(event);
        Ok(())
    }

    /// Append an event
    pub fn append_event(&mut self, event: Event) -> Result<()> {
        event.validate()?;
        self.events.push(event);
        Ok(())
    }

    /// Append every event of `events`, stopping at the first invalid one
    pub fn extend<I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = Event>,
    {
        for event in events {
            self.append_event(event)?;
        }
        Ok(())
    }

    /// Number of appended events
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Appended events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Clear all training data
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Index the appended events with the configured cutoff
    pub fn index(&self) -> Result<DataIndex> {
        EventIndexer::new(self.params.cutoff())
            .sort(self.params.sort())
            .index(&self.events)
    }

    /// Train a model
    pub fn train(&self) -> Result<Model> {
        self.train_with_report().map(|(model, _)| model)
    }

    /// Train a model and report how training went
    pub fn train_with_report(&self) -> Result<(Model, TrainingReport)> {
        self.train_with_progress(|_| false)
    }

    /// Train a model, calling `on_progress` after every iteration
    ///
    /// Returning `true` from `on_progress` stops training; the model then
    /// holds the parameters of the last completed iteration.
    pub fn train_with_progress<F>(&self, on_progress: F) -> Result<(Model, TrainingReport)>
    where
        F: FnMut(&Progress) -> bool,
    {
        if self.events.is_empty() {
            return Err(Error::EmptyTrainingData);
        }
        let index = self.index()?;
        Gis::new(&index, &self.params, self.prior.clone())?.run(on_progress)
    }

    /// Train a model from already indexed data
    pub fn train_index(&self, index: &DataIndex) -> Result<(Model, TrainingReport)> {
        Gis::new(index, &self.params, self.prior.clone())?.run(|_| false)
    }
}
