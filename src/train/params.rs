use std::fmt;
use std::str::FromStr;
use std::thread;

use crate::error::{Error, Result};

/// Smoothing applied to the parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Smoothing {
    /// Predicates only get parameters for outcomes they were observed with
    #[default]
    None,
    /// Every predicate gets a parameter for every outcome; unseen pairs
    /// receive a small pseudo-observation
    Simple,
    /// Newton-solved updates under a Gaussian prior on the parameters
    Gaussian,
}

impl Smoothing {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Simple => "simple",
            Self::Gaussian => "gaussian",
        }
    }
}

impl fmt::Display for Smoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Smoothing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "simple" => Ok(Self::Simple),
            "gaussian" => Ok(Self::Gaussian),
            _ => Err(Error::invalid_parameter(
                "smoothing must be one of none, simple, gaussian",
            )),
        }
    }
}

/// GIS training parameters.
#[derive(Debug, Clone)]
pub struct GisParams {
    cutoff: u32,
    max_iterations: usize,
    smoothing: Smoothing,
    smoothing_observation: f64,
    gaussian_sigma: f64,
    threads: usize,
    sort: bool,
    ll_threshold: f64,
}

impl Default for GisParams {
    fn default() -> Self {
        Self {
            cutoff: 0,
            max_iterations: 100,
            smoothing: Smoothing::None,
            smoothing_observation: 0.1,
            gaussian_sigma: 2.0,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            sort: true,
            ll_threshold: 1e-4,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid_parameter(format!("invalid value for {}: {}", name, value)))
}

impl GisParams {
    /// Minimum number of occurrences for a predicate to be kept
    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    pub fn set_cutoff(&mut self, cutoff: u32) {
        self.cutoff = cutoff;
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(Error::invalid_parameter(
                "max_iterations must be at least 1",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, smoothing: Smoothing) {
        self.smoothing = smoothing;
    }

    /// Pseudo-count for unseen (predicate, outcome) pairs under simple smoothing
    pub fn smoothing_observation(&self) -> f64 {
        self.smoothing_observation
    }

    pub fn set_smoothing_observation(&mut self, smoothing_observation: f64) -> Result<()> {
        if !(smoothing_observation > 0.0) || !smoothing_observation.is_finite() {
            return Err(Error::invalid_parameter(
                "smoothing_observation must be positive",
            ));
        }
        self.smoothing_observation = smoothing_observation;
        Ok(())
    }

    /// Width of the Gaussian prior under Gaussian smoothing
    pub fn gaussian_sigma(&self) -> f64 {
        self.gaussian_sigma
    }

    pub fn set_gaussian_sigma(&mut self, gaussian_sigma: f64) -> Result<()> {
        if !(gaussian_sigma > 0.0) || !gaussian_sigma.is_finite() {
            return Err(Error::invalid_parameter("gaussian_sigma must be positive"));
        }
        self.gaussian_sigma = gaussian_sigma;
        Ok(())
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn set_threads(&mut self, threads: usize) -> Result<()> {
        if threads < 1 {
            return Err(Error::invalid_parameter("threads must be at least 1"));
        }
        self.threads = threads;
        Ok(())
    }

    /// Whether equal events are merged before training
    pub fn sort(&self) -> bool {
        self.sort
    }

    pub fn set_sort(&mut self, sort: bool) {
        self.sort = sort;
    }

    /// Minimum log-likelihood gain to keep iterating
    pub fn ll_threshold(&self) -> f64 {
        self.ll_threshold
    }

    pub fn set_ll_threshold(&mut self, ll_threshold: f64) -> Result<()> {
        if !(ll_threshold >= 0.0) {
            return Err(Error::invalid_parameter(
                "ll_threshold must be non-negative",
            ));
        }
        self.ll_threshold = ll_threshold;
        Ok(())
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "cutoff" => self.set_cutoff(parse(name, value)?),
            "max_iterations" => self.set_max_iterations(parse(name, value)?)?,
            "smoothing" => self.set_smoothing(value.parse()?),
            "smoothing_observation" => self.set_smoothing_observation(parse(name, value)?)?,
            "gaussian_sigma" => self.set_gaussian_sigma(parse(name, value)?)?,
            "threads" => self.set_threads(parse(name, value)?)?,
            "sort" => self.set_sort(parse(name, value)?),
            "ll_threshold" => self.set_ll_threshold(parse(name, value)?)?,
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    /// Get a parameter by name
    pub fn get(&self, name: &str) -> Result<String> {
        let value = match name {
            "cutoff" => self.cutoff.to_string(),
            "max_iterations" => self.max_iterations.to_string(),
            "smoothing" => self.smoothing.to_string(),
            "smoothing_observation" => self.smoothing_observation.to_string(),
            "gaussian_sigma" => self.gaussian_sigma.to_string(),
            "threads" => self.threads.to_string(),
            "sort" => self.sort.to_string(),
            "ll_threshold" => self.ll_threshold.to_string(),
            _ => return Err(Error::UnknownParameter(name.to_string())),
        };
        Ok(value)
    }
}
