//! Training module for maximum entropy models
//!
//! This module contains the components needed to train a model: event
//! indexing, training parameters and the GIS optimizer.

mod gis;
mod indexer;
mod params;
mod trainer;

// Re-export public types
pub use self::gis::{Progress, Termination, TrainingReport};
pub use self::indexer::{DataIndex, EventIndexer};
pub use self::params::{GisParams, Smoothing};
pub use self::trainer::Trainer;
