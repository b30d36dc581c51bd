//! Maximum entropy classification trained with Generalized Iterative Scaling
//!
//! A model maps a context, a list of active predicates with optional real
//! values, to a probability distribution over outcomes.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use maxent::{Smoothing, Trainer};
//!
//! let mut trainer = Trainer::new().with_smoothing(Smoothing::Gaussian);
//! trainer.append("win", &["home", "pdiff=0.9375"])?;
//! trainer.append("lose", &["away", "pdiff=0.8125"])?;
//! trainer.append("tie", &["home", "pdiff=0.6875"])?;
//!
//! trainer.set("cutoff", "1")?;
//! let model = trainer.train()?;
//! model.save("football.maxent")?;
//! # Ok::<(), maxent::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! use maxent::Model;
//!
//! let model = Model::load("football.maxent")?;
//! let probs = model.eval_probs(&["home", "pdiff=0.6875"], None)?;
//! println!("{}", model.all_outcomes(&probs));
//! println!("best: {:?}", model.best_outcome(&probs));
//! # Ok::<(), maxent::Error>(())
//! ```

mod context;
mod dataset;
mod dictionary;
mod error;
mod event;
mod model;
mod model_writer;
mod prior;

/// Training module containing all components for training maxent models
pub mod train;

// Re-export main types
pub use self::context::Context;
pub use self::dataset::IndexedEvent;
pub use self::dictionary::Dictionary;
pub use self::error::{Error, Result};
pub use self::event::{Event, EventReader};
pub use self::model::{DumpSections, Model};
pub use self::prior::{Prior, UniformPrior};

// Re-export training types for convenience
pub use self::train::{Smoothing, Trainer, TrainingReport};
