//! Prediction conditioning and anomaly engine
//!
//! Pure numerical stages of one inference cycle:
//! - [`filter`]: zero-phase Butterworth low-pass per feature column
//! - [`scaler`]: fitted standardization (or explicit unscaled mode)
//! - [`conditioner`]: filter + scale, the model-input transform
//! - [`postprocess`]: outlier suppression and partial rescale-to-context
//! - [`anomaly`]: per-feature limit scoring into a verdict
//!
//! None of these hold mutable state; identical inputs give identical outputs.

pub mod anomaly;
pub mod conditioner;
pub mod filter;
pub mod postprocess;
pub mod scaler;

pub use anomaly::{AnomalyScorer, FeatureLimits};
pub use conditioner::SignalConditioner;
pub use filter::LowPassFilter;
pub use postprocess::{PostProcessor, RescaleMethod};
pub use scaler::{ScalingMode, StandardScaler};

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid filter design: {0}")]
    InvalidFilter(String),

    #[error("Standardization artifact error: {0}")]
    Artifact(String),
}
