//! Machine Sentry: scheduled forecasting and anomaly alerting for machine
//! telemetry.
//!
//! ## Architecture
//!
//! - **Pipeline**: telemetry sources, the rolling buffer and the two-loop
//!   scheduler that drives inference
//! - **Processing**: low-pass conditioning, standardization, forecast
//!   post-processing and threshold scoring
//! - **Oracle**: the forecasting model, remote (HTTP) or in-process (ONNX)
//! - **Notify**: alert delivery for critical verdicts
//! - **API**: read-only HTTP surface over the published results

pub mod api;
pub mod config;
pub mod notify;
pub mod oracle;
pub mod pipeline;
pub mod processing;
pub mod types;

// Re-export machine configuration
pub use config::MachineConfig;

// Re-export commonly used types
pub use types::{
    AlertPayload, AnomalyVerdict, FeatureVector, InferenceResult, MachineStatus, Row, FEATURE_NAMES,
    NUM_FEATURES,
};

// Re-export the scheduler and its collaborators
pub use notify::NotificationDispatcher;
pub use oracle::PredictionOracle;
pub use pipeline::{CycleOutcome, SchedulerOrchestrator, TelemetrySource};
