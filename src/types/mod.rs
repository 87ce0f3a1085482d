//! Shared data structures for the machine-condition pipeline
//!
//! - [`telemetry`]: FeatureVector (one timestamped sensor reading) and the
//!   fixed feature ordering every matrix in the crate follows
//! - [`verdict`]: AnomalyVerdict, AlertPayload and the cached InferenceResult

pub mod telemetry;
pub mod verdict;

pub use telemetry::*;
pub use verdict::*;
