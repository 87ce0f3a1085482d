//! Scheduled inference pipeline
//!
//! ```text
//! TelemetrySource ──▶ RollingBuffer ──▶ InferenceEngine ──▶ ResultCache ──▶ API
//!   (Influx / CSV)     (ArcSwap)        (condition, oracle,   (current +
//!                                        post-process, score)  previous)
//!                                              │
//!                                              └──▶ NotificationDispatcher
//! ```
//!
//! The refresh and inference loops run independently; the only state they
//! share is the buffer and the published results.

mod buffer;
pub mod influx;
mod orchestrator;
pub mod source;
mod state;

pub use buffer::{BufferError, RollingBuffer};
pub use influx::InfluxSource;
pub use orchestrator::{CycleOutcome, EngineOutput, InferenceEngine, PipelineError, SchedulerOrchestrator};
pub use source::{CsvReplaySource, SourceError, TelemetrySource};
pub use state::{InferenceStatus, OrchestratorPhase, ResultCache, SchedulerStats};

use std::sync::Arc;

use crate::config::{SourceKind, TelemetryConfig};

/// Build the configured telemetry source.
pub fn build_source(config: &TelemetryConfig, machine_id: &str) -> Result<Arc<dyn TelemetrySource>, SourceError> {
    match config.source {
        SourceKind::Influx => Ok(Arc::new(InfluxSource::new(&config.influx, machine_id)?)),
        SourceKind::Csv => Ok(Arc::new(CsvReplaySource::from_config(&config.csv, machine_id)?)),
    }
}
