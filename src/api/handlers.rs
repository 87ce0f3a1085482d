//! Read-only handlers over the orchestrator's published state.
//!
//! Nothing here blocks on the pipeline: every handler reads atomically
//! swapped snapshots.

use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::pipeline::{OrchestratorPhase, SchedulerOrchestrator};
use crate::types::{FeatureVector, InferenceResult, MachineStatus, Row};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<SchedulerOrchestrator>,
    pub machine_id: String,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(orchestrator: Arc<SchedulerOrchestrator>, machine_id: impl Into<String>) -> Self {
        Self {
            orchestrator,
            machine_id: machine_id.into(),
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub machine_id: String,
    pub phase: OrchestratorPhase,
    pub uptime_secs: u64,
    pub has_prediction: bool,
    pub version: &'static str,
}

/// Forecast steps stamped from the end of the context window.
#[derive(Debug, Serialize)]
pub struct LastPredictionResponse {
    pub inference_count: u64,
    pub machine_id: String,
    pub status: MachineStatus,
    pub message: String,
    pub anomaly_scores: BTreeMap<String, f64>,
    pub critical_features: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub raw_forecast: Vec<Row>,
    pub scaled_forecast: Vec<Row>,
    pub forecast: Vec<FeatureVector>,
}

#[derive(Debug, Serialize)]
pub struct PreviousForecastResponse {
    pub has_previous_forecast: bool,
    pub inference_count: Option<u64>,
    pub forecast: Vec<FeatureVector>,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub count: usize,
    pub readings: Vec<FeatureVector>,
}

/// Stamp each physical forecast row `(i + 1)` collection intervals after
/// the last context reading.
pub fn forecast_steps(result: &InferenceResult, machine_id: &str, step: Duration) -> Vec<FeatureVector> {
    let origin = result.last_context_timestamp().unwrap_or(result.completed_at);
    let step = ChronoDuration::from_std(step).unwrap_or_else(|_| ChronoDuration::seconds(10));
    let machine_id = result.machine_id().unwrap_or(machine_id);
    result
        .physical_forecast
        .iter()
        .zip(1..)
        .map(|(row, i)| FeatureVector::from_row(origin + step * i, machine_id, *row))
        .collect()
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /api/v1/health`
pub async fn health(State(state): State<ApiState>) -> Response {
    let phase = state.orchestrator.stats().phase();
    if phase == OrchestratorPhase::Stopped {
        return ApiErrorResponse::service_unavailable("Orchestrator is stopped");
    }
    ApiResponse::ok(HealthResponse {
        status: "healthy",
        machine_id: state.machine_id.clone(),
        phase,
        uptime_secs: state.started_at.elapsed().as_secs(),
        has_prediction: state.orchestrator.last_prediction().is_some(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/v1/inference/last-prediction`
pub async fn last_prediction(State(state): State<ApiState>) -> Response {
    let Some(result) = state.orchestrator.last_prediction() else {
        return ApiErrorResponse::not_found("No prediction available yet");
    };
    let verdict = &result.verdict;
    ApiResponse::ok(LastPredictionResponse {
        inference_count: result.inference_count,
        machine_id: result.machine_id().unwrap_or(&state.machine_id).to_string(),
        status: verdict.status,
        message: verdict.message.clone(),
        anomaly_scores: verdict.anomaly_scores.clone(),
        critical_features: verdict.critical_features.clone(),
        timestamp: verdict.timestamp,
        raw_forecast: result.raw_forecast.clone(),
        scaled_forecast: result.processed_forecast.clone(),
        forecast: forecast_steps(&result, &state.machine_id, state.orchestrator.collection_interval()),
    })
}

/// `GET /api/v1/inference/status`
pub async fn inference_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.orchestrator.status())
}

/// `GET /api/v1/inference/previous-forecast`
pub async fn previous_forecast(State(state): State<ApiState>) -> Response {
    let previous = state.orchestrator.previous_forecast();
    ApiResponse::ok(PreviousForecastResponse {
        has_previous_forecast: previous.is_some(),
        inference_count: previous.as_ref().map(|r| r.inference_count),
        forecast: previous
            .as_ref()
            .map(|r| forecast_steps(r, &state.machine_id, state.orchestrator.collection_interval()))
            .unwrap_or_default(),
    })
}

/// `GET /api/v1/sensor/last-lookback`
pub async fn last_lookback(State(state): State<ApiState>) -> Response {
    let readings = state.orchestrator.last_lookback().as_ref().clone();
    ApiResponse::ok(ReadingsResponse {
        count: readings.len(),
        readings,
    })
}

/// `GET /api/v1/sensor/buffer`
pub async fn buffer(State(state): State<ApiState>) -> Response {
    let readings = state.orchestrator.buffer_snapshot().as_ref().clone();
    ApiResponse::ok(ReadingsResponse {
        count: readings.len(),
        readings,
    })
}

/// `GET /api/v1/sensor/latest`
pub async fn latest(State(state): State<ApiState>) -> Response {
    match state.orchestrator.latest_reading() {
        Some(reading) => ApiResponse::ok(reading),
        None => ApiErrorResponse::not_found("Buffer is empty"),
    }
}
