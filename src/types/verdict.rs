//! Anomaly verdicts, alert payloads and cached inference results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::telemetry::{FeatureVector, Row};

/// Overall machine condition derived from a forecast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Normal,
    Critical,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ============================================================================
// Anomaly Verdict
// ============================================================================

/// Per-feature violation percentages and the resulting machine status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub status: MachineStatus,
    pub message: String,
    /// Percentage of forecast points outside limits, rounded to 2 decimals.
    pub anomaly_scores: BTreeMap<String, f64>,
    /// Critical channels in feature order.
    pub critical_features: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnomalyVerdict {
    pub fn is_critical(&self) -> bool {
        self.status == MachineStatus::Critical
    }
}

/// Structured alert handed to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub status: MachineStatus,
    pub message: String,
    pub anomaly_scores: BTreeMap<String, f64>,
    pub critical_features: Vec<String>,
    pub machine_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    pub fn from_verdict(verdict: &AnomalyVerdict, machine_id: impl Into<String>) -> Self {
        Self {
            status: verdict.status,
            message: verdict.message.clone(),
            anomaly_scores: verdict.anomaly_scores.clone(),
            critical_features: verdict.critical_features.clone(),
            machine_id: machine_id.into(),
            timestamp: verdict.timestamp,
        }
    }
}

// ============================================================================
// Inference Result
// ============================================================================

/// Everything produced by one successful inference cycle.
///
/// Forecast matrices are `prediction_length × NUM_FEATURES`. `raw_forecast`
/// and `processed_forecast` live in scaled space, `physical_forecast` is the
/// processed forecast mapped back to sensor units.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub inference_count: u64,
    pub context: Vec<FeatureVector>,
    pub raw_forecast: Vec<Row>,
    pub processed_forecast: Vec<Row>,
    pub physical_forecast: Vec<Row>,
    pub verdict: AnomalyVerdict,
    pub completed_at: DateTime<Utc>,
}

impl InferenceResult {
    /// Machine id of the first reading in the context window.
    pub fn machine_id(&self) -> Option<&str> {
        self.context.first().map(|fv| fv.machine_id.as_str())
    }

    /// Timestamp of the most recent reading in the context window.
    pub fn last_context_timestamp(&self) -> Option<DateTime<Utc>> {
        self.context.last().map(|fv| fv.timestamp)
    }
}
