//! Telemetry readings and the fixed six-channel feature layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of sensor channels carried by every reading.
pub const NUM_FEATURES: usize = 6;

/// Channel names in matrix column order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = ["current", "tempA", "tempB", "accX", "accY", "accZ"];

/// One timestep across all channels, in [`FEATURE_NAMES`] order.
pub type Row = [f64; NUM_FEATURES];

// ============================================================================
// FeatureVector
// ============================================================================

/// A single timestamped reading from one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    /// Motor current (A)
    pub current: f64,
    /// Temperature probe A (°C)
    #[serde(rename = "tempA")]
    pub temp_a: f64,
    /// Temperature probe B (°C)
    #[serde(rename = "tempB")]
    pub temp_b: f64,
    /// Acceleration X axis
    #[serde(rename = "accX")]
    pub acc_x: f64,
    /// Acceleration Y axis
    #[serde(rename = "accY")]
    pub acc_y: f64,
    /// Acceleration Z axis
    #[serde(rename = "accZ")]
    pub acc_z: f64,
}

impl FeatureVector {
    /// Build a reading from a row laid out in [`FEATURE_NAMES`] order.
    pub fn from_row(timestamp: DateTime<Utc>, machine_id: impl Into<String>, row: Row) -> Self {
        Self {
            timestamp,
            machine_id: machine_id.into(),
            current: row[0],
            temp_a: row[1],
            temp_b: row[2],
            acc_x: row[3],
            acc_y: row[4],
            acc_z: row[5],
        }
    }

    /// Channel values in [`FEATURE_NAMES`] order.
    pub const fn values(&self) -> Row {
        [
            self.current,
            self.temp_a,
            self.temp_b,
            self.acc_x,
            self.acc_y,
            self.acc_z,
        ]
    }

    /// True when every channel is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

/// Stack readings into a `len × NUM_FEATURES` matrix.
pub fn to_matrix(vectors: &[FeatureVector]) -> Vec<Row> {
    vectors.iter().map(FeatureVector::values).collect()
}

/// Extract one column of a matrix.
pub fn column(rows: &[Row], feature: usize) -> Vec<f64> {
    rows.iter().map(|r| r[feature]).collect()
}

/// Write a column back into a matrix. `values` must have one entry per row.
pub fn set_column(rows: &mut [Row], feature: usize, values: &[f64]) {
    for (row, v) in rows.iter_mut().zip(values) {
        row[feature] = *v;
    }
}
