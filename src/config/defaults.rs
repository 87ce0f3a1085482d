//! System-wide default constants.
//!
//! Centralises the numbers the pipeline was tuned with. Grouped by subsystem
//! for easy discovery; every value here can be overridden from TOML.

// ============================================================================
// Scheduling
// ============================================================================

/// Seconds between inference cycles. 180 = 3 minutes.
pub const INFERENCE_INTERVAL_SECS: u64 = 180;

/// Seconds between buffer refresh queries.
pub const COLLECTION_INTERVAL_SECS: u64 = 10;

/// Context window fed to the forecasting model (timesteps).
pub const CONTEXT_LENGTH: usize = 240;

/// Forecast horizon returned by the model (timesteps).
pub const PREDICTION_LENGTH: usize = 60;

/// Extra buffer slots kept beyond the context window.
pub const BUFFER_MARGIN: usize = 100;

/// Log a buffer refresh at info level every N successful refreshes.
pub const REFRESH_LOG_EVERY: u64 = 10;

// ============================================================================
// Signal Conditioning
// ============================================================================

/// Normalized low-pass cutoff (fraction of Nyquist).
pub const FILTER_CUTOFF: f64 = 0.3;

/// Butterworth filter order.
pub const FILTER_ORDER: usize = 2;

/// Highest filter order accepted by validation.
pub const MAX_FILTER_ORDER: usize = 8;

// ============================================================================
// Post-Processing
// ============================================================================

/// |z| above which a forecast point is treated as an outlier.
pub const OUTLIER_Z_THRESHOLD: f64 = 3.0;

/// Leading forecast rows kept out of the context rescale.
pub const PRESERVE_LEADING: usize = 3;

/// Trailing fraction of the context used as the rescale reference.
pub const CONTEXT_FRACTION: f64 = 0.15;

/// Spreads at or below this are treated as degenerate.
pub const MIN_SPREAD: f64 = 1e-8;

// ============================================================================
// Anomaly Scoring
// ============================================================================

/// A feature is critical once this share of horizon points violate limits (%).
pub const CRITICAL_PERCENTAGE: f64 = 30.0;

pub const CURRENT_MAX: f64 = 11.0;
pub const TEMP_MAX: f64 = 45.0;
pub const ACC_X_MIN: f64 = -1.9;
pub const ACC_X_MAX: f64 = 0.7;
pub const ACC_Y_MIN: f64 = -2.0;
pub const ACC_Y_MAX: f64 = 0.7;
pub const ACC_Z_MIN: f64 = 5.5;
pub const ACC_Z_MAX: f64 = 14.5;

// ============================================================================
// Telemetry Sources
// ============================================================================

/// Measurement name written by the telemetry gateway.
pub const INFLUX_MEASUREMENT: &str = "machine_metrics";

/// Minimum Flux range window (minutes).
pub const INFLUX_MIN_RANGE_MINUTES: u64 = 120;

/// Assumed sensor period used to size the Flux range (seconds).
pub const INFLUX_SECS_PER_POINT: u64 = 15;

/// Rows made visible immediately when CSV replay starts.
pub const CSV_INITIAL_BATCH: usize = 230;

/// Seconds between newly visible rows during CSV replay.
pub const CSV_EMIT_INTERVAL_SECS: u64 = 10;

// ============================================================================
// HTTP Clients
// ============================================================================

/// Timeout for telemetry queries (seconds).
pub const SOURCE_HTTP_TIMEOUT_SECS: u64 = 10;

/// Timeout for remote model calls (seconds).
pub const ORACLE_HTTP_TIMEOUT_SECS: u64 = 30;

/// Timeout for alert webhooks (seconds).
pub const NOTIFY_HTTP_TIMEOUT_SECS: u64 = 10;
