//! Machine Configuration - every pipeline constant as an operator-tunable TOML value
//!
//! Each section implements `Default` with the values the forecasting model was
//! tuned against, so a missing config file behaves exactly like the shipped
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::processing::{FeatureLimits, RescaleMethod};
use crate::types::NUM_FEATURES;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitored machine.
///
/// Load with `MachineConfig::load()` which searches:
/// 1. `$SENTRY_CONFIG` env var
/// 2. `./sentry_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine identification
    #[serde(default)]
    pub machine: MachineInfo,

    /// Where telemetry comes from and how often the buffer refreshes
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Inference schedule and tensor shapes
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Low-pass filter and standardization artifact
    #[serde(default)]
    pub conditioning: ConditioningConfig,

    /// Outlier removal and context rescale
    #[serde(default)]
    pub postprocess: PostprocessConfig,

    /// Per-feature limits and critical share
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Forecasting model backend
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Alert delivery
    #[serde(default)]
    pub notification: NotificationConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl MachineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SENTRY_CONFIG` environment variable
    /// 2. `./sentry_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// Environment overrides are applied on top of whichever source won.
    pub fn load() -> Self {
        let mut config = Self::load_base();
        config.apply_env_overrides();
        config
    }

    fn load_base() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var("SENTRY_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), machine = %config.machine.id, "Loaded machine config from SENTRY_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from SENTRY_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "SENTRY_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./sentry_config.toml
        let local = PathBuf::from("sentry_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(machine = %config.machine.id, "Loaded machine config from ./sentry_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./sentry_config.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No sentry_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are logged as warnings and never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Apply `INFERENCE_INTERVAL_SECS`, `INFLUX_TOKEN` and `SENTRY_SERVER_ADDR`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = std::env::var("INFERENCE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            info!(interval_secs = secs, "Inference interval overridden by INFERENCE_INTERVAL_SECS");
            self.inference.interval_secs = secs;
        }
        if let Ok(token) = std::env::var("INFLUX_TOKEN") {
            if !token.is_empty() {
                self.telemetry.influx.token = token;
            }
        }
        if let Ok(addr) = std::env::var("SENTRY_SERVER_ADDR") {
            if !addr.is_empty() {
                self.server.addr = addr;
            }
        }
    }

    /// Validate all values for internal consistency.
    ///
    /// Every problem is collected so the operator sees the full list at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let inf = &self.inference;
        if inf.context_length == 0 {
            errors.push("inference.context_length must be > 0".to_string());
        }
        if inf.prediction_length == 0 {
            errors.push("inference.prediction_length must be > 0".to_string());
        }
        if inf.interval_secs == 0 {
            errors.push("inference.interval_secs must be > 0".to_string());
        }
        if self.telemetry.collection_interval_secs == 0 {
            errors.push("telemetry.collection_interval_secs must be > 0".to_string());
        }

        let c = &self.conditioning;
        if !(c.filter_cutoff > 0.0 && c.filter_cutoff < 1.0) {
            errors.push(format!(
                "conditioning.filter_cutoff ({}) must be between 0 and 1 (exclusive)",
                c.filter_cutoff
            ));
        }
        if c.filter_order == 0 || c.filter_order > defaults::MAX_FILTER_ORDER {
            errors.push(format!(
                "conditioning.filter_order ({}) must be between 1 and {}",
                c.filter_order,
                defaults::MAX_FILTER_ORDER
            ));
        }

        let p = &self.postprocess;
        if p.preserve_leading > inf.prediction_length {
            errors.push(format!(
                "postprocess.preserve_leading ({}) must be <= inference.prediction_length ({})",
                p.preserve_leading, inf.prediction_length
            ));
        }
        if !(p.context_fraction > 0.0 && p.context_fraction <= 1.0) {
            errors.push(format!(
                "postprocess.context_fraction ({}) must be in (0, 1]",
                p.context_fraction
            ));
        }
        if !(p.outlier_z_threshold > 0.0) || !p.outlier_z_threshold.is_finite() {
            errors.push("postprocess.outlier_z_threshold must be a finite number > 0".to_string());
        }

        let a = &self.anomaly;
        if !(a.critical_percentage > 0.0 && a.critical_percentage <= 100.0) {
            errors.push(format!(
                "anomaly.critical_percentage ({}) must be in (0, 100]",
                a.critical_percentage
            ));
        }
        for (name, limits) in a.limits.named() {
            Self::check_limits(name, limits, &mut errors);
        }

        match self.telemetry.source {
            SourceKind::Influx => {
                if self.telemetry.influx.url.trim().is_empty() {
                    errors.push("telemetry.influx.url must be set when source = \"influx\"".to_string());
                }
                if self.telemetry.influx.bucket.trim().is_empty() {
                    errors.push("telemetry.influx.bucket must be set when source = \"influx\"".to_string());
                }
            }
            SourceKind::Csv => {
                if self.telemetry.csv.path.as_os_str().is_empty() {
                    errors.push("telemetry.csv.path must be set when source = \"csv\"".to_string());
                }
                if self.telemetry.csv.emit_interval_secs == 0 {
                    errors.push("telemetry.csv.emit_interval_secs must be > 0".to_string());
                }
            }
        }

        match self.oracle.kind {
            OracleKind::Http => {
                if self.oracle.endpoint.trim().is_empty() {
                    errors.push("oracle.endpoint must be set when kind = \"http\"".to_string());
                }
            }
            OracleKind::Onnx => {
                if self.oracle.model_path.is_none() {
                    errors.push("oracle.model_path must be set when kind = \"onnx\"".to_string());
                }
            }
        }

        for w in super::validation::validate_operating_ranges(self) {
            warn!("{}", w);
        }

        // Reject NaN/Inf in any config value (sweep all floats via the TOML tree)
        if let Ok(tree) = toml::Value::try_from(self) {
            let bad = super::validation::non_finite_keys(&tree, "");
            if !bad.is_empty() {
                errors.push(format!(
                    "Config contains NaN or Inf values ({}); all numbers must be finite",
                    bad.join(", ")
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_limits(name: &str, limits: &FeatureLimits, errors: &mut Vec<String>) {
        if let (Some(min), Some(max)) = (limits.min, limits.max) {
            if min >= max {
                errors.push(format!(
                    "anomaly.limits.{name}: min ({min:.3}) must be < max ({max:.3})"
                ));
            }
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Machine Info
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    /// Identifier used in telemetry queries and alert payloads
    #[serde(default = "default_machine_id")]
    pub id: String,

    /// Human-readable name for logs
    #[serde(default)]
    pub name: String,
}

fn default_machine_id() -> String {
    "machine-001".to_string()
}

impl Default for MachineInfo {
    fn default() -> Self {
        Self {
            id: default_machine_id(),
            name: String::new(),
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Influx,
    #[default]
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub source: SourceKind,

    /// Seconds between buffer refresh queries
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    #[serde(default)]
    pub influx: InfluxConfig,

    #[serde(default)]
    pub csv: CsvReplayConfig,
}

fn default_collection_interval() -> u64 {
    defaults::COLLECTION_INTERVAL_SECS
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            collection_interval_secs: default_collection_interval(),
            influx: InfluxConfig::default(),
            csv: CsvReplayConfig::default(),
        }
    }
}

impl TelemetryConfig {
    pub const fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_influx_url")]
    pub url: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_influx_measurement")]
    pub measurement: String,
    /// API token; `INFLUX_TOKEN` takes precedence
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_influx_min_range")]
    pub min_range_minutes: u64,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}
fn default_influx_measurement() -> String {
    defaults::INFLUX_MEASUREMENT.to_string()
}
fn default_influx_min_range() -> u64 {
    defaults::INFLUX_MIN_RANGE_MINUTES
}
fn default_source_timeout() -> u64 {
    defaults::SOURCE_HTTP_TIMEOUT_SECS
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            org: String::new(),
            bucket: String::new(),
            measurement: default_influx_measurement(),
            token: String::new(),
            min_range_minutes: default_influx_min_range(),
            timeout_secs: default_source_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvReplayConfig {
    #[serde(default = "default_csv_path")]
    pub path: PathBuf,
    /// Rows visible as soon as replay starts
    #[serde(default = "default_csv_initial_batch")]
    pub initial_batch: usize,
    /// Seconds between each newly visible row
    #[serde(default = "default_csv_emit_interval")]
    pub emit_interval_secs: u64,
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("data/sensor_data.csv")
}
fn default_csv_initial_batch() -> usize {
    defaults::CSV_INITIAL_BATCH
}
fn default_csv_emit_interval() -> u64 {
    defaults::CSV_EMIT_INTERVAL_SECS
}

impl Default for CsvReplayConfig {
    fn default() -> Self {
        Self {
            path: default_csv_path(),
            initial_batch: default_csv_initial_batch(),
            emit_interval_secs: default_csv_emit_interval(),
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Seconds between inference cycles; `INFERENCE_INTERVAL_SECS` takes precedence
    #[serde(default = "default_inference_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    #[serde(default = "default_prediction_length")]
    pub prediction_length: usize,
    /// Buffer slots kept beyond `context_length`
    #[serde(default = "default_buffer_margin")]
    pub buffer_margin: usize,
}

fn default_inference_interval() -> u64 {
    defaults::INFERENCE_INTERVAL_SECS
}
fn default_context_length() -> usize {
    defaults::CONTEXT_LENGTH
}
fn default_prediction_length() -> usize {
    defaults::PREDICTION_LENGTH
}
fn default_buffer_margin() -> usize {
    defaults::BUFFER_MARGIN
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_inference_interval(),
            context_length: default_context_length(),
            prediction_length: default_prediction_length(),
            buffer_margin: default_buffer_margin(),
        }
    }
}

impl InferenceConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn buffer_capacity(&self) -> usize {
        self.context_length + self.buffer_margin
    }
}

// ============================================================================
// Conditioning
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditioningConfig {
    /// Normalized cutoff (fraction of Nyquist)
    #[serde(default = "default_filter_cutoff")]
    pub filter_cutoff: f64,
    #[serde(default = "default_filter_order")]
    pub filter_order: usize,
    /// JSON standardization artifact; absent means unscaled mode
    #[serde(default)]
    pub scaler_path: Option<PathBuf>,
}

fn default_filter_cutoff() -> f64 {
    defaults::FILTER_CUTOFF
}
fn default_filter_order() -> usize {
    defaults::FILTER_ORDER
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            filter_cutoff: default_filter_cutoff(),
            filter_order: default_filter_order(),
            scaler_path: None,
        }
    }
}

// ============================================================================
// Post-Processing
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessConfig {
    #[serde(default = "default_outlier_z")]
    pub outlier_z_threshold: f64,
    /// Leading rows exempt from the context rescale
    #[serde(default = "default_preserve_leading")]
    pub preserve_leading: usize,
    /// Trailing share of the context used as reference range
    #[serde(default = "default_context_fraction")]
    pub context_fraction: f64,
    #[serde(default)]
    pub rescale_method: RescaleMethod,
}

fn default_outlier_z() -> f64 {
    defaults::OUTLIER_Z_THRESHOLD
}
fn default_preserve_leading() -> usize {
    defaults::PRESERVE_LEADING
}
fn default_context_fraction() -> f64 {
    defaults::CONTEXT_FRACTION
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            outlier_z_threshold: default_outlier_z(),
            preserve_leading: default_preserve_leading(),
            context_fraction: default_context_fraction(),
            rescale_method: RescaleMethod::default(),
        }
    }
}

// ============================================================================
// Anomaly Scoring
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Share of horizon points (%) at which a feature turns critical
    #[serde(default = "default_critical_percentage")]
    pub critical_percentage: f64,
    #[serde(default)]
    pub limits: LimitTable,
}

fn default_critical_percentage() -> f64 {
    defaults::CRITICAL_PERCENTAGE
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            critical_percentage: default_critical_percentage(),
            limits: LimitTable::default(),
        }
    }
}

/// Physical-unit limits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitTable {
    #[serde(default = "default_current_limits")]
    pub current: FeatureLimits,
    #[serde(rename = "tempA", default = "default_temp_limits")]
    pub temp_a: FeatureLimits,
    #[serde(rename = "tempB", default = "default_temp_limits")]
    pub temp_b: FeatureLimits,
    #[serde(rename = "accX", default = "default_acc_x_limits")]
    pub acc_x: FeatureLimits,
    #[serde(rename = "accY", default = "default_acc_y_limits")]
    pub acc_y: FeatureLimits,
    #[serde(rename = "accZ", default = "default_acc_z_limits")]
    pub acc_z: FeatureLimits,
}

const fn default_current_limits() -> FeatureLimits {
    FeatureLimits::at_most(defaults::CURRENT_MAX)
}
const fn default_temp_limits() -> FeatureLimits {
    FeatureLimits::at_most(defaults::TEMP_MAX)
}
const fn default_acc_x_limits() -> FeatureLimits {
    FeatureLimits::between(defaults::ACC_X_MIN, defaults::ACC_X_MAX)
}
const fn default_acc_y_limits() -> FeatureLimits {
    FeatureLimits::between(defaults::ACC_Y_MIN, defaults::ACC_Y_MAX)
}
const fn default_acc_z_limits() -> FeatureLimits {
    FeatureLimits::between(defaults::ACC_Z_MIN, defaults::ACC_Z_MAX)
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            current: default_current_limits(),
            temp_a: default_temp_limits(),
            temp_b: default_temp_limits(),
            acc_x: default_acc_x_limits(),
            acc_y: default_acc_y_limits(),
            acc_z: default_acc_z_limits(),
        }
    }
}

impl LimitTable {
    /// Limits in feature column order.
    pub const fn as_array(&self) -> [FeatureLimits; NUM_FEATURES] {
        [
            self.current,
            self.temp_a,
            self.temp_b,
            self.acc_x,
            self.acc_y,
            self.acc_z,
        ]
    }

    fn named(&self) -> [(&'static str, &FeatureLimits); NUM_FEATURES] {
        [
            ("current", &self.current),
            ("tempA", &self.temp_a),
            ("tempB", &self.temp_b),
            ("accX", &self.acc_x),
            ("accY", &self.acc_y),
            ("accZ", &self.acc_z),
        ]
    }
}

// ============================================================================
// Oracle
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Remote model server over HTTP
    #[default]
    Http,
    /// Local ONNX model (requires the `onnx` feature)
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub kind: OracleKind,
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

fn default_oracle_endpoint() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_oracle_timeout() -> u64 {
    defaults::ORACLE_HTTP_TIMEOUT_SECS
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            endpoint: default_oracle_endpoint(),
            model_path: None,
            timeout_secs: default_oracle_timeout(),
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Alert webhook; without one alerts are only logged
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

fn default_notify_timeout() -> u64 {
    defaults::NOTIFY_HTTP_TIMEOUT_SECS
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `SENTRY_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
