//! Forecasting oracle abstraction
//!
//! The pretrained model is treated as a black box that maps a
//! `context_length × NUM_FEATURES` tensor in conditioned space onto a
//! `prediction_length × NUM_FEATURES` forecast in the same space.
//!
//! Backends:
//! - [`HttpOracle`]: remote model server (JSON over HTTP)
//! - `OnnxOracle`: in-process ONNX Runtime session (`onnx` feature)

mod http;
#[cfg(feature = "onnx")]
mod onnx;

pub use http::HttpOracle;
#[cfg(feature = "onnx")]
pub use onnx::OnnxOracle;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{InferenceConfig, OracleConfig, OracleKind};
use crate::types::Row;

/// Oracle failures. Any of these aborts the current inference cycle only.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Model load failed: {0}")]
    Load(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Unexpected forecast shape: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    Shape {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Model runtime error: {0}")]
    Runtime(String),
}

/// Trait abstracting where forecasts come from.
///
/// Implementations must be stateless per call; the orchestrator validates
/// the returned shape before using it.
#[async_trait]
pub trait PredictionOracle: Send + Sync + 'static {
    /// Forecast the next horizon from a conditioned context window.
    async fn forecast(&self, context: &[Row]) -> Result<Vec<Row>, OracleError>;

    /// Human-readable name for logging (e.g. "HTTP", "ONNX").
    fn oracle_name(&self) -> &str;
}

/// Build the configured oracle, failing if the model is unreachable or
/// cannot be loaded.
pub async fn build_oracle(
    config: &OracleConfig,
    inference: &InferenceConfig,
) -> Result<Arc<dyn PredictionOracle>, OracleError> {
    match config.kind {
        OracleKind::Http => {
            let oracle =
                HttpOracle::connect(&config.endpoint, Duration::from_secs(config.timeout_secs)).await?;
            Ok(Arc::new(oracle))
        }
        #[cfg(feature = "onnx")]
        OracleKind::Onnx => {
            let path = config
                .model_path
                .as_deref()
                .ok_or_else(|| OracleError::Load("oracle.model_path is not set".to_string()))?;
            let oracle = OnnxOracle::load(path, inference.context_length, inference.prediction_length)?;
            Ok(Arc::new(oracle))
        }
        #[cfg(not(feature = "onnx"))]
        OracleKind::Onnx => {
            let _ = inference;
            Err(OracleError::Load(
                "oracle.kind = \"onnx\" requires building with the `onnx` feature".to_string(),
            ))
        }
    }
}

/// Convert model-native f32 rows, rejecting rows of the wrong width.
pub(crate) fn rows_from_f32(values: &[Vec<f32>]) -> Result<Vec<Row>, OracleError> {
    values
        .iter()
        .map(|r| {
            let arr: [f32; crate::types::NUM_FEATURES] =
                r.as_slice().try_into().map_err(|_| OracleError::Shape {
                    expected_rows: values.len(),
                    expected_cols: crate::types::NUM_FEATURES,
                    rows: values.len(),
                    cols: r.len(),
                })?;
            Ok(arr.map(f64::from))
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn rows_to_f32(rows: &[Row]) -> Vec<[f32; crate::types::NUM_FEATURES]> {
    rows.iter().map(|r| r.map(|v| v as f32)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_f32_rejects_wrong_width() {
        let ok = rows_from_f32(&[vec![1.0; 6], vec![2.0; 6]]).unwrap();
        assert_eq!(ok[1], [2.0; 6]);
        let err = rows_from_f32(&[vec![1.0; 5]]).unwrap_err();
        assert!(matches!(err, OracleError::Shape { cols: 5, .. }));
    }

    #[tokio::test]
    async fn test_onnx_kind_without_model_path_fails() {
        let config = OracleConfig {
            kind: OracleKind::Onnx,
            model_path: None,
            ..OracleConfig::default()
        };
        let result = build_oracle(&config, &InferenceConfig::default()).await;
        assert!(matches!(result, Err(OracleError::Load(_))));
    }
}
