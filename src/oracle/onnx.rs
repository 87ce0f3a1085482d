//! In-process ONNX Runtime oracle.
//!
//! The exported model takes `past_values` shaped `(1, context, 6)` and
//! returns the forecast as its first output, shaped `(1, horizon, 6)`.
//! Sessions need exclusive access to run, so calls are serialized behind a
//! mutex and executed on the blocking pool.

use async_trait::async_trait;
use ndarray::Array3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{rows_to_f32, OracleError, PredictionOracle};
use crate::types::{Row, NUM_FEATURES};

pub struct OnnxOracle {
    session: Arc<Mutex<Session>>,
    output_name: String,
    context_length: usize,
    prediction_length: usize,
}

impl OnnxOracle {
    /// Load and optimize the model. Fails if the file is missing or invalid.
    pub fn load(path: &Path, context_length: usize, prediction_length: usize) -> Result<Self, OracleError> {
        if !path.exists() {
            return Err(OracleError::Load(format!("model not found: {}", path.display())));
        }

        let session = Session::builder()
            .map_err(|e| OracleError::Load(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| OracleError::Load(format!("optimization level: {e}")))?
            .commit_from_file(path)
            .map_err(|e| OracleError::Load(format!("{}: {e}", path.display())))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| OracleError::Load("model defines no outputs".to_string()))?;

        info!(path = %path.display(), output = %output_name, "ONNX model loaded");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            output_name,
            context_length,
            prediction_length,
        })
    }
}

fn run_session(
    session: &Mutex<Session>,
    output_name: &str,
    input: Array3<f32>,
    prediction_length: usize,
) -> Result<Vec<Row>, OracleError> {
    let mut session = session
        .lock()
        .map_err(|_| OracleError::Runtime("session mutex poisoned".to_string()))?;

    let tensor = Value::from_array(input).map_err(|e| OracleError::Runtime(format!("input tensor: {e}")))?;
    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(|e| OracleError::Runtime(format!("inference failed: {e}")))?;
    let output = outputs
        .get(output_name)
        .ok_or_else(|| OracleError::Runtime(format!("missing output '{output_name}'")))?;
    let (_, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| OracleError::Runtime(format!("extract output: {e}")))?;

    if data.len() != prediction_length * NUM_FEATURES {
        return Err(OracleError::Shape {
            expected_rows: prediction_length,
            expected_cols: NUM_FEATURES,
            rows: data.len() / NUM_FEATURES,
            cols: NUM_FEATURES,
        });
    }

    Ok(data
        .chunks_exact(NUM_FEATURES)
        .map(|c| std::array::from_fn(|f| f64::from(c[f])))
        .collect())
}

#[async_trait]
impl PredictionOracle for OnnxOracle {
    async fn forecast(&self, context: &[Row]) -> Result<Vec<Row>, OracleError> {
        if context.len() != self.context_length {
            return Err(OracleError::Shape {
                expected_rows: self.context_length,
                expected_cols: NUM_FEATURES,
                rows: context.len(),
                cols: NUM_FEATURES,
            });
        }

        let flat: Vec<f32> = rows_to_f32(context).into_iter().flatten().collect();
        let input = Array3::from_shape_vec((1, context.len(), NUM_FEATURES), flat)
            .map_err(|e| OracleError::Runtime(format!("input array: {e}")))?;

        let session = Arc::clone(&self.session);
        let output_name = self.output_name.clone();
        let prediction_length = self.prediction_length;
        tokio::task::spawn_blocking(move || run_session(&session, &output_name, input, prediction_length))
            .await
            .map_err(|e| OracleError::Runtime(format!("inference task: {e}")))?
    }

    fn oracle_name(&self) -> &str {
        "ONNX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_load_error() {
        let result = OnnxOracle::load(Path::new("/nonexistent/model.onnx"), 240, 60);
        assert!(matches!(result, Err(OracleError::Load(_))));
    }
}
