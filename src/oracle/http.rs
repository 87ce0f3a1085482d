//! Remote model server oracle.
//!
//! Protocol:
//! - `GET  {endpoint}/health`   → any 2xx means the model is loaded
//! - `POST {endpoint}/forecast` with `{"past_values": [[f32; 6]; context]}`
//!   → `{"prediction": [[f32; 6]; horizon]}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{rows_from_f32, rows_to_f32, OracleError, PredictionOracle};
use crate::types::{Row, NUM_FEATURES};

#[derive(Serialize)]
struct ForecastRequest {
    past_values: Vec<[f32; NUM_FEATURES]>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    prediction: Vec<Vec<f32>>,
}

/// HTTP client for a model server.
#[derive(Clone)]
pub struct HttpOracle {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpOracle {
    /// Create a client without contacting the server.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Load(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client and confirm the model server is serving.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, OracleError> {
        let oracle = Self::new(endpoint, timeout)?;
        oracle.probe().await?;
        info!(endpoint = %oracle.endpoint, "Model server reachable");
        Ok(oracle)
    }

    async fn probe(&self) -> Result<(), OracleError> {
        let resp = self
            .http
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
            .map_err(|e| OracleError::Load(format!("model server unreachable: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(OracleError::Load(format!(
                "model server health check returned {}",
                resp.status()
            )))
        }
    }
}

#[async_trait]
impl PredictionOracle for HttpOracle {
    async fn forecast(&self, context: &[Row]) -> Result<Vec<Row>, OracleError> {
        let body = ForecastRequest {
            past_values: rows_to_f32(context),
        };
        let resp = self
            .http
            .post(format!("{}/forecast", self.endpoint))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OracleError::Status(resp.status()));
        }

        let parsed: ForecastResponse = resp.json().await?;
        debug!(rows = parsed.prediction.len(), "Forecast received from model server");
        rows_from_f32(&parsed.prediction)
    }

    fn oracle_name(&self) -> &str {
        "HTTP"
    }
}
