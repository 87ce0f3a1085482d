//! API route table.

use axum::routing::get;
use axum::Router;

use super::handlers::{self, ApiState};

/// Build the `/api/v1` router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Inference
        .route("/inference/last-prediction", get(handlers::last_prediction))
        .route("/inference/status", get(handlers::inference_status))
        .route("/inference/previous-forecast", get(handlers::previous_forecast))
        // Sensor data
        .route("/sensor/last-lookback", get(handlers::last_lookback))
        .route("/sensor/buffer", get(handlers::buffer))
        .route("/sensor/latest", get(handlers::latest))
        .with_state(state)
}
