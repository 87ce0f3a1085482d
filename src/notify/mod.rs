//! Alert delivery
//!
//! The orchestrator decides *whether* to notify; dispatchers decide how.
//! Delivery is fire-and-forget from the caller's side: a failed dispatch is
//! logged and never retried or escalated.

mod webhook;

pub use webhook::WebhookDispatcher;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::NotificationConfig;
use crate::types::AlertPayload;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alert endpoint returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Hands alert payloads to whatever delivers them.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + 'static {
    /// Deliver one alert. `Ok(false)` means nothing was sent.
    async fn notify(&self, alert: &AlertPayload, inference_count: u64) -> Result<bool, NotifyError>;

    fn dispatcher_name(&self) -> &str;
}

/// Subject line for an alert, e.g. `CRITICAL ALERT: Machine At Risk - Inference #12`.
pub fn alert_subject(alert: &AlertPayload, inference_count: u64) -> String {
    if alert.critical_features.is_empty() {
        format!("Machine Status: Normal - Inference #{inference_count}")
    } else {
        format!("CRITICAL ALERT: Machine At Risk - Inference #{inference_count}")
    }
}

// ============================================================================
// Log-only Dispatcher
// ============================================================================

/// Used when no delivery endpoint is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, alert: &AlertPayload, inference_count: u64) -> Result<bool, NotifyError> {
        warn!(
            machine = %alert.machine_id,
            critical = ?alert.critical_features,
            "🚨 {} | {}",
            alert_subject(alert, inference_count),
            alert.message
        );
        Ok(false)
    }

    fn dispatcher_name(&self) -> &str {
        "log"
    }
}

/// Build the configured dispatcher.
pub fn build_dispatcher(config: &NotificationConfig) -> Result<Arc<dyn NotificationDispatcher>, NotifyError> {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Arc::new(WebhookDispatcher::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogDispatcher)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MachineStatus;
    use chrono::Utc;

    fn alert(critical: &[&str]) -> AlertPayload {
        AlertPayload {
            status: if critical.is_empty() { MachineStatus::Normal } else { MachineStatus::Critical },
            message: "msg".to_string(),
            anomaly_scores: Default::default(),
            critical_features: critical.iter().map(ToString::to_string).collect(),
            machine_id: "m-1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_subject_reflects_status() {
        assert_eq!(
            alert_subject(&alert(&["tempA"]), 4),
            "CRITICAL ALERT: Machine At Risk - Inference #4"
        );
        assert_eq!(alert_subject(&alert(&[]), 1), "Machine Status: Normal - Inference #1");
    }

    #[tokio::test]
    async fn test_log_dispatcher_reports_not_sent() {
        let sent = LogDispatcher.notify(&alert(&["accZ"]), 2).await.unwrap();
        assert!(!sent);
    }

    #[test]
    fn test_blank_webhook_falls_back_to_log() {
        let config = NotificationConfig {
            webhook_url: Some("  ".to_string()),
            ..NotificationConfig::default()
        };
        assert_eq!(build_dispatcher(&config).unwrap().dispatcher_name(), "log");
    }
}
