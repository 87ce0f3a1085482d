//! JSON webhook alert delivery.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::{alert_subject, NotificationDispatcher, NotifyError};
use crate::types::AlertPayload;

#[derive(Serialize)]
struct WebhookBody<'a> {
    subject: String,
    inference_count: u64,
    alert: &'a AlertPayload,
}

/// POSTs each alert as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(&self, alert: &AlertPayload, inference_count: u64) -> Result<bool, NotifyError> {
        let body = WebhookBody {
            subject: alert_subject(alert, inference_count),
            inference_count,
            alert,
        };
        let resp = self.http.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status()));
        }
        info!(machine = %alert.machine_id, inference_count, "Alert delivered to webhook");
        Ok(true)
    }

    fn dispatcher_name(&self) -> &str {
        "webhook"
    }
}
