use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::distribution::job::JobStatus;

/// Event name carried in every distribution webhook.
pub const DISTRIBUTE_EVENT: &str = "distribute";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Body posted to a job's webhook after it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub job_id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub status_code: u8,
    pub status_message: Option<String>,
    pub trigger_user: String,
    /// Milliseconds since the Unix epoch
    pub execute_time: i64,
    pub event: &'static str,
}

impl NotificationPayload {
    pub fn new(
        job_id: Uuid,
        job_name: &str,
        status: JobStatus,
        status_message: Option<String>,
        trigger_user: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            job_name: job_name.to_string(),
            status,
            status_code: status.code(),
            status_message,
            trigger_user: trigger_user.to_string(),
            execute_time: at.timestamp_millis(),
            event: DISTRIBUTE_EVENT,
        }
    }
}

/// Best-effort delivery of job outcomes. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        webhook: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Posts the payload as JSON to the webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        webhook: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let response = self.client.post(webhook).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        tracing::debug!(job_id = %payload.job_id, webhook, "Webhook delivered");
        Ok(())
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _webhook: &str,
        _payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}
