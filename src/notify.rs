//! Outbound incident notifications.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::{ErrorType, Incident};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// An incident that was just opened or resolved.
#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub monitor_url: String,
    pub incident: Incident,
}

impl IncidentEvent {
    pub fn severity(&self) -> Severity {
        match self.incident.error_type {
            ErrorType::SslExpired => Severity::Medium,
            ErrorType::UnexpectedStatusCode | ErrorType::Timeout => Severity::High,
        }
    }

    /// How long the incident was open, once resolved.
    pub fn downtime(&self) -> Option<chrono::Duration> {
        self.incident.solved_at.map(|solved| solved - self.incident.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
}

/// Best-effort sink for incident events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn incident_opened(&self, event: &IncidentEvent) -> Result<(), NotifyError>;

    async fn incident_resolved(&self, event: &IncidentEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    monitor_url: &'a str,
    severity: Severity,
    incident: &'a Incident,
    #[serde(skip_serializing_if = "Option::is_none")]
    downtime_seconds: Option<i64>,
    sent_at: DateTime<Utc>,
}

/// Posts incident events as JSON to a configured URL.
pub struct WebhookNotifier {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, token: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { url, token, client })
    }

    async fn post(&self, event: &'static str, incident: &IncidentEvent) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            event,
            monitor_url: &incident.monitor_url,
            severity: incident.severity(),
            incident: &incident.incident,
            downtime_seconds: incident.downtime().map(|d| d.num_seconds()),
            sent_at: Utc::now(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Sent {} notification for {}", event, incident.monitor_url);
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn incident_opened(&self, event: &IncidentEvent) -> Result<(), NotifyError> {
        self.post("incident_opened", event).await
    }

    async fn incident_resolved(&self, event: &IncidentEvent) -> Result<(), NotifyError> {
        self.post("incident_resolved", event).await
    }
}
