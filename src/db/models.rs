//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of failure an incident tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    UnexpectedStatusCode,
    Timeout,
    #[serde(rename = "certificate_expired")]
    SslExpired,
}

impl ErrorType {
    pub const ALL: [ErrorType; 3] = [
        ErrorType::UnexpectedStatusCode,
        ErrorType::Timeout,
        ErrorType::SslExpired,
    ];

    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::UnexpectedStatusCode => "unexpected_status_code",
            ErrorType::Timeout => "timeout",
            ErrorType::SslExpired => "certificate_expired",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorType::UnexpectedStatusCode => write!(f, "Unexpected status code"),
            ErrorType::Timeout => write!(f, "Timeout occurred"),
            ErrorType::SslExpired => write!(f, "SSL certificate expired"),
        }
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown error type: {}", s))
    }
}

/// Desired monitor settings, as produced by configuration sync.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub url: String,
    pub enabled: bool,
    pub interval_ms: i64,
    pub response_time_threshold_ms: i64,
    pub certificate_monitoring: bool,
    pub certificate_expired_before_ms: Option<i64>,
}

/// A monitored endpoint with its cached last-check fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub url: String,
    pub enabled: bool,
    pub interval_ms: i64,
    pub response_time_threshold_ms: i64,
    pub certificate_monitoring: bool,
    pub certificate_expired_before_ms: Option<i64>,
    pub is_up: Option<bool>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<i64>,
    pub certificate_expired_date: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only row per completed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorHistory {
    pub id: i64,
    pub monitor_id: i64,
    pub is_up: bool,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A history row before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistory {
    pub is_up: bool,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// One occurrence of a failure type for a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub monitor_id: i64,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.solved_at.is_none()
    }
}

/// An incident before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub error_type: ErrorType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A monitor plus its most recent history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorWithHistory {
    #[serde(flatten)]
    pub monitor: Monitor,
    pub histories: Vec<MonitorHistory>,
}
