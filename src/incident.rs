//! Incident lifecycle decisions.
//!
//! Per (monitor, error type) an incident moves NONE -> OPEN -> RESOLVED,
//! and a new occurrence after resolution opens a fresh row. This module
//! only decides; applying the actions is up to the store.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::db::{ErrorType, Incident, NewIncident};
use crate::probe::CheckResult;

/// A change to apply for one check.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentAction {
    Open(NewIncident),
    Resolve {
        incident_id: i64,
        error_type: ErrorType,
    },
}

/// Currently open incidents of one monitor, at most one per type.
#[derive(Debug, Clone, Default)]
pub struct OpenIncidents {
    by_type: HashMap<ErrorType, Incident>,
}

impl OpenIncidents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, incident: Incident) {
        self.by_type.insert(incident.error_type, incident);
    }

    pub fn get(&self, error_type: ErrorType) -> Option<&Incident> {
        self.by_type.get(&error_type)
    }
}

impl FromIterator<Incident> for OpenIncidents {
    fn from_iter<I: IntoIterator<Item = Incident>>(iter: I) -> Self {
        let mut open = Self::new();
        for incident in iter {
            open.insert(incident);
        }
        open
    }
}

/// Per-monitor thresholds used when deciding.
#[derive(Debug, Clone, Default)]
pub struct IncidentPolicy {
    /// Open a certificate incident when expiry is this close. `None`
    /// disables certificate tracking for the monitor.
    pub certificate_expired_before: Option<Duration>,
}

/// The outage classification of a check, if it failed.
pub fn classify(result: &CheckResult) -> Option<ErrorType> {
    if result.is_timeout() {
        Some(ErrorType::Timeout)
    } else if !result.success {
        Some(ErrorType::UnexpectedStatusCode)
    } else {
        None
    }
}

/// Decide which incidents to open or resolve after a check.
pub fn evaluate(
    result: &CheckResult,
    open: &OpenIncidents,
    policy: &IncidentPolicy,
    now: DateTime<Utc>,
) -> Vec<IncidentAction> {
    let mut actions = Vec::new();

    match classify(result) {
        Some(error_type) => {
            if open.get(error_type).is_none() {
                actions.push(IncidentAction::Open(NewIncident {
                    error_type,
                    description: result.error_message.clone(),
                    created_at: now,
                }));
            }
        }
        None => {
            for error_type in [ErrorType::UnexpectedStatusCode, ErrorType::Timeout] {
                if let Some(incident) = open.get(error_type) {
                    actions.push(IncidentAction::Resolve {
                        incident_id: incident.id,
                        error_type,
                    });
                }
            }
        }
    }

    if let (Some(expiry), Some(threshold)) =
        (result.certificate_expiry, policy.certificate_expired_before)
    {
        let remaining = expiry - now;
        let existing = open.get(ErrorType::SslExpired);

        if remaining <= threshold {
            if existing.is_none() {
                actions.push(IncidentAction::Open(NewIncident {
                    error_type: ErrorType::SslExpired,
                    description: certificate_description(&result.url, expiry, now),
                    created_at: now,
                }));
            }
        } else if let Some(incident) = existing {
            actions.push(IncidentAction::Resolve {
                incident_id: incident.id,
                error_type: ErrorType::SslExpired,
            });
        }
    }

    actions
}

fn certificate_description(url: &str, expiry: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let when = expiry.format("%Y-%m-%d %H:%M:%S UTC");
    if expiry <= now {
        format!("Certificate for {} expired on {}", url, when)
    } else {
        format!("Certificate for {} will expire on {}", url, when)
    }
}
