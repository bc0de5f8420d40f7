//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::incident::IncidentAction;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const MONITOR_COLUMNS: &str = "id, url, enabled, interval_ms, response_time_threshold_ms, \
     certificate_monitoring, certificate_expired_before_ms, is_up, status_code, response_time_ms, \
     certificate_expired_date, last_checked_at, created_at, updated_at";

const INCIDENT_COLUMNS: &str = "id, monitor_id, error_type, description, created_at, solved_at";

const HISTORY_COLUMNS: &str = "id, monitor_id, is_up, status_code, response_time_ms, created_at";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("monitor not found: {0}")]
    MonitorNotFound(String),
}

/// Everything one completed check writes.
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub url: String,
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub certificate_expiry: Option<DateTime<Utc>>,
    pub actions: Vec<IncidentAction>,
}

/// What [`Persistence::record_check`] actually changed.
#[derive(Debug, Clone)]
pub struct AppliedCheck {
    pub history: MonitorHistory,
    pub opened: Vec<Incident>,
    pub resolved: Vec<Incident>,
}

/// Durable storage for monitors, history and incidents.
pub trait Persistence: Send + Sync {
    /// Insert or update a monitor, keyed by URL.
    fn upsert_monitor(&self, settings: &MonitorSettings) -> Result<Monitor, DbError>;

    fn append_history(&self, url: &str, history: &NewHistory) -> Result<MonitorHistory, DbError>;

    fn find_open_incident(
        &self,
        url: &str,
        error_type: ErrorType,
    ) -> Result<Option<Incident>, DbError>;

    /// Returns `None` when an open incident of that type already exists.
    fn create_incident(
        &self,
        url: &str,
        incident: &NewIncident,
    ) -> Result<Option<Incident>, DbError>;

    /// Returns `None` when the incident was not open.
    fn resolve_incident(
        &self,
        id: i64,
        solved_at: DateTime<Utc>,
    ) -> Result<Option<Incident>, DbError>;

    fn list_monitors(&self) -> Result<Vec<Monitor>, DbError>;

    /// The monitor plus its `limit` most recent history rows, newest first.
    fn get_monitor_with_history(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Option<MonitorWithHistory>, DbError>;

    /// Apply a check's cache update, history row and incident actions in
    /// one transaction.
    fn record_check(&self, record: &CheckRecord) -> Result<AppliedCheck, DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Run the embedded migrations and wrap the connection.
    fn init(mut conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", true)?;

        let report = embedded::migrations::runner().run(&mut conn)?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Reporting ---

    /// All incidents of a monitor, newest first.
    pub fn list_incidents(&self, url: &str) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents WHERE monitor_id = (SELECT id FROM monitors WHERE url = ?1)
             ORDER BY created_at DESC, id DESC",
            INCIDENT_COLUMNS
        ))?;

        let incidents = stmt
            .query_map(params![url], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    /// History rows of a monitor in `[from, to)`, oldest first.
    pub fn histories_between(
        &self,
        url: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MonitorHistory>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitor_histories
             WHERE monitor_id = (SELECT id FROM monitors WHERE url = ?1)
               AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC, id ASC",
            HISTORY_COLUMNS
        ))?;

        let histories = stmt
            .query_map(params![url, fmt_time(from), fmt_time(to)], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(histories)
    }
}

impl Persistence for Store {
    fn upsert_monitor(&self, settings: &MonitorSettings) -> Result<Monitor, DbError> {
        let conn = self.conn()?;
        let now = fmt_time(Utc::now());

        conn.execute(
            "INSERT INTO monitors (url, enabled, interval_ms, response_time_threshold_ms,
                 certificate_monitoring, certificate_expired_before_ms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(url) DO UPDATE SET
                 enabled = excluded.enabled,
                 interval_ms = excluded.interval_ms,
                 response_time_threshold_ms = excluded.response_time_threshold_ms,
                 certificate_monitoring = excluded.certificate_monitoring,
                 certificate_expired_before_ms = excluded.certificate_expired_before_ms,
                 updated_at = excluded.updated_at",
            params![
                settings.url,
                settings.enabled,
                settings.interval_ms,
                settings.response_time_threshold_ms,
                settings.certificate_monitoring,
                settings.certificate_expired_before_ms,
                now,
            ],
        )?;

        monitor_by_url(&conn, &settings.url)?
            .ok_or_else(|| DbError::MonitorNotFound(settings.url.clone()))
    }

    fn append_history(&self, url: &str, history: &NewHistory) -> Result<MonitorHistory, DbError> {
        let conn = self.conn()?;
        let monitor_id = monitor_id(&conn, url)?;
        insert_history(&conn, monitor_id, history)
    }

    fn find_open_incident(
        &self,
        url: &str,
        error_type: ErrorType,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        let incident = conn
            .query_row(
                &format!(
                    "SELECT {} FROM incidents
                     WHERE monitor_id = (SELECT id FROM monitors WHERE url = ?1)
                       AND error_type = ?2 AND solved_at IS NULL",
                    INCIDENT_COLUMNS
                ),
                params![url, error_type.as_str()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    fn create_incident(
        &self,
        url: &str,
        incident: &NewIncident,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        let monitor_id = monitor_id(&conn, url)?;
        insert_incident(&conn, monitor_id, incident)
    }

    fn resolve_incident(
        &self,
        id: i64,
        solved_at: DateTime<Utc>,
    ) -> Result<Option<Incident>, DbError> {
        let conn = self.conn()?;
        close_incident(&conn, id, solved_at)
    }

    fn list_monitors(&self) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitors ORDER BY id",
            MONITOR_COLUMNS
        ))?;
        let monitors = stmt
            .query_map([], monitor_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(monitors)
    }

    fn get_monitor_with_history(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Option<MonitorWithHistory>, DbError> {
        let conn = self.conn()?;
        let monitor = match monitor_by_url(&conn, url)? {
            Some(m) => m,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM monitor_histories WHERE monitor_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            HISTORY_COLUMNS
        ))?;
        let histories = stmt
            .query_map(params![monitor.id, limit as i64], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(Some(MonitorWithHistory { monitor, histories }))
    }

    fn record_check(&self, record: &CheckRecord) -> Result<AppliedCheck, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let monitor_id = monitor_id(&tx, &record.url)?;
        let checked_at = fmt_time(record.checked_at);

        tx.execute(
            "UPDATE monitors SET is_up = ?1, status_code = ?2, response_time_ms = ?3,
                 certificate_expired_date = COALESCE(?4, certificate_expired_date),
                 last_checked_at = ?5, updated_at = ?5
             WHERE id = ?6",
            params![
                record.is_up,
                record.status_code,
                record.response_time_ms,
                record.certificate_expiry.map(fmt_time),
                checked_at,
                monitor_id,
            ],
        )?;

        let history = insert_history(
            &tx,
            monitor_id,
            &NewHistory {
                is_up: record.is_up,
                status_code: record.status_code,
                response_time_ms: record.response_time_ms,
                created_at: record.checked_at,
            },
        )?;

        let mut applied = AppliedCheck {
            history,
            opened: Vec::new(),
            resolved: Vec::new(),
        };

        for action in &record.actions {
            match action {
                IncidentAction::Open(new) => {
                    if let Some(incident) = insert_incident(&tx, monitor_id, new)? {
                        applied.opened.push(incident);
                    }
                }
                IncidentAction::Resolve {
                    incident_id,
                    error_type,
                } => {
                    let solved = close_monitor_incident(
                        &tx,
                        monitor_id,
                        *incident_id,
                        *error_type,
                        record.checked_at,
                    )?;
                    if let Some(incident) = solved {
                        applied.resolved.push(incident);
                    }
                }
            }
        }

        tx.commit()?;
        Ok(applied)
    }
}

// --- Statement helpers (usable inside or outside a transaction) ---

fn monitor_id(conn: &Connection, url: &str) -> Result<i64, DbError> {
    conn.query_row("SELECT id FROM monitors WHERE url = ?1", params![url], |row| row.get(0))
        .optional()?
        .ok_or_else(|| DbError::MonitorNotFound(url.to_string()))
}

fn monitor_by_url(conn: &Connection, url: &str) -> Result<Option<Monitor>, DbError> {
    let monitor = conn
        .query_row(
            &format!("SELECT {} FROM monitors WHERE url = ?1", MONITOR_COLUMNS),
            params![url],
            monitor_from_row,
        )
        .optional()?;
    Ok(monitor)
}

fn insert_history(
    conn: &Connection,
    monitor_id: i64,
    history: &NewHistory,
) -> Result<MonitorHistory, DbError> {
    conn.execute(
        "INSERT INTO monitor_histories
             (monitor_id, is_up, status_code, response_time_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            monitor_id,
            history.is_up,
            history.status_code,
            history.response_time_ms,
            fmt_time(history.created_at),
        ],
    )?;

    Ok(MonitorHistory {
        id: conn.last_insert_rowid(),
        monitor_id,
        is_up: history.is_up,
        status_code: history.status_code,
        response_time_ms: history.response_time_ms,
        created_at: history.created_at,
    })
}

fn insert_incident(
    conn: &Connection,
    monitor_id: i64,
    incident: &NewIncident,
) -> Result<Option<Incident>, DbError> {
    let inserted = conn.execute(
        "INSERT INTO incidents (monitor_id, error_type, description, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (monitor_id, error_type) WHERE solved_at IS NULL DO NOTHING",
        params![
            monitor_id,
            incident.error_type.as_str(),
            incident.description,
            fmt_time(incident.created_at),
        ],
    )?;

    if inserted == 0 {
        return Ok(None);
    }

    Ok(Some(Incident {
        id: conn.last_insert_rowid(),
        monitor_id,
        error_type: incident.error_type,
        description: incident.description.clone(),
        created_at: incident.created_at,
        solved_at: None,
    }))
}

fn close_incident(
    conn: &Connection,
    id: i64,
    solved_at: DateTime<Utc>,
) -> Result<Option<Incident>, DbError> {
    let updated = conn.execute(
        "UPDATE incidents SET solved_at = ?1 WHERE id = ?2 AND solved_at IS NULL",
        params![fmt_time(solved_at), id],
    )?;

    if updated == 0 {
        return Ok(None);
    }
    incident_by_id(conn, id).map(Some)
}

/// Close an open incident only when it belongs to `monitor_id` and has the
/// expected type.
fn close_monitor_incident(
    conn: &Connection,
    monitor_id: i64,
    id: i64,
    error_type: ErrorType,
    solved_at: DateTime<Utc>,
) -> Result<Option<Incident>, DbError> {
    let updated = conn.execute(
        "UPDATE incidents SET solved_at = ?1 \
         WHERE id = ?2 AND monitor_id = ?3 AND error_type = ?4 AND solved_at IS NULL",
        params![fmt_time(solved_at), id, monitor_id, error_type.as_str()],
    )?;

    if updated == 0 {
        return Ok(None);
    }
    incident_by_id(conn, id).map(Some)
}

fn incident_by_id(conn: &Connection, id: i64) -> Result<Incident, DbError> {
    let incident = conn.query_row(
        &format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS),
        params![id],
        incident_from_row,
    )?;
    Ok(incident)
}

// --- Row mapping ---

fn monitor_from_row(row: &Row<'_>) -> SqlResult<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        url: row.get(1)?,
        enabled: row.get(2)?,
        interval_ms: row.get(3)?,
        response_time_threshold_ms: row.get(4)?,
        certificate_monitoring: row.get(5)?,
        certificate_expired_before_ms: row.get(6)?,
        is_up: row.get(7)?,
        status_code: row.get(8)?,
        response_time_ms: row.get(9)?,
        certificate_expired_date: opt_time_column(row, 10)?,
        last_checked_at: opt_time_column(row, 11)?,
        created_at: time_column(row, 12)?,
        updated_at: time_column(row, 13)?,
    })
}

fn history_from_row(row: &Row<'_>) -> SqlResult<MonitorHistory> {
    Ok(MonitorHistory {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        is_up: row.get(2)?,
        status_code: row.get(3)?,
        response_time_ms: row.get(4)?,
        created_at: time_column(row, 5)?,
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let error_type: String = row.get(2)?;
    Ok(Incident {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        error_type: error_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
        })?,
        description: row.get(3)?,
        created_at: time_column(row, 4)?,
        solved_at: opt_time_column(row, 5)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        let message = format!("invalid timestamp: {}", s);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
    })
}

fn opt_time_column(row: &Row<'_>, idx: usize) -> SqlResult<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
