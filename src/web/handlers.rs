//! HTTP request handlers.

use super::AppState;
use crate::config::normalize_url;
use crate::db::{Monitor, MonitorHistory, Persistence};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

/// Days covered by the uptime report, today included.
pub const STAT_DAYS: u64 = 90;

const DEFAULT_HISTORY_LIMIT: usize = 100;

fn error_response(status: StatusCode, message: &str, err: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({ "message": message, "error": err.to_string() })),
    )
        .into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Record not found" }))).into_response()
}

/// Normalized form of a `url` query parameter, falling back to the raw value.
fn lookup_url(raw: &str) -> String {
    normalize_url(raw).unwrap_or_else(|_| raw.to_string())
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "upwatch" }))
}

// ============================================================================
// API: Reports
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub with_stat: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUptime {
    pub date: String,
    pub uptime_percentage: f64,
    /// 0 means no data for that day.
    pub total_checks: usize,
}

#[derive(Debug, Serialize)]
pub struct MonitorReport {
    #[serde(flatten)]
    pub monitor: Monitor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<DailyUptime>>,
}

pub async fn handle_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let monitors = match state.store.list_monitors() {
        Ok(m) => m,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve monitors",
                e,
            )
        }
    };

    if !query.with_stat {
        return Json(monitors).into_response();
    }

    let today = Utc::now().date_naive();
    let first_day = today - Days::new(STAT_DAYS - 1);
    let (from, to) = match (
        first_day.and_hms_opt(0, 0, 0),
        (today + Days::new(1)).and_hms_opt(0, 0, 0),
    ) {
        (Some(from), Some(to)) => (from.and_utc(), to.and_utc()),
        _ => return Json(monitors).into_response(),
    };

    let mut reports = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        let histories = match state.store.histories_between(&monitor.url, from, to) {
            Ok(h) => h,
            Err(e) => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to retrieve monitor histories for stats calculation",
                    e,
                )
            }
        };
        reports.push(MonitorReport {
            stats: calculate_uptime_stats(&histories, first_day, STAT_DAYS),
            monitor,
        });
    }

    Json(reports).into_response()
}

/// Per-day uptime over `days` days starting at `from`. `None` when there is
/// no history at all.
pub fn calculate_uptime_stats(
    histories: &[MonitorHistory],
    from: NaiveDate,
    days: u64,
) -> Option<Vec<DailyUptime>> {
    if histories.is_empty() {
        return None;
    }

    let mut per_day: HashMap<NaiveDate, (usize, usize)> = HashMap::new();
    for history in histories {
        let counts = per_day.entry(history.created_at.date_naive()).or_default();
        counts.1 += 1;
        if history.is_up {
            counts.0 += 1;
        }
    }

    let stats = (0..days)
        .filter_map(|offset| from.checked_add_days(Days::new(offset)))
        .map(|day| {
            let (up, total) = per_day.get(&day).copied().unwrap_or_default();
            let uptime_percentage = if total > 0 {
                up as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            DailyUptime {
                date: day.format("%Y-%m-%d").to_string(),
                uptime_percentage,
                total_checks: total,
            }
        })
        .collect();

    Some(stats)
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub url: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn handle_report_detail(
    State(state): State<AppState>,
    Query(query): Query<DetailQuery>,
) -> Response {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_HISTORY_LIMIT);

    match state.store.get_monitor_with_history(&lookup_url(&query.url), limit) {
        Ok(Some(monitor)) => Json(monitor).into_response(),
        Ok(None) => not_found(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to retrieve monitor details",
            e,
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    pub url: String,
}

pub async fn handle_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> Response {
    let url = lookup_url(&query.url);

    match state.store.get_monitor_with_history(&url, 0) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(),
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve monitor",
                e,
            )
        }
    }

    match state.store.list_incidents(&url) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to retrieve incidents",
            e,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn history(at: DateTime<Utc>, is_up: bool) -> MonitorHistory {
        MonitorHistory {
            id: 0,
            monitor_id: 1,
            is_up,
            status_code: if is_up { 200 } else { 500 },
            response_time_ms: 10,
            created_at: at,
        }
    }

    #[test]
    fn test_uptime_stats_empty_is_omitted() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(calculate_uptime_stats(&[], from, STAT_DAYS).is_none());
    }

    #[test]
    fn test_uptime_stats_per_day() {
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let histories = vec![
            history(day2, true),
            history(day2 + chrono::Duration::hours(1), true),
            history(day2 + chrono::Duration::hours(2), true),
            history(day2 + chrono::Duration::hours(3), false),
            history(Utc.with_ymd_and_hms(2024, 1, 3, 23, 59, 59).unwrap(), false),
        ];

        let stats = calculate_uptime_stats(&histories, from, 3).unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(
            stats[0],
            DailyUptime {
                date: "2024-01-01".to_string(),
                uptime_percentage: 0.0,
                total_checks: 0,
            }
        );
        assert_eq!(stats[1].date, "2024-01-02");
        assert_eq!(stats[1].total_checks, 4);
        assert!((stats[1].uptime_percentage - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats[2].total_checks, 1);
        assert_eq!(stats[2].uptime_percentage, 0.0);
    }

    #[test]
    fn test_uptime_stats_cover_every_day() {
        let from = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let histories = vec![history(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(), true)];

        let stats = calculate_uptime_stats(&histories, from, STAT_DAYS).unwrap();
        assert_eq!(stats.len(), STAT_DAYS as usize);
        assert_eq!(stats[0].uptime_percentage, 100.0);
        assert_eq!(stats.last().unwrap().date, "2024-04-30");
    }
}
