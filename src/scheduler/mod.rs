//! Scheduler module for running checks and tracking incidents.
//!
//! Each enabled monitor gets its own task. A task checks immediately, then
//! once per interval, and stops waiting as soon as shutdown is raised. A
//! check that is already running is allowed to finish.

use crate::config::MonitorConfig;
use crate::db::{AppliedCheck, CheckRecord, DbError, ErrorType, Persistence};
use crate::incident::{self, OpenIncidents};
use crate::notify::{IncidentEvent, Notifier};
use crate::probe::{self, CheckResult};

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Shared collaborators of every scheduler task.
#[derive(Clone)]
struct Context {
    store: Arc<dyn Persistence>,
    notifier: Option<Arc<dyn Notifier>>,
}

/// The main scheduler that orchestrates check execution.
pub struct Scheduler {
    ctx: Context,
    stop_tx: broadcast::Sender<()>,
    units: Mutex<JoinSet<()>>,
    running: Mutex<HashSet<String>>,
}

impl Scheduler {
    /// Create a new scheduler with the given store and optional notifier.
    pub fn new(store: Arc<dyn Persistence>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            ctx: Context { store, notifier },
            stop_tx,
            units: Mutex::new(JoinSet::new()),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Start a task for every enabled monitor.
    pub async fn start(&self, monitors: &[MonitorConfig]) {
        let enabled = monitors.iter().filter(|m| m.enabled).count();
        tracing::info!(
            "Starting scheduler with {} monitors ({} disabled)",
            enabled,
            monitors.len() - enabled
        );

        for monitor in monitors {
            self.add_monitor(monitor.clone()).await;
        }
    }

    /// Add a monitor to be checked. Disabled or already running monitors
    /// are ignored.
    pub async fn add_monitor(&self, monitor: MonitorConfig) {
        if !monitor.enabled {
            tracing::debug!("Scheduler: Skipping disabled monitor {}", monitor.url);
            return;
        }

        if !self.running.lock().await.insert(monitor.url.clone()) {
            return;
        }

        tracing::info!("Scheduler: Adding monitor {} every {:?}", monitor.url, monitor.interval);

        let ctx = self.ctx.clone();
        let stop_rx = self.stop_tx.subscribe();
        self.units.lock().await.spawn(run_monitor_loop(ctx, monitor, stop_rx));
    }

    /// Number of monitors with a running task.
    pub async fn running(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Signal every task to stop and wait until all have exited.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(());

        let mut units = self.units.lock().await;
        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Scheduler task failed: {}", e);
            }
        }
        self.running.lock().await.clear();

        tracing::info!("monitoring stopped");
    }
}

/// Run the check loop for a single monitor.
async fn run_monitor_loop(
    ctx: Context,
    monitor: MonitorConfig,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(monitor.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                run_check(&ctx, &monitor).await;
            }
        }
    }

    tracing::debug!("Scheduler: Stopped monitor {}", monitor.url);
}

/// One tick: probe, decide incidents, persist, notify.
async fn run_check(ctx: &Context, monitor: &MonitorConfig) {
    let result = match probe::check(&monitor.probe_config()).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(url = %monitor.url, error = %e, "Check could not be attempted");
            CheckResult::from_probe_error(&monitor.url, Utc::now(), &e)
        }
    };

    log_result(monitor, &result);

    match apply_result(ctx.store.as_ref(), monitor, &result) {
        Ok(applied) => {
            if let Some(notifier) = &ctx.notifier {
                dispatch(notifier, &monitor.url, &applied);
            }
        }
        Err(e) => {
            tracing::error!(
                url = %monitor.url,
                error = %e,
                "Failed to record check, result discarded"
            );
        }
    }
}

fn log_result(monitor: &MonitorConfig, result: &CheckResult) {
    let response_ms = result.response_time.as_millis();
    tracing::debug!(
        url = %result.url,
        "Timings for {}: dns={:?} connect={:?} tls={:?} first_byte={:?}",
        result.url,
        result.timings.dns,
        result.timings.connect,
        result.timings.tls,
        result.timings.first_byte
    );

    if result.success {
        tracing::info!(
            url = %result.url,
            status = result.status_code,
            "UP {} ({}ms)",
            result.url,
            response_ms
        );
        if result.response_time > monitor.response_time_threshold {
            tracing::warn!(
                url = %result.url,
                "Slow response from {}: {}ms exceeds {:?}",
                result.url,
                response_ms,
                monitor.response_time_threshold
            );
        }
    } else {
        tracing::info!(
            url = %result.url,
            status = result.status_code,
            "DOWN {} ({}ms): {}",
            result.url,
            response_ms,
            result.error_message
        );
    }
}

/// Evaluate incidents for a finished check and persist everything it
/// produced as one batch.
pub fn apply_result(
    store: &dyn Persistence,
    monitor: &MonitorConfig,
    result: &CheckResult,
) -> Result<AppliedCheck, DbError> {
    let mut open = OpenIncidents::new();
    for error_type in ErrorType::ALL {
        if let Some(incident) = store.find_open_incident(&monitor.url, error_type)? {
            open.insert(incident);
        }
    }

    let actions = incident::evaluate(result, &open, &monitor.policy(), result.timestamp);

    let applied = store.record_check(&CheckRecord {
        url: monitor.url.clone(),
        checked_at: result.timestamp,
        is_up: result.success,
        status_code: result.status_code,
        response_time_ms: i64::try_from(result.response_time.as_millis()).unwrap_or(i64::MAX),
        certificate_expiry: result.certificate_expiry,
        actions,
    })?;

    for incident in &applied.opened {
        tracing::warn!(
            url = %monitor.url,
            incident = incident.id,
            "Incident opened ({}): {}",
            incident.error_type,
            incident.description
        );
    }
    for incident in &applied.resolved {
        tracing::info!(
            url = %monitor.url,
            incident = incident.id,
            "Incident resolved ({})",
            incident.error_type
        );
    }

    Ok(applied)
}

/// Fire-and-forget notifications for incidents a check opened or resolved.
fn dispatch(notifier: &Arc<dyn Notifier>, url: &str, applied: &AppliedCheck) {
    for (incident, opened) in applied
        .opened
        .iter()
        .map(|i| (i, true))
        .chain(applied.resolved.iter().map(|i| (i, false)))
    {
        let notifier = notifier.clone();
        let event = IncidentEvent {
            monitor_url: url.to_string(),
            incident: incident.clone(),
        };

        tokio::spawn(async move {
            let sent = if opened {
                notifier.incident_opened(&event).await
            } else {
                notifier.incident_resolved(&event).await
            };
            if let Err(e) = sent {
                tracing::warn!(
                    url = %event.monitor_url,
                    error = %e,
                    "Failed to send incident notification"
                );
            }
        });
    }
}
