//! Appointment monitor: polls the store and fires consultation alerts.
//!
//! One background task per monitor instance. The loop fetches the user's
//! appointments, looks for one that is `Scheduled` and inside the tolerance
//! window around now, posts the consultation alert, then backs off for the
//! cooldown so the same appointment is not re-posted every poll. Fetch
//! failures are logged and retried on the next cycle; the loop never dies on
//! them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alert::AlertCenter;
use crate::config::MonitorConfig;
use crate::model::{Appointment, AppointmentStatus, ParticipantRole};
use crate::store::AppointmentStore;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// First appointment still `Scheduled` whose start is strictly inside the
/// tolerance window around `now_ms`, in list order.
pub fn find_due_appointment<'a>(
    appointments: &'a [Appointment],
    now_ms: i64,
    tolerance: Duration,
) -> Option<&'a Appointment> {
    let tolerance_ms = tolerance.as_millis() as i64;
    appointments.iter().find(|a| {
        a.status == AppointmentStatus::Scheduled && (a.scheduled_at_ms - now_ms).abs() < tolerance_ms
    })
}

struct MonitorTask {
    stop_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Background watcher that turns due appointments into consultation alerts.
pub struct AppointmentMonitor {
    store: Arc<dyn AppointmentStore>,
    alerts: Arc<AlertCenter>,
    config: MonitorConfig,
    active: Mutex<Option<MonitorTask>>,
}

impl AppointmentMonitor {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        alerts: Arc<AlertCenter>,
        config: MonitorConfig,
    ) -> Self {
        AppointmentMonitor {
            store,
            alerts,
            config,
            active: Mutex::new(None),
        }
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<MonitorTask>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start monitoring for this user. Returns `false` without spawning
    /// anything when a loop for this monitor is already running, so every
    /// dashboard entry point can call it unconditionally.
    pub fn start(&self, user_id: &str, role: ParticipantRole) -> bool {
        let mut slot = self.active_slot();
        if let Some(task) = slot.as_ref() {
            if !*task.stop_tx.borrow() && !task.handle.is_finished() {
                debug!(target: "medilink::monitor", "Monitor already running; start ignored");
                return false;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.alerts),
            self.config.clone(),
            user_id.to_string(),
            role,
            stop_rx,
        ));
        *slot = Some(MonitorTask { stop_tx, handle });
        true
    }

    /// Ask the loop to stop. The returned handle resolves once the loop has
    /// actually exited; callers that do not care may drop it.
    pub fn stop(&self) -> Option<tokio::task::JoinHandle<()>> {
        let mut slot = self.active_slot();
        let task = slot.take()?;
        if !*task.stop_tx.borrow() {
            let _ = task.stop_tx.send(true);
            info!(target: "medilink::monitor", "Appointment monitor stop requested");
        }
        Some(task.handle)
    }

    pub fn is_running(&self) -> bool {
        let slot = self.active_slot();
        slot.as_ref()
            .map(|task| !*task.stop_tx.borrow() && !task.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for AppointmentMonitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

enum ScanOutcome {
    AlertFired,
    NothingDue,
    FetchFailed,
}

async fn monitor_loop(
    store: Arc<dyn AppointmentStore>,
    alerts: Arc<AlertCenter>,
    config: MonitorConfig,
    user_id: String,
    role: ParticipantRole,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(
        target: "medilink::monitor",
        user_id = %user_id,
        role = role.as_str(),
        poll_ms = config.poll_interval.as_millis() as u64,
        tolerance_ms = config.tolerance.as_millis() as u64,
        cooldown_ms = config.cooldown.as_millis() as u64,
        "Appointment monitor started"
    );

    while !*stop_rx.borrow() {
        let delay = match scan_once(store.as_ref(), &alerts, &config, &user_id, role).await {
            ScanOutcome::AlertFired => config.cooldown,
            ScanOutcome::NothingDue | ScanOutcome::FetchFailed => config.poll_interval,
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {}
        }
    }

    info!(target: "medilink::monitor", "Appointment monitor stopped");
}

async fn scan_once(
    store: &dyn AppointmentStore,
    alerts: &AlertCenter,
    config: &MonitorConfig,
    user_id: &str,
    role: ParticipantRole,
) -> ScanOutcome {
    let appointments = match store.appointments_for(user_id, role).await {
        Ok(list) => list,
        Err(e) => {
            warn!(
                target: "medilink::monitor",
                error = %e,
                "Appointment fetch failed; retrying next poll"
            );
            return ScanOutcome::FetchFailed;
        }
    };

    match find_due_appointment(&appointments, now_ms(), config.tolerance) {
        Some(due) => match alerts.post(due.id, user_id, role) {
            Ok(_) => {
                info!(
                    target: "medilink::monitor",
                    appointment_id = due.id,
                    "Due appointment found; consultation alert fired"
                );
                ScanOutcome::AlertFired
            }
            Err(e) => {
                warn!(target: "medilink::monitor", error = %e, "Alert post rejected");
                ScanOutcome::NothingDue
            }
        },
        None => ScanOutcome::NothingDue,
    }
}
