//! Integration tests for the appointment monitor and alert pipeline,
//! driven by a scripted appointment store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use medilink_core::{
    AlertCenter, Appointment, AppointmentMonitor, AppointmentStatus, AppointmentStore,
    ClinicError, ClinicResult, MonitorConfig, ParticipantRole,
};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn appointment(id: i64, offset_ms: i64) -> Appointment {
    Appointment {
        id,
        doctor_id: "d-1".to_string(),
        patient_id: "p-1".to_string(),
        doctor_name: "Dr. Imani Okafor".to_string(),
        patient_name: "Rosa Delgado".to_string(),
        scheduled_at_ms: now_ms() + offset_ms,
        status: AppointmentStatus::Scheduled,
        chief_complaint: "Persistent cough".to_string(),
        created_at_ms: now_ms(),
    }
}

/// Appointment store with a switchable failure mode and a fetch counter.
struct ScriptedStore {
    appointments: Mutex<Vec<Appointment>>,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl ScriptedStore {
    fn new(appointments: Vec<Appointment>) -> Self {
        Self {
            appointments: Mutex::new(appointments),
            fail: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppointmentStore for ScriptedStore {
    async fn appointments_for(
        &self,
        _user_id: &str,
        _role: ParticipantRole,
    ) -> ClinicResult<Vec<Appointment>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClinicError::Storage("cache offline".to_string()));
        }
        Ok(self.appointments.lock().unwrap().clone())
    }

    async fn appointment(&self, id: i64) -> ClinicResult<Option<Appointment>> {
        Ok(self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn set_status(&self, id: i64, status: AppointmentStatus) -> ClinicResult<()> {
        let mut appointments = self.appointments.lock().unwrap();
        if let Some(a) = appointments.iter_mut().find(|a| a.id == id) {
            a.status = status;
        }
        Ok(())
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(50),
        tolerance: Duration::from_secs(60),
        cooldown: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_due_appointment_fires_alert_once_per_cooldown() {
    let store = Arc::new(ScriptedStore::new(vec![appointment(7, 0)]));
    let alerts = Arc::new(AlertCenter::new());
    let mut rx = alerts.subscribe();

    let monitor = AppointmentMonitor::new(store.clone(), alerts.clone(), fast_config());
    assert!(monitor.start("p-1", ParticipantRole::Patient));

    let alert = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("monitor never fired")
        .expect("alert channel closed");
    assert_eq!(alert.appointment_id, 7);
    assert_eq!(alert.title, "Consultation Starting");
    assert_eq!(
        alert.body,
        "Your appointment is scheduled for NOW. Tap to join."
    );
    assert!(alert.full_screen);
    assert_eq!(alert.ticket.user_id, "p-1");
    assert_eq!(alert.ticket.role, ParticipantRole::Patient);

    // Still inside the cooldown: the same due appointment must not re-fire.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(rx.try_recv().is_err(), "alert re-fired inside cooldown");
    assert_eq!(alerts.active_count(), 1);

    monitor.stop();
}

#[tokio::test]
async fn test_appointment_outside_window_stays_quiet() {
    let store = Arc::new(ScriptedStore::new(vec![appointment(9, 120_000)]));
    let alerts = Arc::new(AlertCenter::new());
    let mut rx = alerts.subscribe();

    let monitor = AppointmentMonitor::new(store.clone(), alerts, fast_config());
    monitor.start("p-1", ParticipantRole::Patient);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.fetch_count() >= 2);
    assert!(rx.try_recv().is_err());

    monitor.stop();
}

#[tokio::test]
async fn test_start_is_idempotent_until_stopped() {
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let alerts = Arc::new(AlertCenter::new());
    let monitor = AppointmentMonitor::new(store, alerts, fast_config());

    assert!(monitor.start("d-1", ParticipantRole::Doctor));
    assert!(!monitor.start("d-1", ParticipantRole::Doctor));
    assert!(monitor.is_running());

    let handle = monitor.stop().expect("active task");
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not exit")
        .expect("loop panicked");
    assert!(!monitor.is_running());

    // A stopped monitor can be started again.
    assert!(monitor.start("d-1", ParticipantRole::Doctor));
    monitor.stop();
}

#[tokio::test]
async fn test_fetch_failure_retries_then_recovers() {
    let store = Arc::new(ScriptedStore::new(vec![appointment(3, 10_000)]));
    store.set_failing(true);
    let alerts = Arc::new(AlertCenter::new());
    let mut rx = alerts.subscribe();

    let monitor = AppointmentMonitor::new(store.clone(), alerts, fast_config());
    monitor.start("p-1", ParticipantRole::Patient);

    // Failing fetches keep the loop polling without ever alerting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.fetch_count() >= 2, "monitor stopped polling on error");
    assert!(rx.try_recv().is_err());

    store.set_failing(false);
    let alert = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("monitor never recovered")
        .expect("alert channel closed");
    assert_eq!(alert.appointment_id, 3);

    monitor.stop();
}

#[tokio::test]
async fn test_stop_halts_polling() {
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let alerts = Arc::new(AlertCenter::new());
    let monitor = AppointmentMonitor::new(store.clone(), alerts, fast_config());

    monitor.start("p-1", ParticipantRole::Patient);
    tokio::time::sleep(Duration::from_millis(120)).await;
    let handle = monitor.stop().expect("active task");
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not exit")
        .expect("loop panicked");

    let settled = store.fetch_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.fetch_count(), settled, "loop kept polling after stop");
}
