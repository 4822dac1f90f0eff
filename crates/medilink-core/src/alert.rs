//! Consultation alerts: the full-screen "your consultation is starting"
//! surface.
//!
//! One alert slot per appointment id, so a monitor that re-fires while an
//! appointment is still inside its window replaces the posted alert instead
//! of stacking duplicates. Subscribers get alerts over a broadcast channel
//! in post order.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{ClinicError, ClinicResult};
use crate::model::{ParticipantRole, SessionTicket};

/// Capacity of the alert broadcast channel.
const ALERT_CHANNEL_CAPACITY: usize = 64;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Delivery channel descriptor, registered once per process. Platform shells
/// map this onto their native notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannelSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Heads-up priority.
    pub high_importance: bool,
    /// Consultation calls ring through do-not-disturb.
    pub bypass_dnd: bool,
    /// Visible on the lock screen.
    pub visibility_public: bool,
}

impl Default for AlertChannelSpec {
    fn default() -> Self {
        AlertChannelSpec {
            id: "consultation_channel".to_string(),
            name: "Consultation Calls".to_string(),
            description: "Incoming consultation alerts".to_string(),
            high_importance: true,
            bypass_dnd: true,
            visibility_public: true,
        }
    }
}

/// One posted consultation alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationAlert {
    pub appointment_id: i64,
    pub title: String,
    pub body: String,
    /// Pops over whatever the user is doing.
    pub full_screen: bool,
    pub action_label: String,
    /// Everything a client needs to land in the right session.
    pub ticket: SessionTicket,
    pub posted_at_ms: i64,
}

/// Posts consultation alerts and hands them to subscribers in post order.
pub struct AlertCenter {
    channel_registered: AtomicBool,
    slots: DashMap<i64, ConsultationAlert>,
    alert_tx: broadcast::Sender<ConsultationAlert>,
}

impl AlertCenter {
    pub fn new() -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        AlertCenter {
            channel_registered: AtomicBool::new(false),
            slots: DashMap::new(),
            alert_tx,
        }
    }

    /// Ensure the delivery channel exists. Safe to call from every entry
    /// point; only the first call does anything. Returns whether this call
    /// was the one that registered it.
    pub fn register_channel(&self) -> bool {
        let first = self
            .channel_registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            let spec = AlertChannelSpec::default();
            info!(
                target: "medilink::alert",
                channel = %spec.id,
                "Alert channel registered"
            );
        }
        first
    }

    /// Post the consultation alert for an appointment. Re-posting for the
    /// same id overwrites the slot. Id 0 has no stable slot key and is
    /// rejected.
    pub fn post(
        &self,
        appointment_id: i64,
        user_id: &str,
        role: ParticipantRole,
    ) -> ClinicResult<ConsultationAlert> {
        if appointment_id == 0 {
            return Err(ClinicError::InvalidAppointmentId(0));
        }
        self.register_channel();

        let alert = ConsultationAlert {
            appointment_id,
            title: "Consultation Starting".to_string(),
            body: "Your appointment is scheduled for NOW. Tap to join.".to_string(),
            full_screen: true,
            action_label: "Join Now".to_string(),
            ticket: SessionTicket {
                appointment_id,
                user_id: user_id.to_string(),
                role,
            },
            posted_at_ms: now_ms(),
        };

        let replaced = self.slots.insert(appointment_id, alert.clone()).is_some();
        let _ = self.alert_tx.send(alert.clone());
        if replaced {
            debug!(target: "medilink::alert", appointment_id, "Consultation alert re-posted");
        } else {
            info!(
                target: "medilink::alert",
                appointment_id,
                role = role.as_str(),
                "Consultation alert posted"
            );
        }
        Ok(alert)
    }

    /// Current slot occupant for an appointment, if any.
    pub fn posted(&self, appointment_id: i64) -> Option<ConsultationAlert> {
        self.slots.get(&appointment_id).map(|a| a.clone())
    }

    /// Clear the slot (user tapped or dismissed). Returns whether an alert
    /// was there.
    pub fn dismiss(&self, appointment_id: i64) -> bool {
        self.slots.remove(&appointment_id).is_some()
    }

    /// Number of alerts currently posted.
    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    /// New alerts, in post order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsultationAlert> {
        self.alert_tx.subscribe()
    }
}

impl Default for AlertCenter {
    fn default() -> Self {
        Self::new()
    }
}
