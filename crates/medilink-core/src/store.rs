//! Seam between the monitor/session layer and whatever holds appointments.
//!
//! The monitor and the session driver only see this trait. In-process the
//! backing store is the local SQLite cache; a remote deployment can swap in
//! an HTTP-backed implementation without touching either loop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ClinicError, ClinicResult};
use crate::model::{Appointment, AppointmentStatus, ParticipantRole};
use crate::storage::ClinicStorage;

/// Backing service for appointments.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// All appointments where the user is on the given side, soonest first.
    async fn appointments_for(
        &self,
        user_id: &str,
        role: ParticipantRole,
    ) -> ClinicResult<Vec<Appointment>>;

    async fn appointment(&self, id: i64) -> ClinicResult<Option<Appointment>>;

    /// Overwrite the stored status.
    async fn set_status(&self, id: i64, status: AppointmentStatus) -> ClinicResult<()>;
}

/// [`AppointmentStore`] over the local SQLite cache. Queries run on the
/// blocking pool so the poll loop never parks an executor thread on disk IO.
pub struct SqliteAppointmentStore {
    storage: Arc<ClinicStorage>,
}

impl SqliteAppointmentStore {
    pub fn new(storage: Arc<ClinicStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AppointmentStore for SqliteAppointmentStore {
    async fn appointments_for(
        &self,
        user_id: &str,
        role: ParticipantRole,
    ) -> ClinicResult<Vec<Appointment>> {
        let storage = Arc::clone(&self.storage);
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || storage.list_appointments_for(&user_id, role))
            .await
            .map_err(|e| ClinicError::Storage(e.to_string()))?
            .map_err(ClinicError::from)
    }

    async fn appointment(&self, id: i64) -> ClinicResult<Option<Appointment>> {
        if id == 0 {
            return Err(ClinicError::InvalidAppointmentId(0));
        }
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || storage.get_appointment(id))
            .await
            .map_err(|e| ClinicError::Storage(e.to_string()))?
            .map_err(ClinicError::from)
    }

    async fn set_status(&self, id: i64, status: AppointmentStatus) -> ClinicResult<()> {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || storage.update_appointment_status(id, status))
            .await
            .map_err(|e| ClinicError::Storage(e.to_string()))?
            .map_err(ClinicError::from)
    }
}
