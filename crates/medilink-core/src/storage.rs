//! Clinic cache storage: appointments, notifications, consultation sessions.
//!
//! One embedded SQLite file (`data/medilink/clinic.sqlite` by default) shared
//! by every surface. Booking fans out its confirmation notifications here so
//! callers cannot forget them.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::model::{Appointment, AppointmentStatus, NotificationKind, ParticipantRole};

/// One row in the `notifications` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    /// Appointment or prescription the notification points at, if any.
    pub related_id: Option<i64>,
    pub is_read: bool,
    pub created_at_ms: i64,
}

/// One row in the `consultation_sessions` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsultationSessionRow {
    pub id: String,
    pub appointment_id: i64,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub duration_secs: Option<i64>,
    pub full_transcript: Option<String>,
    pub created_at_ms: i64,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn row_to_appointment(r: &rusqlite::Row<'_>) -> Result<Appointment, rusqlite::Error> {
    let status_raw: String = r.get(6)?;
    let status = AppointmentStatus::parse(&status_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Appointment {
        id: r.get(0)?,
        doctor_id: r.get(1)?,
        patient_id: r.get(2)?,
        doctor_name: r.get(3)?,
        patient_name: r.get(4)?,
        scheduled_at_ms: r.get(5)?,
        status,
        chief_complaint: r.get(7)?,
        created_at_ms: r.get(8)?,
    })
}

fn row_to_notification(r: &rusqlite::Row<'_>) -> Result<NotificationRow, rusqlite::Error> {
    let role_raw: String = r.get(2)?;
    let role = ParticipantRole::parse(&role_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let kind_raw: String = r.get(5)?;
    let kind = NotificationKind::parse(&kind_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(NotificationRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        role,
        title: r.get(3)?,
        body: r.get(4)?,
        kind,
        related_id: r.get(6)?,
        is_read: r.get(7)?,
        created_at_ms: r.get(8)?,
    })
}

fn row_to_session(r: &rusqlite::Row<'_>) -> Result<ConsultationSessionRow, rusqlite::Error> {
    Ok(ConsultationSessionRow {
        id: r.get(0)?,
        appointment_id: r.get(1)?,
        started_at_ms: r.get(2)?,
        ended_at_ms: r.get(3)?,
        duration_secs: r.get(4)?,
        full_transcript: r.get(5)?,
        created_at_ms: r.get(6)?,
    })
}

/// Storage for the clinic cache (appointments DB).
pub struct ClinicStorage {
    db_path: PathBuf,
}

impl ClinicStorage {
    /// Open or create the clinic DB and ensure all tables exist.
    pub fn new(db_path: PathBuf) -> Result<Self, rusqlite::Error> {
        let this = Self { db_path };
        this.init()?;
        Ok(this)
    }

    /// Default path: MEDILINK_STORAGE_PATH or ./data, then medilink/clinic.sqlite.
    pub fn default_path() -> PathBuf {
        let base = std::env::var("MEDILINK_STORAGE_PATH").unwrap_or_else(|_| "./data".to_string());
        PathBuf::from(base).join("medilink").join("clinic.sqlite")
    }

    /// Open storage at the default clinic path.
    pub fn open_default() -> Result<Self, rusqlite::Error> {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        Ok(conn)
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doctor_id TEXT NOT NULL,
                patient_id TEXT NOT NULL,
                doctor_name TEXT NOT NULL,
                patient_name TEXT NOT NULL,
                scheduled_at_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                chief_complaint TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_appointments_doctor_id ON appointments(doctor_id);
            CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments(patient_id);
            CREATE INDEX IF NOT EXISTS idx_appointments_scheduled_at ON appointments(scheduled_at_ms);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                related_id INTEGER NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id);

            CREATE TABLE IF NOT EXISTS consultation_sessions (
                id TEXT PRIMARY KEY,
                appointment_id INTEGER NOT NULL,
                started_at_ms INTEGER NOT NULL,
                ended_at_ms INTEGER NULL,
                duration_secs INTEGER NULL,
                full_transcript TEXT NULL,
                created_at_ms INTEGER NOT NULL,
                FOREIGN KEY(appointment_id) REFERENCES appointments(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_consultation_sessions_appointment_id ON consultation_sessions(appointment_id);
            "#,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Appointments
    // -----------------------------------------------------------------------

    /// Book an appointment and fan out the confirmation notifications: one
    /// to the doctor, one to the patient. Returns the stored row.
    #[allow(clippy::too_many_arguments)]
    pub fn book_appointment(
        &self,
        doctor_id: &str,
        doctor_name: &str,
        patient_id: &str,
        patient_name: &str,
        scheduled_at_ms: i64,
        chief_complaint: &str,
    ) -> Result<Appointment, rusqlite::Error> {
        let ts = now_ms();
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO appointments (doctor_id, patient_id, doctor_name, patient_name, scheduled_at_ms, status, chief_complaint, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                doctor_id,
                patient_id,
                doctor_name.trim(),
                patient_name.trim(),
                scheduled_at_ms,
                AppointmentStatus::Scheduled.as_str(),
                chief_complaint.trim(),
                ts
            ],
        )?;
        let id = conn.last_insert_rowid();

        self.insert_notification_with(
            &conn,
            doctor_id,
            ParticipantRole::Doctor,
            "New Appointment",
            &format!("New appointment with {}", patient_name.trim()),
            NotificationKind::AppointmentConfirmed,
            Some(id),
        )?;
        self.insert_notification_with(
            &conn,
            patient_id,
            ParticipantRole::Patient,
            "Appointment Confirmed",
            &format!("Your appointment with {} is confirmed", doctor_name.trim()),
            NotificationKind::AppointmentConfirmed,
            Some(id),
        )?;

        Ok(Appointment {
            id,
            doctor_id: doctor_id.to_string(),
            patient_id: patient_id.to_string(),
            doctor_name: doctor_name.trim().to_string(),
            patient_name: patient_name.trim().to_string(),
            scheduled_at_ms,
            status: AppointmentStatus::Scheduled,
            chief_complaint: chief_complaint.trim().to_string(),
            created_at_ms: ts,
        })
    }

    /// Get appointment by id.
    pub fn get_appointment(&self, id: i64) -> Result<Option<Appointment>, rusqlite::Error> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, doctor_id, patient_id, doctor_name, patient_name, scheduled_at_ms, status, chief_complaint, created_at_ms
                 FROM appointments WHERE id = ?1",
                params![id],
                row_to_appointment,
            )
            .optional()?;
        Ok(row)
    }

    /// List appointments where the user is on the given side, soonest first.
    pub fn list_appointments_for(
        &self,
        user_id: &str,
        role: ParticipantRole,
    ) -> Result<Vec<Appointment>, rusqlite::Error> {
        let conn = self.open()?;
        let sql = match role {
            ParticipantRole::Doctor => {
                "SELECT id, doctor_id, patient_id, doctor_name, patient_name, scheduled_at_ms, status, chief_complaint, created_at_ms
                 FROM appointments WHERE doctor_id = ?1 ORDER BY scheduled_at_ms ASC"
            }
            ParticipantRole::Patient => {
                "SELECT id, doctor_id, patient_id, doctor_name, patient_name, scheduled_at_ms, status, chief_complaint, created_at_ms
                 FROM appointments WHERE patient_id = ?1 ORDER BY scheduled_at_ms ASC"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![user_id], row_to_appointment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Overwrite the stored status.
    pub fn update_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE appointments SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    fn insert_notification_with(
        &self,
        conn: &Connection,
        user_id: &str,
        role: ParticipantRole,
        title: &str,
        body: &str,
        kind: NotificationKind,
        related_id: Option<i64>,
    ) -> Result<NotificationRow, rusqlite::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now_ms();
        conn.execute(
            r#"
            INSERT INTO notifications (id, user_id, role, title, body, kind, related_id, is_read, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
            params![id, user_id, role.as_str(), title, body, kind.as_str(), related_id, ts],
        )?;
        Ok(NotificationRow {
            id,
            user_id: user_id.to_string(),
            role,
            title: title.to_string(),
            body: body.to_string(),
            kind,
            related_id,
            is_read: false,
            created_at_ms: ts,
        })
    }

    /// Insert a notification row for a user.
    pub fn insert_notification(
        &self,
        user_id: &str,
        role: ParticipantRole,
        title: &str,
        body: &str,
        kind: NotificationKind,
        related_id: Option<i64>,
    ) -> Result<NotificationRow, rusqlite::Error> {
        let conn = self.open()?;
        self.insert_notification_with(&conn, user_id, role, title, body, kind, related_id)
    }

    /// List a user's notifications, newest first.
    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, role, title, body, kind, related_id, is_read, created_at_ms
             FROM notifications WHERE user_id = ?1 ORDER BY created_at_ms DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count of unread notifications for a user.
    pub fn unread_count(&self, user_id: &str) -> Result<i64, rusqlite::Error> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |r| r.get(0),
        )
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_all_read(&self, user_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consultation sessions
    // -----------------------------------------------------------------------

    /// Open a consultation session row for an appointment.
    pub fn start_session(
        &self,
        appointment_id: i64,
    ) -> Result<ConsultationSessionRow, rusqlite::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now_ms();
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO consultation_sessions (id, appointment_id, started_at_ms, ended_at_ms, duration_secs, full_transcript, created_at_ms)
            VALUES (?1, ?2, ?3, NULL, NULL, NULL, ?4)
            "#,
            params![id, appointment_id, ts, ts],
        )?;
        Ok(ConsultationSessionRow {
            id,
            appointment_id,
            started_at_ms: ts,
            ended_at_ms: None,
            duration_secs: None,
            full_transcript: None,
            created_at_ms: ts,
        })
    }

    /// Close a session: stamp the end time, derive the duration from the
    /// stored start, and keep the final transcript.
    pub fn end_session(&self, session_id: &str, transcript: &str) -> Result<(), rusqlite::Error> {
        let ts = now_ms();
        let conn = self.open()?;
        conn.execute(
            "UPDATE consultation_sessions
             SET ended_at_ms = ?1, duration_secs = (?1 - started_at_ms) / 1000, full_transcript = ?2
             WHERE id = ?3",
            params![ts, transcript.trim(), session_id],
        )?;
        Ok(())
    }

    /// Get session by id.
    pub fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ConsultationSessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, appointment_id, started_at_ms, ended_at_ms, duration_secs, full_transcript, created_at_ms
                 FROM consultation_sessions WHERE id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(row)
    }

    /// List sessions recorded for an appointment, oldest first.
    pub fn list_sessions_for_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Vec<ConsultationSessionRow>, rusqlite::Error> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, appointment_id, started_at_ms, ended_at_ms, duration_secs, full_transcript, created_at_ms
             FROM consultation_sessions WHERE appointment_id = ?1 ORDER BY started_at_ms ASC",
        )?;
        let rows = stmt
            .query_map(params![appointment_id], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
