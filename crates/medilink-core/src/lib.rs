//! medilink-core: clinic core library (shared domain types, appointment
//! monitor, consultation alerts, SQLite cache, AI insight bridge).
//!
//! Re-exports everything the voice and consult crates need so they keep a
//! consistent public API.

mod ai;
mod alert;
mod config;
mod error;
mod insights;
mod model;
mod monitor;
mod storage;
mod store;

// Shared domain types
pub use model::{
    Appointment, AppointmentStatus, InsightSnapshot, MedicalExtraction, MedicationInfo,
    NotificationKind, ParticipantRole, SessionTicket, Severity,
};

// Errors
pub use error::{ClinicError, ClinicResult};

// Configuration (env-tunable timing knobs + medilink.toml AI settings)
pub use config::{AiSettings, InsightConfig, MonitorConfig, SessionConfig};

// Local relational cache (appointments, notifications, session archive)
pub use storage::{ClinicStorage, ConsultationSessionRow, NotificationRow};

// Async appointment access for the monitor and session layers
pub use store::{AppointmentStore, SqliteAppointmentStore};

// Appointment monitor + full-screen consultation alerts
pub use alert::{AlertCenter, AlertChannelSpec, ConsultationAlert};
pub use monitor::{find_due_appointment, AppointmentMonitor};

// OpenRouter bridge + live insight refresh policy
pub use ai::{InsightBridge, InsightSource, PlaceholderInsights};
pub use insights::{InsightEngine, RefreshOutcome};
