//! Error types for the MediLink clinic core

use thiserror::Error;

/// Result type alias for clinic operations
pub type ClinicResult<T> = Result<T, ClinicError>;

/// Errors that can occur across the consultation lifecycle
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Appointment {0} not found")]
    AppointmentNotFound(i64),

    #[error("Invalid appointment id: {0}")]
    InvalidAppointmentId(i64),

    #[error("Unknown appointment status: {0}")]
    UnknownStatus(String),

    #[error("Unknown participant role: {0}")]
    UnknownRole(String),

    #[error("Unknown notification kind: {0}")]
    UnknownKind(String),

    #[error("AI request failed: {0}")]
    Ai(String),

    #[error("AI response parse error: {0}")]
    AiResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for ClinicError {
    fn from(err: rusqlite::Error) -> Self {
        ClinicError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ClinicError {
    fn from(err: reqwest::Error) -> Self {
        ClinicError::Ai(err.to_string())
    }
}

impl From<serde_json::Error> for ClinicError {
    fn from(err: serde_json::Error) -> Self {
        ClinicError::AiResponse(err.to_string())
    }
}

impl From<toml::de::Error> for ClinicError {
    fn from(err: toml::de::Error) -> Self {
        ClinicError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ClinicError {
    fn from(err: toml::ser::Error) -> Self {
        ClinicError::Config(err.to_string())
    }
}
