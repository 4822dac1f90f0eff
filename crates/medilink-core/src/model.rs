//! Shared domain types for the consultation lifecycle.
//!
//! Everything here is plain data: appointments and their status machine,
//! the two participant roles, and the JSON shapes exchanged with the AI
//! bridge. Timestamps are epoch milliseconds throughout.

use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, ClinicResult};

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

/// Appointment lifecycle status. Stored and serialized in SCREAMING_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> ClinicResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "SCHEDULED" => Ok(AppointmentStatus::Scheduled),
            "IN_PROGRESS" => Ok(AppointmentStatus::InProgress),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            "NO_SHOW" => Ok(AppointmentStatus::NoShow),
            other => Err(ClinicError::UnknownStatus(other.to_string())),
        }
    }
}

/// One booked appointment between a doctor and a patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Non-zero row id. Id 0 is the "missing" sentinel and is rejected at
    /// every entry point that takes an appointment id.
    pub id: i64,
    pub doctor_id: String,
    pub patient_id: String,
    pub doctor_name: String,
    pub patient_name: String,
    /// Scheduled start, epoch millis.
    pub scheduled_at_ms: i64,
    pub status: AppointmentStatus,
    /// Patient-entered reason for the visit.
    pub chief_complaint: String,
    pub created_at_ms: i64,
}

impl Appointment {
    /// Id of the party on the given side.
    pub fn party_id(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Doctor => &self.doctor_id,
            ParticipantRole::Patient => &self.patient_id,
        }
    }

    /// Display name of the party on the given side.
    pub fn party_name(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Doctor => &self.doctor_name,
            ParticipantRole::Patient => &self.patient_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Which side of the consultation a user is on.
///
/// This is a closed set: every caller is one or the other, and code that
/// branches on role must handle both arms. Serialized as `DOCTOR`/`PATIENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Doctor,
    Patient,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Doctor => "DOCTOR",
            ParticipantRole::Patient => "PATIENT",
        }
    }

    pub fn parse(s: &str) -> ClinicResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "DOCTOR" => Ok(ParticipantRole::Doctor),
            "PATIENT" => Ok(ParticipantRole::Patient),
            other => Err(ClinicError::UnknownRole(other.to_string())),
        }
    }

    /// Prefix attached to every transcript line spoken by this role.
    pub fn transcript_prefix(&self) -> &'static str {
        match self {
            ParticipantRole::Doctor => "Dr:",
            ParticipantRole::Patient => "Pt:",
        }
    }

    /// The other side of the consultation.
    pub fn counterpart(&self) -> ParticipantRole {
        match self {
            ParticipantRole::Doctor => ParticipantRole::Patient,
            ParticipantRole::Patient => ParticipantRole::Doctor,
        }
    }
}

/// Payload carried by a consultation alert so a client can rejoin the right
/// session straight from the notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    pub appointment_id: i64,
    pub user_id: String,
    pub role: ParticipantRole,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// In-app notification category. Stored in SCREAMING_CASE alongside the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    AppointmentReminder,
    AppointmentConfirmed,
    AppointmentCancelled,
    PrescriptionReady,
    MessageReceived,
    LabResultReady,
    Emergency,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AppointmentReminder => "APPOINTMENT_REMINDER",
            NotificationKind::AppointmentConfirmed => "APPOINTMENT_CONFIRMED",
            NotificationKind::AppointmentCancelled => "APPOINTMENT_CANCELLED",
            NotificationKind::PrescriptionReady => "PRESCRIPTION_READY",
            NotificationKind::MessageReceived => "MESSAGE_RECEIVED",
            NotificationKind::LabResultReady => "LAB_RESULT_READY",
            NotificationKind::Emergency => "EMERGENCY",
            NotificationKind::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> ClinicResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "APPOINTMENT_REMINDER" => Ok(NotificationKind::AppointmentReminder),
            "APPOINTMENT_CONFIRMED" => Ok(NotificationKind::AppointmentConfirmed),
            "APPOINTMENT_CANCELLED" => Ok(NotificationKind::AppointmentCancelled),
            "PRESCRIPTION_READY" => Ok(NotificationKind::PrescriptionReady),
            "MESSAGE_RECEIVED" => Ok(NotificationKind::MessageReceived),
            "LAB_RESULT_READY" => Ok(NotificationKind::LabResultReady),
            "EMERGENCY" => Ok(NotificationKind::Emergency),
            "INFO" => Ok(NotificationKind::Info),
            other => Err(ClinicError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// AI response shapes
// ---------------------------------------------------------------------------

/// Clinical severity estimate. Serialized UPPERCASE to match the prompt
/// contract (`LOW`/`NORMAL`/`HIGH`/`CRITICAL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Normal
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Normal => "NORMAL",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// One AI-generated view of an in-progress consultation.
///
/// Snapshots are regenerated wholesale from the full transcript; a newer
/// snapshot always supersedes the previous one, and a failed regeneration
/// leaves the previous one in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsightSnapshot {
    pub severity: Severity,
    pub detected_symptoms: Vec<String>,
    pub red_flags: Vec<String>,
    pub suggested_questions: Vec<String>,
    pub preliminary_diagnosis: String,
}

/// Structured extraction of a finished consultation, feeding the
/// prescription workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MedicalExtraction {
    /// Comma-separated symptom list as dictated.
    pub symptoms: String,
    pub diagnosis: String,
    pub severity: Severity,
    pub medications: Vec<MedicationInfo>,
    pub lab_tests: Vec<String>,
    pub instructions: String,
    pub follow_up_days: Option<u32>,
}

impl MedicalExtraction {
    /// Canonical shape for a blank transcript. The caller gets something
    /// displayable instead of an error.
    pub fn empty() -> Self {
        MedicalExtraction {
            symptoms: "No symptoms recorded".to_string(),
            diagnosis: "Consultation incomplete".to_string(),
            severity: Severity::Normal,
            medications: Vec::new(),
            lab_tests: Vec::new(),
            instructions: "Please complete consultation".to_string(),
            follow_up_days: None,
        }
    }

    /// Canonical shape when the bridge call or the JSON parse fails. Flags
    /// the record for a human instead of dropping the consultation.
    pub fn manual_review(reason: &str) -> Self {
        MedicalExtraction {
            symptoms: "Error processing consultation".to_string(),
            diagnosis: format!("Manual review required: {}", reason),
            severity: Severity::Normal,
            medications: Vec::new(),
            lab_tests: Vec::new(),
            instructions: "Manual review required".to_string(),
            follow_up_days: Some(7),
        }
    }
}

/// One prescribed medication inside a [`MedicalExtraction`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicationInfo {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub timing: String,
    pub instructions: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(AppointmentStatus::parse("PENDING").is_err());
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!(
            ParticipantRole::parse("doctor").unwrap(),
            ParticipantRole::Doctor
        );
        assert_eq!(
            ParticipantRole::parse(" PATIENT ").unwrap(),
            ParticipantRole::Patient
        );
        assert!(ParticipantRole::parse("nurse").is_err());
    }

    #[test]
    fn test_role_prefix_and_counterpart() {
        assert_eq!(ParticipantRole::Doctor.transcript_prefix(), "Dr:");
        assert_eq!(ParticipantRole::Patient.transcript_prefix(), "Pt:");
        assert_eq!(
            ParticipantRole::Doctor.counterpart(),
            ParticipantRole::Patient
        );
        assert_eq!(
            ParticipantRole::Patient.counterpart(),
            ParticipantRole::Doctor
        );
    }

    #[test]
    fn test_insight_snapshot_parses_camel_case() {
        let json = r#"{
            "severity": "HIGH",
            "detectedSymptoms": ["chest pain", "shortness of breath"],
            "redFlags": ["radiating pain"],
            "suggestedQuestions": ["When did the pain start?"],
            "preliminaryDiagnosis": "Possible angina"
        }"#;
        let snapshot: InsightSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.severity, Severity::High);
        assert_eq!(snapshot.detected_symptoms.len(), 2);
        assert_eq!(snapshot.red_flags, vec!["radiating pain"]);
        assert_eq!(snapshot.preliminary_diagnosis, "Possible angina");
    }

    #[test]
    fn test_insight_snapshot_missing_fields_default() {
        let snapshot: InsightSnapshot = serde_json::from_str(r#"{"severity": "LOW"}"#).unwrap();
        assert_eq!(snapshot.severity, Severity::Low);
        assert!(snapshot.detected_symptoms.is_empty());
        assert!(snapshot.preliminary_diagnosis.is_empty());
    }

    #[test]
    fn test_extraction_parses_full_payload() {
        let json = r#"{
            "symptoms": "cough, fever",
            "diagnosis": "Upper respiratory infection",
            "severity": "NORMAL",
            "medications": [{"name": "Amoxicillin", "dosage": "500mg", "frequency": "3x daily", "duration": "7 days", "timing": "after meals", "instructions": "finish the course"}],
            "labTests": ["CBC"],
            "instructions": "Rest and fluids",
            "followUpDays": 7
        }"#;
        let extraction: MedicalExtraction = serde_json::from_str(json).unwrap();
        assert_eq!(extraction.medications.len(), 1);
        assert_eq!(extraction.medications[0].name, "Amoxicillin");
        assert_eq!(extraction.lab_tests, vec!["CBC"]);
        assert_eq!(extraction.follow_up_days, Some(7));
    }

    #[test]
    fn test_extraction_canonical_shapes() {
        let empty = MedicalExtraction::empty();
        assert_eq!(empty.symptoms, "No symptoms recorded");
        assert_eq!(empty.diagnosis, "Consultation incomplete");
        assert!(empty.follow_up_days.is_none());

        let review = MedicalExtraction::manual_review("timeout");
        assert_eq!(review.diagnosis, "Manual review required: timeout");
        assert_eq!(review.instructions, "Manual review required");
        assert_eq!(review.follow_up_days, Some(7));
    }
}
