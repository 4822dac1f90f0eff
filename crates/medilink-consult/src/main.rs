//! MediLink CLI: end-to-end consultation demo against a local clinic DB.
//!
//! Usage:
//!   cargo run -p medilink-consult -- --simulate
//!   cargo run -p medilink-consult -- --no-show
//!
//! --simulate books an appointment for right now, lets the monitor raise the
//! full-screen call alert, runs a scripted doctor/patient consultation with
//! live insight refreshes, and writes a summary .md next to the clinic DB.
//! --no-show joins the patient alone and watches the no-show window cancel
//! the appointment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use medilink_consult::{
    ConsultationRoom, LiveSession, MemoryPresenceStore, PresenceStore, RoomConfig, RoomEvent,
    SessionEvent,
};
use medilink_core::{
    AlertCenter, AppointmentMonitor, AppointmentStore, ClinicStorage, InsightBridge, InsightConfig,
    InsightSource, MonitorConfig, ParticipantRole, PlaceholderInsights, SessionConfig,
    SqliteAppointmentStore,
};
use medilink_voice::{ScriptedRecognizer, SilentSynthesizer, SpeechSynthesizer};

const DOCTOR_LINES: [&str; 3] = [
    "Good morning Rosa, what brings you in today?",
    "Any shortness of breath or chest pain?",
    "I will order a chest X-ray and start you on amoxicillin for five days.",
];

const PATIENT_LINES: [&str; 2] = [
    "I have had a persistent cough for two weeks and a mild fever at night.",
    "Some tightness when I climb stairs, but no sharp pain.",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--simulate") => run_simulation().await,
        Some("--no-show") => run_no_show().await,
        _ => {
            eprintln!("MediLink — Consultation Demo");
            eprintln!("  --simulate    Book an appointment for NOW, fire the call alert, run a");
            eprintln!("                scripted consultation with live insights, write a summary .md");
            eprintln!("  --no-show     Book an appointment, join the patient alone, and watch the");
            eprintln!("                no-show window cancel it");
            eprintln!();
            eprintln!("Requires MEDILINK_AI_API_KEY or medilink.toml for live insights (else placeholder).");
            eprintln!("Clinic DB: MEDILINK_STORAGE_PATH or ./data → medilink/clinic.sqlite");
            Ok(())
        }
    }
}

async fn run_simulation() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let storage = Arc::new(ClinicStorage::open_default()?);
    let appointments: Arc<dyn AppointmentStore> =
        Arc::new(SqliteAppointmentStore::new(Arc::clone(&storage)));

    let now_ms = chrono::Utc::now().timestamp_millis();
    let appointment = storage.book_appointment(
        "dr-okafor",
        "Dr. Imani Okafor",
        "pt-delgado",
        "Rosa Delgado",
        now_ms,
        "Persistent cough and mild fever",
    )?;
    let inbox = storage.list_notifications(&appointment.patient_id)?;
    info!(
        "MediLink: appointment {} booked for NOW, patient inbox has {} notification(s)",
        appointment.id,
        inbox.len()
    );

    // Let the monitor discover the due slot and raise the call alert.
    let alerts = Arc::new(AlertCenter::new());
    alerts.register_channel();
    let mut alert_rx = alerts.subscribe();
    let monitor = AppointmentMonitor::new(
        Arc::clone(&appointments),
        Arc::clone(&alerts),
        MonitorConfig {
            poll_interval: Duration::from_millis(500),
            ..MonitorConfig::default()
        },
    );
    monitor.start(&appointment.patient_id, ParticipantRole::Patient);
    let alert = tokio::time::timeout(Duration::from_secs(10), alert_rx.recv()).await??;
    info!("MediLink: alert \"{}\" — {}", alert.title, alert.body);
    if let Some(handle) = monitor.stop() {
        let _ = handle.await;
    }

    // Both parties open the room the alert's ticket names. On a reused DB an
    // older still-scheduled slot can out-rank the fresh booking.
    let live_id = alert.ticket.appointment_id;

    let bridge = InsightBridge::from_settings().map(Arc::new);
    let doctor_insights: Arc<dyn InsightSource> = match &bridge {
        Some(b) => {
            info!("MediLink: live insights via {}", b.model());
            Arc::clone(b) as Arc<dyn InsightSource>
        }
        None => {
            info!("MediLink: no API key, using placeholder insights");
            Arc::new(PlaceholderInsights::new())
        }
    };

    let session_config = SessionConfig::default();
    let presence: Arc<dyn PresenceStore> =
        Arc::new(MemoryPresenceStore::new(session_config.presence_ttl));

    // The patient answered the alert; the doctor follows and the room goes live.
    let mut patient_room = ConsultationRoom::open(
        Arc::clone(&appointments),
        Arc::clone(&presence),
        Arc::new(
            ScriptedRecognizer::say(&PATIENT_LINES).with_step_delay(Duration::from_millis(250)),
        ),
        Arc::new(PlaceholderInsights::new()),
        None,
        live_id,
        ParticipantRole::Patient,
        RoomConfig {
            session: session_config.clone(),
            ..RoomConfig::default()
        },
    )
    .await?;

    let mut doctor_room = ConsultationRoom::open(
        Arc::clone(&appointments),
        Arc::clone(&presence),
        Arc::new(
            ScriptedRecognizer::say(&DOCTOR_LINES).with_step_delay(Duration::from_millis(150)),
        ),
        doctor_insights,
        Some(Arc::clone(&storage)),
        live_id,
        ParticipantRole::Doctor,
        RoomConfig {
            session: session_config,
            insights: InsightConfig {
                min_transcript_chars: 10,
                growth_trigger_chars: 40,
            },
            ..RoomConfig::default()
        },
    )
    .await?;

    let mut doctor_events = doctor_room
        .take_event_receiver()
        .ok_or("room events already taken")?;
    let event_log = tokio::spawn(async move {
        while let Some(event) = doctor_events.recv().await {
            match event {
                RoomEvent::Session(SessionEvent::WentLive { .. }) => {
                    info!("MediLink: both parties present, consultation live");
                }
                RoomEvent::Session(SessionEvent::PhaseChanged { phase }) => {
                    info!("MediLink: phase -> {}", phase.as_str());
                }
                RoomEvent::Insights(snapshot) => {
                    info!(
                        "MediLink: insights refreshed, severity {} ({} symptom(s))",
                        snapshot.severity.as_str(),
                        snapshot.detected_symptoms.len()
                    );
                }
                _ => {}
            }
        }
    });

    // Wait until every scripted line has landed in the shared transcript.
    let total_lines = DOCTOR_LINES.len() + PATIENT_LINES.len();
    let mut transcript_rx = doctor_room.transcript_watch();
    let _ = tokio::time::timeout(Duration::from_secs(15), async {
        while transcript_rx.borrow_and_update().lines().count() < total_lines {
            if transcript_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;

    let outcome = doctor_room.refresh_insights().await;
    info!("MediLink: final insight refresh -> {:?}", outcome);

    if let Some(bridge) = &bridge {
        let answer = bridge.layman_explanation("What does amoxicillin do?").await;
        let synth = SilentSynthesizer;
        synth.speak(&answer)?;
        info!("MediLink: patient assistant spoke: {}", answer);
    } else {
        info!("MediLink: no API key, skipping patient assistant");
    }

    let patient_phase = patient_room.close().await;
    let doctor_phase = doctor_room.close().await;
    let _ = event_log.await;
    info!(
        "MediLink: patient left ({}), doctor closed ({})",
        patient_phase.as_str(),
        doctor_phase.as_str()
    );

    let transcript = doctor_room.transcript();
    let insights_md = match doctor_room.insights() {
        Some(snapshot) => serde_json::to_string_pretty(&snapshot)?,
        None => "(no insights captured)".to_string(),
    };
    let summary_md = format!(
        "# Consultation — {} / {}\n\n*Held: {}*\n\n**Chief complaint:** {}\n\n## Transcript\n\n{}\n\n## AI Insights\n\n```json\n{}\n```\n",
        appointment.doctor_name,
        appointment.patient_name,
        chrono::Local::now().format("%Y-%m-%d %H:%M"),
        appointment.chief_complaint,
        if transcript.is_empty() { "(no speech captured)" } else { transcript.as_str() },
        insights_md,
    );
    let path = summary_path(&storage, live_id);
    std::fs::write(&path, &summary_md)?;
    info!("MediLink: summary written to {}", path.display());

    if let Some(row) = storage.list_sessions_for_appointment(live_id)?.first() {
        info!(
            "MediLink: session {} recorded, {}s",
            row.id,
            row.duration_secs.unwrap_or(0)
        );
    }

    info!("MediLink: done. Appointment id = {}", live_id);
    Ok(())
}

async fn run_no_show() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let storage = Arc::new(ClinicStorage::open_default()?);
    let appointments: Arc<dyn AppointmentStore> =
        Arc::new(SqliteAppointmentStore::new(Arc::clone(&storage)));

    let now_ms = chrono::Utc::now().timestamp_millis();
    let appointment = storage.book_appointment(
        "dr-okafor",
        "Dr. Imani Okafor",
        "pt-delgado",
        "Rosa Delgado",
        now_ms,
        "Persistent cough and mild fever",
    )?;
    info!(
        "MediLink: appointment {} booked, patient joining alone",
        appointment.id
    );

    let config = SessionConfig {
        no_show_window: Duration::from_secs(3),
        ..SessionConfig::default()
    };
    let presence: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::new(config.presence_ttl));
    let mut session = LiveSession::join(
        Arc::clone(&appointments),
        presence,
        appointment.id,
        ParticipantRole::Patient,
        config,
    )
    .await?;

    info!("MediLink: waiting room open, counterpart never arrives...");
    let phase = session.closed().await;

    let after = appointments
        .appointment(appointment.id)
        .await?
        .ok_or("appointment vanished")?;
    info!(
        "MediLink: room closed as {}, appointment now {}",
        phase.as_str(),
        after.status.as_str()
    );
    Ok(())
}

/// Summary lands next to the DB: .../medilink/consultation_<id>.md
fn summary_path(storage: &ClinicStorage, appointment_id: i64) -> PathBuf {
    let dir = storage
        .path()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("consultation_{}.md", appointment_id))
}
