//! Consultation room: one handle that joins the live session, runs the
//! voice capture loop, and refreshes AI insights as the transcript grows.
//!
//! The room pump forwards captured utterances into the shared transcript
//! and watches transcript growth; once growth passes the configured
//! trigger, an insight refresh is spawned off the pump so a slow AI call
//! never stalls event delivery.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use medilink_core::{
    AppointmentStore, ClinicError, ClinicResult, ClinicStorage, InsightConfig, InsightEngine,
    InsightSnapshot, InsightSource, ParticipantRole, RefreshOutcome, SessionConfig,
};
use medilink_voice::{spawn_capture, CaptureConfig, CaptureEvent, CaptureHandle, SpeechRecognizer};

use crate::presence::PresenceStore;
use crate::session::{LiveSession, SessionEvent, SessionPhase, UtterancePoster};

/// Everything a consultation UI would react to, on one stream.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Session(SessionEvent),
    Capture(CaptureEvent),
    Insights(InsightSnapshot),
}

/// Knobs for the three layers the room runs.
#[derive(Debug, Clone, Default)]
pub struct RoomConfig {
    pub session: SessionConfig,
    pub insights: InsightConfig,
    pub capture: CaptureConfig,
}

/// One party's fully wired consultation: session + microphone + insights.
pub struct ConsultationRoom {
    session: LiveSession,
    capture: CaptureHandle,
    engine: Arc<InsightEngine>,
    storage: Option<Arc<ClinicStorage>>,
    session_row: Option<String>,
    events_rx: Option<mpsc::UnboundedReceiver<RoomEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl ConsultationRoom {
    /// Join the room for an appointment and start capturing speech.
    ///
    /// When `storage` is given, a consultation session row is opened now
    /// and closed with the final transcript in [`ConsultationRoom::close`].
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        appointments: Arc<dyn AppointmentStore>,
        presence: Arc<dyn PresenceStore>,
        recognizer: Arc<dyn SpeechRecognizer>,
        insight_source: Arc<dyn InsightSource>,
        storage: Option<Arc<ClinicStorage>>,
        appointment_id: i64,
        role: ParticipantRole,
        config: RoomConfig,
    ) -> ClinicResult<Self> {
        let mut session = LiveSession::join(
            appointments,
            presence,
            appointment_id,
            role,
            config.session,
        )
        .await?;
        let session_events = session
            .take_event_receiver()
            .ok_or_else(|| ClinicError::Session("session event stream already taken".into()))?;

        let mut capture = spawn_capture(recognizer, config.capture);
        let capture_events = capture
            .take_event_receiver()
            .ok_or_else(|| ClinicError::Session("capture event stream already taken".into()))?;

        let engine = Arc::new(InsightEngine::new(insight_source, config.insights));

        let session_row = match &storage {
            Some(store) => match store.start_session(appointment_id) {
                Ok(row) => {
                    debug!(
                        target: "medilink::room",
                        appointment_id,
                        session_id = %row.id,
                        "Consultation session row opened"
                    );
                    Some(row.id)
                }
                Err(e) => {
                    warn!(
                        target: "medilink::room",
                        appointment_id,
                        error = %e,
                        "Failed to open consultation session row"
                    );
                    None
                }
            },
            None => None,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(room_pump(
            session_events,
            capture_events,
            session.poster(),
            Arc::clone(&engine),
            events_tx,
        ));

        Ok(Self {
            session,
            capture,
            engine,
            storage,
            session_row,
            events_rx: Some(events_rx),
            pump: Some(pump),
        })
    }

    pub fn appointment_id(&self) -> i64 {
        self.session.appointment_id()
    }

    pub fn role(&self) -> ParticipantRole {
        self.session.role()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn phase_watch(&self) -> tokio::sync::watch::Receiver<SessionPhase> {
        self.session.phase_watch()
    }

    pub fn transcript(&self) -> String {
        self.session.transcript()
    }

    pub fn transcript_watch(&self) -> tokio::sync::watch::Receiver<String> {
        self.session.transcript_watch()
    }

    /// Post a typed (non-spoken) line to the shared transcript.
    pub fn post_utterance(&self, text: &str) {
        self.session.post_utterance(text);
    }

    pub fn poster(&self) -> UtterancePoster {
        self.session.poster()
    }

    /// Pause or resume the microphone without leaving the room.
    pub fn set_muted(&self, muted: bool) {
        self.capture.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.capture.is_muted()
    }

    /// Latest insight snapshot, if any refresh has succeeded yet.
    pub fn insights(&self) -> Option<InsightSnapshot> {
        self.engine.snapshot()
    }

    pub fn insight_watch(&self) -> tokio::sync::watch::Receiver<Option<InsightSnapshot>> {
        self.engine.subscribe()
    }

    /// Run an insight refresh with the current transcript regardless of
    /// growth. The length floor and the busy guard still apply.
    pub async fn refresh_insights(&self) -> RefreshOutcome {
        self.engine.refresh(&self.session.transcript()).await
    }

    /// Take the room event receiver. Returns `None` after the first call.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.events_rx.take()
    }

    /// Leave the room, stop capture, and flush the session row.
    pub async fn close(&mut self) -> SessionPhase {
        self.capture.stop();
        self.session.leave();
        let phase = self.session.closed().await;
        self.capture.join().await;
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        if let Some(id) = self.session_row.take() {
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.end_session(&id, &self.session.transcript()) {
                    warn!(
                        target: "medilink::room",
                        session_id = %id,
                        error = %e,
                        "Failed to close consultation session row"
                    );
                }
            }
        }
        phase
    }
}

async fn room_pump(
    mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    mut capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
    poster: UtterancePoster,
    engine: Arc<InsightEngine>,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
) {
    let mut capture_open = true;
    loop {
        tokio::select! {
            event = capture_events.recv(), if capture_open => {
                match event {
                    Some(CaptureEvent::Utterance { text, captured_at }) => {
                        poster.post(&text);
                        let _ = events_tx.send(RoomEvent::Capture(CaptureEvent::Utterance {
                            text,
                            captured_at,
                        }));
                    }
                    Some(other) => {
                        let _ = events_tx.send(RoomEvent::Capture(other));
                    }
                    None => capture_open = false,
                }
            }
            event = session_events.recv() => {
                match event {
                    Some(SessionEvent::TranscriptUpdated { transcript }) => {
                        if engine.should_auto_refresh(transcript.chars().count()) {
                            let engine = Arc::clone(&engine);
                            let events_tx = events_tx.clone();
                            let text = transcript.clone();
                            tokio::spawn(async move {
                                if engine.refresh(&text).await == RefreshOutcome::Refreshed {
                                    if let Some(snapshot) = engine.snapshot() {
                                        let _ = events_tx.send(RoomEvent::Insights(snapshot));
                                    }
                                }
                            });
                        }
                        let _ = events_tx.send(RoomEvent::Session(
                            SessionEvent::TranscriptUpdated { transcript },
                        ));
                    }
                    Some(SessionEvent::PhaseChanged { phase }) if phase.is_terminal() => {
                        let _ = events_tx.send(RoomEvent::Session(
                            SessionEvent::PhaseChanged { phase },
                        ));
                        break;
                    }
                    Some(other) => {
                        let _ = events_tx.send(RoomEvent::Session(other));
                    }
                    None => break,
                }
            }
        }
    }
    debug!(target: "medilink::room", "Room pump stopped");
}
