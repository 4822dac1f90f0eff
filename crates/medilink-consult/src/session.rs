//! Live session join protocol.
//!
//! A session starts in the waiting room, goes live exactly once when both
//! parties hold fresh presence leases, and terminates either when a party
//! leaves (`Ended`) or when the no-show window elapses with the room still
//! waiting (`Cancelled`, which also cancels the stored appointment).
//!
//! The phase logic lives in a synchronous [`SessionState`]; the async
//! driver wires it to the presence feed, the no-show deadline, the lease
//! heartbeat, and a command channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use medilink_core::{
    AppointmentStatus, AppointmentStore, ClinicError, ClinicResult, ParticipantRole, SessionConfig,
};

use crate::presence::{now_ms, PresenceRecord, PresenceStore};

/// Where the session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Waiting,
    Live,
    Ended,
    Cancelled,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Waiting => "WAITING",
            SessionPhase::Live => "LIVE",
            SessionPhase::Ended => "ENDED",
            SessionPhase::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Cancelled)
    }
}

/// Events emitted while a session runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Presence view changed under the lease rule.
    PresenceChanged {
        doctor_present: bool,
        patient_present: bool,
    },
    /// Both parties present for the first time.
    WentLive { at_ms: i64 },
    /// The shared transcript grew (or was resynced).
    TranscriptUpdated { transcript: String },
    /// The no-show window elapsed; the appointment is being cancelled.
    NoShowCancelled { appointment_id: i64 },
    /// The phase moved.
    PhaseChanged { phase: SessionPhase },
}

/// What the driver must do after a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionAction {
    None,
    DisarmNoShow,
    CancelAppointment,
    Terminate,
}

/// Synchronous phase logic, kept free of IO so it is directly testable.
struct SessionState {
    phase: SessionPhase,
    transcript: String,
    last_doctor_present: bool,
    last_patient_present: bool,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionState {
    fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                phase: SessionPhase::Waiting,
                transcript: String::new(),
                last_doctor_present: false,
                last_patient_present: false,
                event_tx,
            },
            event_rx,
        )
    }

    /// Apply one presence snapshot.
    fn observe(&mut self, record: &PresenceRecord, now_ms: i64, ttl: Duration) -> SessionAction {
        if self.phase.is_terminal() {
            return SessionAction::None;
        }

        let doctor_present = record.doctor.is_fresh(now_ms, ttl);
        let patient_present = record.patient.is_fresh(now_ms, ttl);
        if doctor_present != self.last_doctor_present
            || patient_present != self.last_patient_present
        {
            self.last_doctor_present = doctor_present;
            self.last_patient_present = patient_present;
            self.emit(SessionEvent::PresenceChanged {
                doctor_present,
                patient_present,
            });
        }

        if record.transcript != self.transcript {
            self.transcript = record.transcript.clone();
            self.emit(SessionEvent::TranscriptUpdated {
                transcript: self.transcript.clone(),
            });
        }

        match self.phase {
            SessionPhase::Waiting if doctor_present && patient_present => {
                self.phase = SessionPhase::Live;
                info!(target: "medilink::session", "Both parties present, consultation live");
                self.emit(SessionEvent::WentLive { at_ms: now_ms });
                self.emit(SessionEvent::PhaseChanged {
                    phase: SessionPhase::Live,
                });
                SessionAction::DisarmNoShow
            }
            SessionPhase::Live if !(doctor_present && patient_present) => {
                self.phase = SessionPhase::Ended;
                info!(target: "medilink::session", "Counterpart gone, consultation over");
                self.emit(SessionEvent::PhaseChanged {
                    phase: SessionPhase::Ended,
                });
                SessionAction::Terminate
            }
            _ => SessionAction::None,
        }
    }

    /// The no-show deadline elapsed. Only a still-waiting room cancels.
    fn on_no_show_deadline(&mut self, appointment_id: i64) -> SessionAction {
        if self.phase != SessionPhase::Waiting {
            return SessionAction::None;
        }
        self.phase = SessionPhase::Cancelled;
        warn!(
            target: "medilink::session",
            appointment_id,
            "No-show window elapsed, cancelling appointment"
        );
        self.emit(SessionEvent::NoShowCancelled { appointment_id });
        self.emit(SessionEvent::PhaseChanged {
            phase: SessionPhase::Cancelled,
        });
        SessionAction::CancelAppointment
    }

    /// Local leave, or the snapshot feed going away.
    fn on_leave(&mut self) -> SessionAction {
        if self.phase.is_terminal() {
            return SessionAction::None;
        }
        self.phase = SessionPhase::Ended;
        self.emit(SessionEvent::PhaseChanged {
            phase: SessionPhase::Ended,
        });
        SessionAction::Terminate
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

enum SessionCommand {
    PostUtterance(String),
    Leave,
}

/// Posts utterances into a session from another task (the capture pump).
#[derive(Clone)]
pub struct UtterancePoster {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl UtterancePoster {
    /// Queue one spoken line. Blank text is dropped.
    pub fn post(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let _ = self
            .cmd_tx
            .send(SessionCommand::PostUtterance(text.to_string()));
    }
}

/// One party's handle to a running consultation session.
pub struct LiveSession {
    appointment_id: i64,
    role: ParticipantRole,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    phase_rx: watch::Receiver<SessionPhase>,
    transcript_rx: watch::Receiver<String>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Join the consultation room for an appointment.
    ///
    /// Subscribes to presence before marking the caller joined so the join
    /// snapshot itself cannot be missed, then spawns the session driver
    /// with the no-show deadline armed and the lease heartbeat running.
    pub async fn join(
        appointments: Arc<dyn AppointmentStore>,
        presence: Arc<dyn PresenceStore>,
        appointment_id: i64,
        role: ParticipantRole,
        config: SessionConfig,
    ) -> ClinicResult<Self> {
        let appointment = appointments
            .appointment(appointment_id)
            .await?
            .ok_or(ClinicError::AppointmentNotFound(appointment_id))?;

        let snapshot_rx = presence.subscribe(appointment_id);
        let first = presence.mark_joined(appointment_id, role).await?;

        info!(
            target: "medilink::session",
            appointment_id,
            role = role.as_str(),
            doctor = %appointment.doctor_name,
            patient = %appointment.patient_name,
            "Joined consultation room"
        );

        let (state, events_rx) = SessionState::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Waiting);
        let (transcript_tx, transcript_rx) = watch::channel(String::new());

        let driver = SessionDriver {
            appointments,
            presence,
            appointment_id,
            role,
            config,
            state,
            phase_tx,
            transcript_tx,
        };
        let task = tokio::spawn(driver.run(first, snapshot_rx, cmd_rx));

        Ok(Self {
            appointment_id,
            role,
            cmd_tx,
            phase_rx,
            transcript_rx,
            events_rx: Some(events_rx),
            task: Some(task),
        })
    }

    pub fn appointment_id(&self) -> i64 {
        self.appointment_id
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    /// Post one spoken line to the shared transcript.
    pub fn post_utterance(&self, text: &str) {
        self.poster().post(text);
    }

    /// Clonable sender for feeding utterances from another task.
    pub fn poster(&self) -> UtterancePoster {
        UtterancePoster {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// End the session from this side.
    pub fn leave(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Leave);
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    pub fn phase_watch(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }

    /// The synced transcript, as pushed by the presence store.
    pub fn transcript(&self) -> String {
        self.transcript_rx.borrow().clone()
    }

    pub fn transcript_watch(&self) -> watch::Receiver<String> {
        self.transcript_rx.clone()
    }

    /// Take the session event receiver. Returns `None` after the first call.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Wait for the driver to finish and return the terminal phase.
    pub async fn closed(&mut self) -> SessionPhase {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.phase()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Dropping the handle ends the visit from this side.
        let _ = self.cmd_tx.send(SessionCommand::Leave);
    }
}

struct SessionDriver {
    appointments: Arc<dyn AppointmentStore>,
    presence: Arc<dyn PresenceStore>,
    appointment_id: i64,
    role: ParticipantRole,
    config: SessionConfig,
    state: SessionState,
    phase_tx: watch::Sender<SessionPhase>,
    transcript_tx: watch::Sender<String>,
}

impl SessionDriver {
    async fn run(
        mut self,
        first: PresenceRecord,
        mut snapshot_rx: broadcast::Receiver<PresenceRecord>,
        mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let no_show = tokio::time::sleep(self.config.no_show_window);
        tokio::pin!(no_show);
        let mut no_show_armed = true;
        let mut lease_tick = tokio::time::interval(self.config.lease_renewal);
        lease_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The counterpart may already be in the room.
        let action = self.apply_snapshot(&first);
        let mut done = self.handle_action(action, &mut no_show_armed).await;

        while !done {
            tokio::select! {
                _ = &mut no_show, if no_show_armed => {
                    no_show_armed = false;
                    let action = self.state.on_no_show_deadline(self.appointment_id);
                    self.sync_watches();
                    done = self.handle_action(action, &mut no_show_armed).await;
                }
                res = snapshot_rx.recv() => {
                    match res {
                        Ok(record) => {
                            let action = self.apply_snapshot(&record);
                            done = self.handle_action(action, &mut no_show_armed).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(
                                target: "medilink::session",
                                appointment_id = self.appointment_id,
                                missed,
                                "Presence feed lagged, resyncing"
                            );
                            match self.presence.get(self.appointment_id).await {
                                Ok(record) => {
                                    let action = self.apply_snapshot(&record);
                                    done = self.handle_action(action, &mut no_show_armed).await;
                                }
                                Err(e) => {
                                    warn!(
                                        target: "medilink::session",
                                        appointment_id = self.appointment_id,
                                        error = %e,
                                        "Presence resync failed"
                                    );
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            let action = self.state.on_leave();
                            self.sync_watches();
                            done = self.handle_action(action, &mut no_show_armed).await;
                        }
                    }
                }
                _ = lease_tick.tick() => {
                    if let Err(e) = self.presence.renew(self.appointment_id, self.role).await {
                        warn!(
                            target: "medilink::session",
                            appointment_id = self.appointment_id,
                            error = %e,
                            "Lease renewal failed"
                        );
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::PostUtterance(text)) => {
                            let line = format!("{} {}", self.role.transcript_prefix(), text);
                            if let Err(e) = self.presence.append_line(self.appointment_id, &line).await {
                                warn!(
                                    target: "medilink::session",
                                    appointment_id = self.appointment_id,
                                    error = %e,
                                    "Transcript append failed"
                                );
                            }
                        }
                        Some(SessionCommand::Leave) | None => {
                            let action = self.state.on_leave();
                            self.sync_watches();
                            done = self.handle_action(action, &mut no_show_armed).await;
                        }
                    }
                }
            }
        }

        // Presence release is best-effort: the lease TTL cleans up after a
        // lost leave anyway.
        if let Err(e) = self.presence.mark_left(self.appointment_id, self.role).await {
            debug!(
                target: "medilink::session",
                appointment_id = self.appointment_id,
                error = %e,
                "mark_left failed"
            );
        }
        self.sync_watches();
        info!(
            target: "medilink::session",
            appointment_id = self.appointment_id,
            role = self.role.as_str(),
            phase = self.state.phase.as_str(),
            "Session closed"
        );
    }

    fn apply_snapshot(&mut self, record: &PresenceRecord) -> SessionAction {
        let action = self
            .state
            .observe(record, now_ms(), self.config.presence_ttl);
        self.sync_watches();
        action
    }

    async fn handle_action(&mut self, action: SessionAction, no_show_armed: &mut bool) -> bool {
        match action {
            SessionAction::None => false,
            SessionAction::DisarmNoShow => {
                *no_show_armed = false;
                false
            }
            SessionAction::Terminate => true,
            SessionAction::CancelAppointment => {
                if let Err(e) = self
                    .appointments
                    .set_status(self.appointment_id, AppointmentStatus::Cancelled)
                    .await
                {
                    warn!(
                        target: "medilink::session",
                        appointment_id = self.appointment_id,
                        error = %e,
                        "Failed to cancel no-show appointment"
                    );
                }
                true
            }
        }
    }

    fn sync_watches(&self) {
        self.phase_tx.send_if_modified(|phase| {
            if *phase != self.state.phase {
                *phase = self.state.phase;
                true
            } else {
                false
            }
        });
        self.transcript_tx.send_if_modified(|t| {
            if *t != self.state.transcript {
                *t = self.state.transcript.clone();
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceLease;

    const TTL: Duration = Duration::from_secs(45);

    fn record(doctor: bool, patient: bool, transcript: &str, now: i64) -> PresenceRecord {
        PresenceRecord {
            appointment_id: 1,
            doctor: PresenceLease {
                joined: doctor,
                renewed_at_ms: now,
            },
            patient: PresenceLease {
                joined: patient,
                renewed_at_ms: now,
            },
            transcript: transcript.to_string(),
        }
    }

    #[test]
    fn test_waiting_goes_live_exactly_once() {
        let (mut state, mut rx) = SessionState::new();
        let now = 1_000_000;

        assert_eq!(
            state.observe(&record(true, false, "", now), now, TTL),
            SessionAction::None
        );
        assert_eq!(state.phase, SessionPhase::Waiting);

        assert_eq!(
            state.observe(&record(true, true, "", now), now, TTL),
            SessionAction::DisarmNoShow
        );
        assert_eq!(state.phase, SessionPhase::Live);

        // Re-observing both present does not re-fire.
        assert_eq!(
            state.observe(&record(true, true, "", now), now, TTL),
            SessionAction::None
        );

        let mut went_live = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::WentLive { .. }) {
                went_live += 1;
            }
        }
        assert_eq!(went_live, 1);
    }

    #[test]
    fn test_stale_lease_never_counts_toward_live() {
        let (mut state, _rx) = SessionState::new();
        let now = 10_000_000;
        let mut rec = record(true, true, "", now);
        // Doctor joined long ago and stopped renewing.
        rec.doctor.renewed_at_ms = now - TTL.as_millis() as i64;

        assert_eq!(state.observe(&rec, now, TTL), SessionAction::None);
        assert_eq!(state.phase, SessionPhase::Waiting);
    }

    #[test]
    fn test_live_ends_when_counterpart_goes_stale() {
        let (mut state, _rx) = SessionState::new();
        let now = 1_000_000;
        state.observe(&record(true, true, "", now), now, TTL);
        assert_eq!(state.phase, SessionPhase::Live);

        // Same record later, with no renewals in between.
        let later = now + TTL.as_millis() as i64 + 1;
        assert_eq!(
            state.observe(&record(true, true, "", now), later, TTL),
            SessionAction::Terminate
        );
        assert_eq!(state.phase, SessionPhase::Ended);
    }

    #[test]
    fn test_no_show_only_fires_while_waiting() {
        let (mut state, _rx) = SessionState::new();
        let now = 1_000_000;
        state.observe(&record(true, true, "", now), now, TTL);
        assert_eq!(state.phase, SessionPhase::Live);

        // Live room: a late deadline is a no-op.
        assert_eq!(state.on_no_show_deadline(42), SessionAction::None);
        assert_eq!(state.phase, SessionPhase::Live);

        let (mut waiting, _rx2) = SessionState::new();
        assert_eq!(
            waiting.on_no_show_deadline(42),
            SessionAction::CancelAppointment
        );
        assert_eq!(waiting.phase, SessionPhase::Cancelled);
    }

    #[test]
    fn test_transcript_updates_emit_events() {
        let (mut state, mut rx) = SessionState::new();
        let now = 1_000_000;
        state.observe(&record(true, false, "Dr: hello", now), now, TTL);
        state.observe(&record(true, false, "Dr: hello\nPt: hi", now), now, TTL);

        let transcripts: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                SessionEvent::TranscriptUpdated { transcript } => Some(transcript),
                _ => None,
            })
            .collect();
        assert_eq!(
            transcripts,
            vec!["Dr: hello".to_string(), "Dr: hello\nPt: hi".to_string()]
        );
    }

    #[test]
    fn test_terminal_phase_ignores_observations() {
        let (mut state, _rx) = SessionState::new();
        state.on_leave();
        assert_eq!(state.phase, SessionPhase::Ended);

        let now = 1_000_000;
        assert_eq!(
            state.observe(&record(true, true, "", now), now, TTL),
            SessionAction::None
        );
        assert_eq!(state.phase, SessionPhase::Ended);

        // Leaving twice stays Ended and asks for nothing.
        assert_eq!(state.on_leave(), SessionAction::None);
    }
}
