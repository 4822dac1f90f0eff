//! Continuous voice capture loop
//!
//! Drives a [`SpeechRecognizer`] pass after pass for the length of a
//! consultation: a short restart after every final result, a slightly
//! longer one after a recoverable error, a mute gate that pauses listening
//! without tearing the recognizer down, and a hard stop once faults keep
//! repeating.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SpeechError;
use crate::recognizer::SpeechRecognizer;

/// Restart discipline for the capture loop
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Pause between a final result and the next pass (default: 100ms)
    pub restart_delay: Duration,

    /// Pause after a recoverable error before retrying (default: 300ms)
    pub retry_delay: Duration,

    /// Consecutive faults tolerated before the loop halts (default: 5).
    /// Silence never counts; a successful pass resets the count.
    pub max_consecutive_errors: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(300),
            max_consecutive_errors: 5,
        }
    }
}

/// Events emitted by the capture loop
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Interim hypothesis from the pass in progress
    Partial { text: String },

    /// Finalized utterance, trimmed and non-empty
    Utterance {
        text: String,
        captured_at: DateTime<Utc>,
    },

    /// A recoverable error occurred; the loop restarts after it
    Recovered { error: SpeechError },

    /// The mute gate opened or closed
    MuteChanged { muted: bool },

    /// The loop stopped on its own and will not restart
    Halted { reason: String },
}

/// Handle to a running capture loop.
pub struct CaptureHandle {
    stop_tx: watch::Sender<bool>,
    mute_tx: watch::Sender<bool>,
    events_rx: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<CaptureEvent>> {
        self.events_rx.take()
    }

    /// Pause or resume listening without tearing the loop down.
    pub fn set_muted(&self, muted: bool) {
        let _ = self.mute_tx.send(muted);
    }

    pub fn is_muted(&self) -> bool {
        *self.mute_tx.borrow()
    }

    /// Ask the loop to stop. The current pass is abandoned.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Wait for the loop task to exit.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawn the capture loop over the given recognizer.
pub fn spawn_capture(recognizer: Arc<dyn SpeechRecognizer>, config: CaptureConfig) -> CaptureHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (mute_tx, mute_rx) = watch::channel(false);
    let (event_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(capture_loop(recognizer, config, stop_rx, mute_rx, event_tx));

    CaptureHandle {
        stop_tx,
        mute_tx,
        events_rx: Some(events_rx),
        task: Some(task),
    }
}

/// How a single listening pass resolved.
enum PassOutcome {
    Final(String),
    Recoverable(SpeechError),
    Terminal(SpeechError),
    Aborted,
}

async fn capture_loop(
    recognizer: Arc<dyn SpeechRecognizer>,
    config: CaptureConfig,
    mut stop_rx: watch::Receiver<bool>,
    mut mute_rx: watch::Receiver<bool>,
    event_tx: mpsc::UnboundedSender<CaptureEvent>,
) {
    info!("🎤 Capture loop started");
    let mut consecutive_errors = 0u32;
    let mut announced_muted = false;

    while !*stop_rx.borrow() {
        // Mute gate: while muted, no pass runs at all.
        if *mute_rx.borrow() {
            if !announced_muted {
                announced_muted = true;
                info!("🔇 Muted, listening paused");
                let _ = event_tx.send(CaptureEvent::MuteChanged { muted: true });
            }
            tokio::select! {
                _ = mute_rx.changed() => {}
                _ = stop_rx.changed() => {}
            }
            continue;
        }
        if announced_muted {
            announced_muted = false;
            info!("🎤 Unmuted, listening resumes");
            let _ = event_tx.send(CaptureEvent::MuteChanged { muted: false });
        }

        let (partial_tx, mut partial_rx) = mpsc::unbounded_channel::<String>();
        let mut last_partial: Option<String> = None;

        let mut pass = Box::pin(recognizer.listen_once(&partial_tx));
        let outcome = loop {
            tokio::select! {
                result = &mut pass => {
                    break match result {
                        Ok(text) => PassOutcome::Final(text),
                        Err(e) if e.is_terminal() => PassOutcome::Terminal(e),
                        Err(e) => PassOutcome::Recoverable(e),
                    };
                }
                Some(partial) = partial_rx.recv() => {
                    last_partial = Some(partial.clone());
                    let _ = event_tx.send(CaptureEvent::Partial { text: partial });
                }
                _ = mute_rx.changed() => {
                    if *mute_rx.borrow() {
                        break PassOutcome::Aborted;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break PassOutcome::Aborted;
                    }
                }
            }
        };
        drop(pass);

        // Collect stragglers so an empty final can fall back to the
        // freshest partial of the pass.
        while let Ok(partial) = partial_rx.try_recv() {
            last_partial = Some(partial.clone());
            let _ = event_tx.send(CaptureEvent::Partial { text: partial });
        }

        match outcome {
            PassOutcome::Final(text) => {
                consecutive_errors = 0;
                let mut text = text.trim().to_string();
                if text.is_empty() {
                    text = last_partial.unwrap_or_default().trim().to_string();
                }
                if !text.is_empty() {
                    debug!("🎯 Utterance captured: {} chars", text.len());
                    let _ = event_tx.send(CaptureEvent::Utterance {
                        text,
                        captured_at: Utc::now(),
                    });
                }
                sleep_unless_stopped(config.restart_delay, &mut stop_rx).await;
            }
            PassOutcome::Recoverable(e) => {
                if e.is_silence() {
                    // A quiet room is not a fault.
                    debug!("🤫 {}, restarting", e);
                    let _ = event_tx.send(CaptureEvent::Recovered { error: e });
                } else {
                    consecutive_errors += 1;
                    if consecutive_errors >= config.max_consecutive_errors {
                        warn!("🛑 Persistent recognition failure, halting: {}", e);
                        let _ = event_tx.send(CaptureEvent::Halted {
                            reason: format!("persistent recognition failure: {}", e),
                        });
                        break;
                    }
                    warn!(
                        "⚠️ Recognition error: {} (attempt {}/{})",
                        e, consecutive_errors, config.max_consecutive_errors
                    );
                    let _ = event_tx.send(CaptureEvent::Recovered { error: e });
                }
                sleep_unless_stopped(config.retry_delay, &mut stop_rx).await;
            }
            PassOutcome::Terminal(e) => {
                warn!("🛑 Unrecoverable recognition error, halting: {}", e);
                let _ = event_tx.send(CaptureEvent::Halted {
                    reason: e.to_string(),
                });
                break;
            }
            PassOutcome::Aborted => {
                // The gate (or the loop condition) handles the transition.
            }
        }
    }

    info!("Capture loop stopped");
}

async fn sleep_unless_stopped(delay: Duration, stop_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = stop_rx.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_restart_discipline() {
        let config = CaptureConfig::default();
        assert_eq!(config.restart_delay, Duration::from_millis(100));
        assert_eq!(config.retry_delay, Duration::from_millis(300));
        assert_eq!(config.max_consecutive_errors, 5);
    }
}
