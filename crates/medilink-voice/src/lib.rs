//! # MediLink Voice - Consultation Voice Capture
//!
//! Continuous speech capture for live consultations. A recognizer runs one
//! listening pass at a time; the capture loop owns restarts, the mute gate,
//! and error recovery, so utterances keep flowing for the whole visit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Capture Loop                          │
//! │  ┌────────────────┐    pass     ┌───────────────────────┐  │
//! │  │   Recognizer   │────────────→│  Restart Discipline   │  │
//! │  │ (listen_once)  │ final/error │  100ms after a final  │  │
//! │  └────────────────┘             │  300ms after an error │  │
//! │          ↑                      └───────────────────────┘  │
//! │      mute gate                            ↓                │
//! │ (pause, no teardown)      Partial / Utterance / Halted     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod error;
pub mod recognizer;
pub mod synth;

pub use capture::{spawn_capture, CaptureConfig, CaptureEvent, CaptureHandle};
pub use error::{SpeechError, SpeechResult};
pub use recognizer::{ScriptedRecognizer, ScriptedStep, SpeechRecognizer};
pub use synth::{SilentSynthesizer, SpeechSynthesizer};
