//! MediLink consultation layer.
//!
//! Builds the live consultation experience on top of `medilink-core` and
//! `medilink-voice`:
//!
//! - [`presence`] — TTL-leased participant presence and the shared,
//!   atomically appended transcript.
//! - [`session`] — the join protocol: waiting room, going live exactly
//!   once, no-show cancellation, and leave handling.
//! - [`room`] — the wired-up consultation: session + speech capture +
//!   AI insight refresh behind a single handle and event stream.
//!
//! A party typically calls [`ConsultationRoom::open`] and consumes
//! [`RoomEvent`]s; headless peers (tests, bots) drive [`LiveSession`]
//! directly.

pub mod presence;
pub mod room;
pub mod session;

pub use presence::{MemoryPresenceStore, PresenceLease, PresenceRecord, PresenceStore};
pub use room::{ConsultationRoom, RoomConfig, RoomEvent};
pub use session::{LiveSession, SessionEvent, SessionPhase, UtterancePoster};
