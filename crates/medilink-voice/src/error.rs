//! Error types for the voice capture system

use thiserror::Error;

/// Result type alias for speech operations
pub type SpeechResult<T> = Result<T, SpeechError>;

/// Errors surfaced by a single recognizer pass.
///
/// The capture loop treats these in three classes: silence (restart
/// quietly), faults (restart but count toward the consecutive-failure
/// limit), and terminal errors (halt).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Audio permission denied")]
    PermissionDenied,

    #[error("No speech recognized")]
    NoMatch,

    #[error("Speech timed out")]
    Timeout,

    #[error("Recognizer busy")]
    Busy,

    #[error("Audio capture error: {0}")]
    Audio(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Recognition engine error: {0}")]
    Engine(String),
}

impl SpeechError {
    /// Silent-room outcomes. The loop restarts without counting these
    /// toward the persistent-failure limit.
    pub fn is_silence(&self) -> bool {
        matches!(self, SpeechError::NoMatch | SpeechError::Timeout)
    }

    /// Errors no amount of restarting will fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpeechError::PermissionDenied | SpeechError::Engine(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_disjoint() {
        assert!(SpeechError::NoMatch.is_silence());
        assert!(SpeechError::Timeout.is_silence());
        assert!(!SpeechError::Busy.is_silence());

        assert!(SpeechError::PermissionDenied.is_terminal());
        assert!(SpeechError::Engine("decoder gone".to_string()).is_terminal());
        assert!(!SpeechError::Network("socket reset".to_string()).is_terminal());

        // Faults are neither silence nor terminal.
        let fault = SpeechError::Audio("device unplugged".to_string());
        assert!(!fault.is_silence());
        assert!(!fault.is_terminal());
    }
}
