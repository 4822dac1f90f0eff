//! Speech synthesis seam
//!
//! The patient side reads AI answers aloud. Synthesis is a thin sync trait
//! so callers stay agnostic about the backing engine.

use crate::error::SpeechResult;

pub trait SpeechSynthesizer: Send + Sync {
    /// Queue the text for playback, replacing anything still speaking.
    fn speak(&self, text: &str) -> SpeechResult<()>;

    /// Stop playback immediately.
    fn stop(&self);
}

/// No-op synthesizer for headless runs and tests.
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn speak(&self, _text: &str) -> SpeechResult<()> {
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_synth_always_accepts() {
        let synth = SilentSynthesizer;
        assert!(synth.speak("Take one tablet daily.").is_ok());
        synth.stop();
    }
}
