//! Speech recognizer abstraction
//!
//! A recognizer runs one listening pass at a time: it streams interim
//! hypotheses through the provided channel and resolves with the final
//! utterance (or an error). Restarting between passes belongs to the
//! capture loop, never to the recognizer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{SpeechError, SpeechResult};

/// One listening pass.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen until the pass resolves. Interim hypotheses go to
    /// `partial_tx`; the return value is the pass's final transcript.
    async fn listen_once(
        &self,
        partial_tx: &mpsc::UnboundedSender<String>,
    ) -> SpeechResult<String>;
}

/// A single scripted recognizer step.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Emit each partial in order, then resolve with the final text.
    Utterance {
        partials: Vec<String>,
        final_text: String,
    },
    /// Fail the pass with the given error.
    Fail(SpeechError),
}

/// Deterministic recognizer for tests and demos.
///
/// Pops one step per pass. An exhausted script behaves like an open
/// microphone in a silent room: every further pass times out.
pub struct ScriptedRecognizer {
    steps: Mutex<VecDeque<ScriptedStep>>,
    step_delay: Duration,
}

impl ScriptedRecognizer {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            step_delay: Duration::from_millis(5),
        }
    }

    /// Script of plain utterances with no partials.
    pub fn say(lines: &[&str]) -> Self {
        Self::new(
            lines
                .iter()
                .map(|line| ScriptedStep::Utterance {
                    partials: Vec::new(),
                    final_text: line.to_string(),
                })
                .collect(),
        )
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn next_step(&self) -> SpeechResult<Option<ScriptedStep>> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|_| SpeechError::Engine("script lock poisoned".to_string()))?;
        Ok(steps.pop_front())
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn listen_once(
        &self,
        partial_tx: &mpsc::UnboundedSender<String>,
    ) -> SpeechResult<String> {
        // Sleep before consuming the step so an aborted pass leaves the
        // script intact for the next one.
        tokio::time::sleep(self.step_delay).await;
        match self.next_step()? {
            Some(ScriptedStep::Utterance {
                partials,
                final_text,
            }) => {
                for partial in partials {
                    let _ = partial_tx.send(partial);
                    tokio::time::sleep(self.step_delay).await;
                }
                Ok(final_text)
            }
            Some(ScriptedStep::Fail(e)) => Err(e),
            None => Err(SpeechError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_steps_pop_in_order() {
        let rec = ScriptedRecognizer::say(&["one", "two"]);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(rec.listen_once(&tx).await.unwrap(), "one");
        assert_eq!(rec.listen_once(&tx).await.unwrap(), "two");
        // Script exhausted: silent room.
        assert_eq!(rec.listen_once(&tx).await, Err(SpeechError::Timeout));
    }

    #[tokio::test]
    async fn test_partials_stream_before_final() {
        let rec = ScriptedRecognizer::new(vec![ScriptedStep::Utterance {
            partials: vec!["hel".to_string(), "hello wo".to_string()],
            final_text: "hello world".to_string(),
        }]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(rec.listen_once(&tx).await.unwrap(), "hello world");
        assert_eq!(rx.recv().await.unwrap(), "hel");
        assert_eq!(rx.recv().await.unwrap(), "hello wo");
    }

    #[tokio::test]
    async fn test_scripted_failure_step() {
        let rec = ScriptedRecognizer::new(vec![
            ScriptedStep::Fail(SpeechError::Busy),
            ScriptedStep::Utterance {
                partials: Vec::new(),
                final_text: "after retry".to_string(),
            },
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(rec.listen_once(&tx).await, Err(SpeechError::Busy));
        assert_eq!(rec.listen_once(&tx).await.unwrap(), "after retry");
    }
}
