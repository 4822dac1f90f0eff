//! Live insight refresh policy.
//!
//! Wraps an [`InsightSource`] with the transcript-driven refresh rules:
//! short transcripts are skipped, auto-refresh fires only after enough new
//! speech has accumulated since the last successful analysis, and at most
//! one refresh runs at a time. Consumers observe the latest snapshot
//! through a watch channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ai::InsightSource;
use crate::config::InsightConfig;
use crate::model::InsightSnapshot;

/// What a single refresh attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Transcript too short, or another refresh was already in flight.
    Skipped,
    /// New snapshot published; watermark advanced.
    Refreshed,
    /// Source failed; previous snapshot (and watermark) kept.
    Failed,
}

pub struct InsightEngine {
    source: Arc<dyn InsightSource>,
    config: InsightConfig,
    /// Transcript length (chars) at the last successful refresh. Only moves
    /// forward on success, so a failed call re-arms the auto trigger.
    watermark: AtomicUsize,
    in_flight: AtomicBool,
    snapshot_tx: watch::Sender<Option<InsightSnapshot>>,
}

impl InsightEngine {
    pub fn new(source: Arc<dyn InsightSource>, config: InsightConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            source,
            config,
            watermark: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            snapshot_tx,
        }
    }

    /// Run one refresh against the current transcript. Serialized: a second
    /// caller while one is in flight gets [`RefreshOutcome::Skipped`].
    pub async fn refresh(&self, transcript: &str) -> RefreshOutcome {
        let len = transcript.chars().count();
        if len < self.config.min_transcript_chars {
            debug!(
                target: "medilink::ai",
                chars = len,
                min = self.config.min_transcript_chars,
                "Transcript too short for analysis; skipping"
            );
            return RefreshOutcome::Skipped;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: "medilink::ai", "Insight refresh already in flight; skipping");
            return RefreshOutcome::Skipped;
        }

        let outcome = match self.source.live_insights(transcript).await {
            Ok(snapshot) => {
                self.watermark.store(len, Ordering::SeqCst);
                info!(
                    target: "medilink::ai",
                    chars = len,
                    severity = snapshot.severity.as_str(),
                    "Insights refreshed"
                );
                self.snapshot_tx.send_replace(Some(snapshot));
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!(target: "medilink::ai", error = %e, "Insight refresh failed; keeping previous snapshot");
                RefreshOutcome::Failed
            }
        };

        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Whether the transcript has grown enough since the last successful
    /// refresh to justify an automatic one.
    pub fn should_auto_refresh(&self, transcript_len: usize) -> bool {
        if transcript_len < self.config.min_transcript_chars {
            return false;
        }
        let since = transcript_len.saturating_sub(self.watermark.load(Ordering::SeqCst));
        since > self.config.growth_trigger_chars
    }

    /// Refresh only if the growth policy says so.
    pub async fn maybe_refresh(&self, transcript: &str) -> RefreshOutcome {
        if !self.should_auto_refresh(transcript.chars().count()) {
            return RefreshOutcome::Skipped;
        }
        self.refresh(transcript).await
    }

    /// Observe snapshot publications. Starts at `None` until the first
    /// successful refresh.
    pub fn subscribe(&self) -> watch::Receiver<Option<InsightSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Latest published snapshot, if any.
    pub fn snapshot(&self) -> Option<InsightSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn watermark(&self) -> usize {
        self.watermark.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::PlaceholderInsights;
    use crate::error::{ClinicError, ClinicResult};
    use crate::model::Severity;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingSource;

    #[async_trait]
    impl InsightSource for FailingSource {
        async fn live_insights(&self, _transcript: &str) -> ClinicResult<InsightSnapshot> {
            Err(ClinicError::Ai("model offline".to_string()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl InsightSource for SlowSource {
        async fn live_insights(&self, _transcript: &str) -> ClinicResult<InsightSnapshot> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(InsightSnapshot::default())
        }
    }

    fn test_config() -> InsightConfig {
        InsightConfig {
            min_transcript_chars: 50,
            growth_trigger_chars: 100,
        }
    }

    #[tokio::test]
    async fn test_short_transcript_skipped() {
        let engine = InsightEngine::new(Arc::new(PlaceholderInsights::new()), test_config());
        let short = "a".repeat(49);
        assert_eq!(engine.refresh(&short).await, RefreshOutcome::Skipped);
        assert!(engine.snapshot().is_none());

        let enough = "a".repeat(50);
        assert_eq!(engine.refresh(&enough).await, RefreshOutcome::Refreshed);
        assert_eq!(engine.watermark(), 50);
        assert!(engine.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_growth_trigger_is_strict() {
        let engine = InsightEngine::new(Arc::new(PlaceholderInsights::new()), test_config());
        let base = "a".repeat(200);
        assert_eq!(engine.refresh(&base).await, RefreshOutcome::Refreshed);
        assert_eq!(engine.watermark(), 200);

        // Exactly +100 since the watermark is not enough.
        assert!(!engine.should_auto_refresh(300));
        assert!(engine.should_auto_refresh(301));
        assert_eq!(
            engine.maybe_refresh(&"a".repeat(300)).await,
            RefreshOutcome::Skipped
        );
        assert_eq!(
            engine.maybe_refresh(&"a".repeat(301)).await,
            RefreshOutcome::Refreshed
        );
        assert_eq!(engine.watermark(), 301);
    }

    #[tokio::test]
    async fn test_failure_keeps_snapshot_and_watermark() {
        let good = InsightSnapshot {
            severity: Severity::High,
            ..Default::default()
        };
        let engine = InsightEngine::new(
            Arc::new(PlaceholderInsights::with_snapshot(good.clone())),
            test_config(),
        );
        assert_eq!(
            engine.refresh(&"a".repeat(100)).await,
            RefreshOutcome::Refreshed
        );

        let failing = InsightEngine::new(Arc::new(FailingSource), test_config());
        assert_eq!(
            failing.refresh(&"a".repeat(100)).await,
            RefreshOutcome::Failed
        );
        assert_eq!(failing.watermark(), 0);
        assert!(failing.snapshot().is_none());
        // The guard is released, so a later attempt is not shadow-blocked.
        assert_eq!(
            failing.refresh(&"a".repeat(100)).await,
            RefreshOutcome::Failed
        );

        assert_eq!(engine.snapshot(), Some(good));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_skipped() {
        let engine = Arc::new(InsightEngine::new(Arc::new(SlowSource), test_config()));
        let transcript = "a".repeat(100);

        let first = {
            let engine = Arc::clone(&engine);
            let transcript = transcript.clone();
            tokio::spawn(async move { engine.refresh(&transcript).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_busy());
        assert_eq!(engine.refresh(&transcript).await, RefreshOutcome::Skipped);

        assert_eq!(first.await.unwrap(), RefreshOutcome::Refreshed);
        assert!(!engine.is_busy());
    }
}
