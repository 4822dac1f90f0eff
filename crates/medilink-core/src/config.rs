//! Runtime configuration.
//!
//! Timing knobs come from `MEDILINK_*` environment variables (a `.env` file
//! is honored by the binaries), with sane defaults and floors so a typo in
//! an env var cannot spin a loop hot. AI credentials live in an optional
//! `medilink.toml` the user can edit, with env fallbacks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClinicResult;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Delay between appointment scans when nothing is due (30 s).
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Half-width of the "due now" window around the scheduled time (60 s).
const DEFAULT_TOLERANCE_MS: u64 = 60_000;

/// Pause after an alert fires before scanning again (2 min).
const DEFAULT_COOLDOWN_MS: u64 = 120_000;

/// How long the first joiner waits for the counterpart (5 min).
const DEFAULT_NO_SHOW_WINDOW_MS: u64 = 300_000;

/// Presence lease time-to-live (45 s).
const DEFAULT_PRESENCE_TTL_MS: u64 = 45_000;

/// Transcripts shorter than this are never analyzed (chars).
const DEFAULT_MIN_TRANSCRIPT_CHARS: usize = 50;

/// Transcript growth since the last analysis that triggers an automatic
/// insight refresh (chars).
const DEFAULT_GROWTH_TRIGGER_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Polling behavior of the appointment monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between store scans when nothing fired.
    pub poll_interval: Duration,
    /// An appointment is due when `|scheduled_at - now| < tolerance`.
    pub tolerance: Duration,
    /// Delay after an alert fires, so the same appointment is not re-posted
    /// every poll while it stays inside the window.
    pub cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            poll_interval: Duration::from_millis(
                env_ms("MEDILINK_MONITOR_POLL_MS", DEFAULT_POLL_INTERVAL_MS).max(1_000), // minimum 1 second
            ),
            tolerance: Duration::from_millis(
                env_ms("MEDILINK_MONITOR_TOLERANCE_MS", DEFAULT_TOLERANCE_MS).max(1_000),
            ),
            cooldown: Duration::from_millis(
                env_ms("MEDILINK_MONITOR_COOLDOWN_MS", DEFAULT_COOLDOWN_MS).max(1_000),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Timing of the live-session join protocol.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the first joiner waits for the counterpart before the
    /// appointment is cancelled as a no-show.
    pub no_show_window: Duration,
    /// Presence lease time-to-live. A join flag whose lease is older than
    /// this reads as absent, whatever the flag says.
    pub presence_ttl: Duration,
    /// How often a joined party renews its lease.
    pub lease_renewal: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let ttl_ms = env_ms("MEDILINK_PRESENCE_TTL_MS", DEFAULT_PRESENCE_TTL_MS).max(3_000); // minimum 3 seconds
        SessionConfig {
            no_show_window: Duration::from_millis(
                env_ms("MEDILINK_NO_SHOW_WINDOW_MS", DEFAULT_NO_SHOW_WINDOW_MS).max(10_000),
            ),
            presence_ttl: Duration::from_millis(ttl_ms),
            // Three renewals per TTL keeps one missed heartbeat harmless.
            lease_renewal: Duration::from_millis((ttl_ms / 3).max(1_000)),
        }
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// Refresh policy for AI insight snapshots.
#[derive(Debug, Clone)]
pub struct InsightConfig {
    /// Transcripts shorter than this are never analyzed (chars).
    pub min_transcript_chars: usize,
    /// Growth since the last successful analysis that triggers an automatic
    /// refresh (chars, strictly greater-than).
    pub growth_trigger_chars: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        InsightConfig {
            min_transcript_chars: env_usize(
                "MEDILINK_MIN_TRANSCRIPT_CHARS",
                DEFAULT_MIN_TRANSCRIPT_CHARS,
            )
            .max(1),
            growth_trigger_chars: env_usize(
                "MEDILINK_INSIGHT_GROWTH_CHARS",
                DEFAULT_GROWTH_TRIGGER_CHARS,
            )
            .max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// AI credentials (medilink.toml)
// ---------------------------------------------------------------------------

/// User-editable AI settings persisted as `medilink.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiSettings {
    /// API key for the chat-completions endpoint.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model override; the bridge default is used when unset.
    #[serde(default)]
    pub model: Option<String>,
}

impl AiSettings {
    pub fn default_path() -> PathBuf {
        PathBuf::from("medilink.toml")
    }

    /// Load from the default path, creating a default file on first run so
    /// the user has something to edit.
    pub fn load() -> ClinicResult<Self> {
        Self::load_from_path(&Self::default_path())
    }

    pub fn load_from_path(path: &Path) -> ClinicResult<Self> {
        if !path.exists() {
            let settings = AiSettings::default();
            settings.save_to_path(path)?;
            return Ok(settings);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save_to_path(&self, path: &Path) -> ClinicResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolved API key: file first, then `MEDILINK_AI_API_KEY`, then
    /// `OPENROUTER_API_KEY`. Blank values are treated as unset.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("MEDILINK_AI_API_KEY").ok())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .filter(|s| !s.trim().is_empty())
    }

    /// Resolved model id: file first, then `MEDILINK_AI_MODEL`.
    pub fn get_model(&self) -> Option<String> {
        self.model
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("MEDILINK_AI_MODEL").ok())
            .filter(|s| !s.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_ms(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_config_respects_floors() {
        let config = MonitorConfig::default();
        assert!(config.poll_interval >= Duration::from_secs(1));
        assert!(config.tolerance >= Duration::from_secs(1));
        assert!(config.cooldown >= Duration::from_secs(1));
    }

    #[test]
    fn test_session_config_renewal_fits_ttl() {
        let config = SessionConfig::default();
        assert!(config.no_show_window >= Duration::from_secs(10));
        assert!(config.presence_ttl >= Duration::from_secs(3));
        // A lease must be renewable at least twice before it lapses.
        assert!(config.lease_renewal * 2 <= config.presence_ttl);
    }

    #[test]
    fn test_insight_config_floors() {
        let config = InsightConfig::default();
        assert!(config.min_transcript_chars >= 1);
        assert!(config.growth_trigger_chars >= 1);
    }

    #[test]
    fn test_ai_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medilink.toml");

        let settings = AiSettings {
            api_key: Some("sk-test".to_string()),
            model: Some("provider/model-x".to_string()),
        };
        settings.save_to_path(&path).unwrap();

        let loaded = AiSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("sk-test"));
        assert_eq!(loaded.get_model().as_deref(), Some("provider/model-x"));
    }

    #[test]
    fn test_ai_settings_created_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("medilink.toml");

        let settings = AiSettings::load_from_path(&path).unwrap();
        assert!(settings.api_key.is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_blank_api_key_in_file_is_unset() {
        let settings = AiSettings {
            api_key: Some("   ".to_string()),
            model: None,
        };
        // Blank file value must not shadow a real env fallback, and a file
        // key that is set wins outright.
        let set = AiSettings {
            api_key: Some("sk-live".to_string()),
            model: None,
        };
        assert_eq!(set.get_api_key().as_deref(), Some("sk-live"));
        assert!(settings.api_key.clone().filter(|s| !s.trim().is_empty()).is_none());
    }
}
