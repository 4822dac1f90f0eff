//! AI bridge for consultation intelligence.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (OpenRouter by
//! default) for live insights, post-consultation extraction, layman
//! explanations, and medication spell-checking. Construct with
//! [`InsightBridge::from_settings`]; when no key is configured the callers
//! fall back to [`PlaceholderInsights`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AiSettings;
use crate::error::{ClinicError, ClinicResult};
use crate::model::{InsightSnapshot, MedicalExtraction, Severity};

const AI_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Source of live insight snapshots. Implemented by [`InsightBridge`];
/// tests and keyless deployments plug in scripted sources.
#[async_trait]
pub trait InsightSource: Send + Sync {
    async fn live_insights(&self, transcript: &str) -> ClinicResult<InsightSnapshot>;
}

/// Strip a ```json fence (or bare ```) wrapper that models sometimes add
/// around JSON output.
fn strip_json_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    for marker in ["```json", "```JSON", "```"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            let rest = rest.trim_start();
            if let Some(inner) = rest.strip_suffix("```") {
                return inner.trim();
            }
            return rest.trim();
        }
    }
    trimmed
}

/// Chat-completions client for consultation intelligence.
pub struct InsightBridge {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl InsightBridge {
    /// Build from `medilink.toml` plus env fallbacks. Returns `None` when no
    /// usable API key is configured anywhere.
    pub fn from_settings() -> Option<Self> {
        let settings = AiSettings::load().unwrap_or_default();
        let api_key = settings
            .get_api_key()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())?;

        let bridge = Self::new(api_key);
        Some(match settings.get_model() {
            Some(model) => bridge.with_model(&model),
            None => bridge,
        })
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str, json_output: bool) -> ClinicResult<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: if json_output { None } else { Some(0.7) },
            max_tokens: Some(1024),
            response_format: if json_output {
                Some(ResponseFormat {
                    format: "json_object".to_string(),
                })
            } else {
                None
            },
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", AI_API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://medilink.example")
            .header("X-Title", "MediLink")
            .json(&request)
            .send()
            .await
            .map_err(|e| ClinicError::Ai(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ClinicError::Ai(format!("API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| ClinicError::AiResponse(format!("response decode failed: {}", e)))?;

        Ok(parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    /// Regenerate the live clinical view of an in-progress consultation.
    pub async fn live_insights(&self, transcript: &str) -> ClinicResult<InsightSnapshot> {
        let system = r#"You are a clinical assistant observing a live doctor-patient consultation.
Analyze the transcript and return ONLY a JSON object with this structure:
{
    "severity": "LOW|NORMAL|HIGH|CRITICAL",
    "detectedSymptoms": ["symptom"],
    "redFlags": ["urgent finding, if any"],
    "suggestedQuestions": ["question the doctor should ask next"],
    "preliminaryDiagnosis": "short working impression"
}"#;
        let user = format!("TRANSCRIPT: \"{}\"", transcript);

        let raw = self.complete(system, &user, true).await?;
        let cleaned = strip_json_fences(&raw);
        let snapshot: InsightSnapshot = serde_json::from_str(cleaned)
            .map_err(|e| ClinicError::AiResponse(format!("insight JSON parse failed: {}", e)))?;
        debug!(
            target: "medilink::ai",
            severity = snapshot.severity.as_str(),
            symptoms = snapshot.detected_symptoms.len(),
            "Insight snapshot generated"
        );
        Ok(snapshot)
    }

    /// Structured extraction for the prescription workflow. Never fails the
    /// caller: a blank transcript yields the canonical empty shape, and any
    /// request or parse failure yields the manual-review shape.
    pub async fn extract_medical_info(&self, transcript: &str) -> MedicalExtraction {
        if transcript.trim().is_empty() {
            return MedicalExtraction::empty();
        }

        let system = r#"Analyze this doctor-patient conversation and extract key information.
Return ONLY a JSON object with this structure:
{
    "symptoms": "comma-separated list",
    "diagnosis": "likely diagnosis",
    "severity": "NORMAL",
    "medications": [{"name": "...", "dosage": "...", "frequency": "...", "duration": "...", "timing": "...", "instructions": "..."}],
    "labTests": ["test1", "test2"],
    "instructions": "care instructions",
    "followUpDays": 7
}"#;
        let user = format!("TRANSCRIPT: \"{}\"", transcript);

        match self.complete(system, &user, true).await {
            Ok(raw) => {
                let cleaned = strip_json_fences(&raw);
                match serde_json::from_str::<MedicalExtraction>(cleaned) {
                    Ok(extraction) => extraction,
                    Err(e) => {
                        warn!(target: "medilink::ai", error = %e, "Extraction JSON parse failed");
                        MedicalExtraction::manual_review("JSON Parsing Error")
                    }
                }
            }
            Err(e) => {
                warn!(target: "medilink::ai", error = %e, "Medical extraction failed");
                MedicalExtraction::manual_review(&e.to_string())
            }
        }
    }

    /// Plain-language explanation of a medical term or report. Always
    /// returns something displayable.
    pub async fn layman_explanation(&self, query: &str) -> String {
        if query.trim().is_empty() {
            return "Please ask a specific medical question.".to_string();
        }

        let system =
            "Explain this medical concept to a patient in simple language (max 2 sentences):";
        match self.complete(system, query.trim(), false).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => "I couldn't generate an explanation at this time.".to_string(),
            Err(e) => {
                warn!(target: "medilink::ai", error = %e, "Layman explanation failed");
                "I'm having trouble connecting to the AI assistant right now.".to_string()
            }
        }
    }

    /// Spell-correct a medication name. Returns the input unchanged when the
    /// model is unavailable or answers with nothing usable.
    pub async fn correct_medication_spelling(&self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            return String::new();
        }

        let system = "Correct the spelling of this medication. Return ONLY the corrected name.";
        match self.complete(system, name, false).await {
            Ok(text) => {
                let corrected = text.trim().trim_matches('"').trim();
                if corrected.is_empty() {
                    name.to_string()
                } else {
                    corrected.to_string()
                }
            }
            Err(e) => {
                debug!(target: "medilink::ai", error = %e, "Spelling correction failed; keeping input");
                name.to_string()
            }
        }
    }
}

#[async_trait]
impl InsightSource for InsightBridge {
    async fn live_insights(&self, transcript: &str) -> ClinicResult<InsightSnapshot> {
        InsightBridge::live_insights(self, transcript).await
    }
}

/// Fixed-snapshot source for deployments without an API key, mirroring the
/// consultation screen's own fallback copy.
pub struct PlaceholderInsights {
    snapshot: InsightSnapshot,
}

impl PlaceholderInsights {
    pub fn new() -> Self {
        Self {
            snapshot: InsightSnapshot {
                severity: Severity::Normal,
                detected_symptoms: Vec::new(),
                red_flags: Vec::new(),
                suggested_questions: vec!["Ask about symptom duration".to_string()],
                preliminary_diagnosis: "Assessing...".to_string(),
            },
        }
    }

    pub fn with_snapshot(snapshot: InsightSnapshot) -> Self {
        Self { snapshot }
    }
}

impl Default for PlaceholderInsights {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InsightSource for PlaceholderInsights {
    async fn live_insights(&self, _transcript: &str) -> ClinicResult<InsightSnapshot> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_variants() {
        assert_eq!(strip_json_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("  ```json\n{\"a\":1}\n```  "), "{\"a\":1}");
        // Unterminated fence still yields the payload.
        assert_eq!(strip_json_fences("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_with_model_overrides_default() {
        let bridge = InsightBridge::new("k".to_string()).with_model("provider/custom");
        assert_eq!(bridge.model(), "provider/custom");
    }

    #[tokio::test]
    async fn test_blank_transcript_extracts_empty_shape() {
        // Short-circuits before any request is made.
        let bridge = InsightBridge::new("k".to_string());
        let extraction = bridge.extract_medical_info("   ").await;
        assert_eq!(extraction, MedicalExtraction::empty());
        assert_eq!(extraction.symptoms, "No symptoms recorded");
    }

    #[tokio::test]
    async fn test_blank_query_gets_fixed_prompt() {
        let bridge = InsightBridge::new("k".to_string());
        assert_eq!(
            bridge.layman_explanation("  ").await,
            "Please ask a specific medical question."
        );
        assert_eq!(bridge.correct_medication_spelling(" ").await, "");
    }

    #[tokio::test]
    async fn test_placeholder_returns_snapshot() {
        let source = PlaceholderInsights::new();
        let snapshot = source.live_insights("anything").await.unwrap();
        assert_eq!(snapshot.severity, Severity::Normal);
        assert_eq!(snapshot.preliminary_diagnosis, "Assessing...");
    }

    #[tokio::test]
    async fn test_placeholder_with_custom_snapshot() {
        let custom = InsightSnapshot {
            severity: Severity::High,
            detected_symptoms: vec!["fever".to_string()],
            ..Default::default()
        };
        let source = PlaceholderInsights::with_snapshot(custom.clone());
        assert_eq!(source.live_insights("t").await.unwrap(), custom);
    }
}
