//! # murmur-inference
//!
//! Local LLM client for murmur. Talks to an Ollama-style endpoint
//! (`POST {base}/api/generate`, non-streaming) and assembles the per-kind
//! prompts. `quick-note` entries never touch the endpoint.

pub mod prompts;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use murmur_core::defaults::{LLM_NUM_PREDICT, LLM_TEMPERATURE};
use murmur_core::{EntryKind, Error, PromptAnswers, Result};

pub use prompts::{brain_dump_prompt, reflection_prompt, JOURNAL_SECTIONS};

/// Output of a generation run. `content` carries the structured journal
/// body (brain-dump); `reflection` carries the short paragraph
/// (daily-reflection). Quick notes produce neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
    pub content: Option<String>,
    pub reflection: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the local LLM endpoint.
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    user_name: String,
}

impl LlmClient {
    /// Create a client. No request timeout is set: generation time is
    /// unbounded on local hardware and failure comes from the transport.
    pub fn new(base_url: String, model: String, user_name: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            user_name,
        }
    }

    /// Generate the per-kind output for an entry.
    pub async fn generate(
        &self,
        transcript: &str,
        prompt_answers: &PromptAnswers,
        kind: EntryKind,
    ) -> Result<Generated> {
        match kind {
            EntryKind::QuickNote => Ok(Generated::default()),
            EntryKind::BrainDump => {
                let prompt = brain_dump_prompt(transcript, &self.user_name);
                let body = self.call(&prompt).await?;
                Ok(Generated {
                    content: Some(body),
                    reflection: None,
                })
            }
            EntryKind::DailyReflection => {
                let prompt = reflection_prompt(prompt_answers);
                let body = self.call(&prompt).await?;
                Ok(Generated {
                    content: None,
                    reflection: Some(body),
                })
            }
        }
    }

    /// Probe whether the endpoint answers at all (used by the
    /// prerequisites screen).
    pub async fn reachable(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, prompt_len = prompt.len(), "Calling LLM");

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: LLM_TEMPERATURE,
                    num_predict: LLM_NUM_PREDICT,
                },
            })
            .send()
            .await
            .map_err(|e| Error::Inference(format!("LLM request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "LLM endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Unparsable LLM response: {e}")))?;

        info!(
            model = %self.model,
            response_len = parsed.response.len(),
            "LLM generation complete"
        );
        Ok(parsed.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_quick_note_never_calls_the_endpoint() {
        // An unroutable base URL: any call would error.
        let client = LlmClient::new("http://127.0.0.1:1".into(), "m".into(), String::new());
        let out = client
            .generate("transcript", &HashMap::new(), EntryKind::QuickNote)
            .await
            .unwrap();
        assert_eq!(out, Generated::default());
    }

    #[tokio::test]
    async fn test_brain_dump_posts_generate_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.1:8b",
                "stream": false,
                "options": {"temperature": 0.7, "num_predict": 4096}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "## TL;DR\nGood day.\n"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "llama3.1:8b".into(), "Ada".into());
        let out = client
            .generate("long transcript", &HashMap::new(), EntryKind::BrainDump)
            .await
            .unwrap();

        assert_eq!(out.content.as_deref(), Some("## TL;DR\nGood day."));
        assert!(out.reflection.is_none());
    }

    #[tokio::test]
    async fn test_daily_reflection_returns_reflection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "I am grateful for coffee and quiet mornings."
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "m".into(), String::new());
        let mut answers: PromptAnswers = HashMap::new();
        answers.insert(
            murmur_core::PromptKey::Gratitude,
            murmur_core::PromptAnswer {
                text: "coffee".into(),
                ..Default::default()
            },
        );
        let out = client
            .generate("", &answers, EntryKind::DailyReflection)
            .await
            .unwrap();
        assert!(out.reflection.unwrap().contains("grateful"));
        assert!(out.content.is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_is_an_inference_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "m".into(), String::new());
        let err = client
            .generate("t", &HashMap::new(), EntryKind::BrainDump)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_inference_error() {
        let client = LlmClient::new("http://127.0.0.1:1".into(), "m".into(), String::new());
        let err = client
            .generate("t", &HashMap::new(), EntryKind::BrainDump)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }
}
