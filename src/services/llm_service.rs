use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::OperationVocabulary;

/// Failures of the text-generation collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("Text generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Text generation refused: {0}")]
    Refusal(String),

    #[error("Malformed generation response: {0}")]
    Malformed(String),

    #[error("Failed to reach text generation gateway: {0}")]
    Transport(String),

    #[error("Text generation gateway is not configured")]
    NotConfigured,

    #[error("Text generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },
}

impl GenerationError {
    /// Timeouts and transport failures may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Timeout(_) | GenerationError::Transport(_))
    }
}

/// Opaque text → text function
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, constraints: &OperationVocabulary) -> Result<String, GenerationError>;
}

/// Per-call timeout and bounded retries around a [`TextGenerator`]
#[derive(Debug, Clone, Copy)]
pub struct GenerationPolicy {
    pub timeout: Duration,
    pub max_retries: usize,
}

impl GenerationPolicy {
    pub fn new(timeout: Duration, max_retries: usize) -> Self {
        Self { timeout, max_retries }
    }

    pub async fn run(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        constraints: &OperationVocabulary,
    ) -> Result<String, GenerationError> {
        let attempts = self.max_retries + 1;
        let mut last = GenerationError::NotConfigured;
        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(self.timeout, generator.generate(prompt, constraints)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(self.timeout)),
            };
            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() => {
                    warn!("Generation attempt {}/{} failed: {}", attempt, attempts, err);
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(GenerationError::RetriesExhausted {
            attempts,
            last: last.to_string(),
        })
    }
}

/// Remove a surrounding markdown code fence, keeping only its body
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_open = &trimmed[start + 3..];
    // Language tag runs to the end of the opening line
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

/// HTTP gateway client for the text-generation collaborator
pub struct LlmService {
    gateway_url: Option<String>,
    api_key: Option<String>,
    model: String,
    http_client: HttpClient,
}

impl LlmService {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            gateway_url: Some(config.gateway_url.trim().to_string()).filter(|u| !u.is_empty()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http_client: HttpClient::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.gateway_url.is_some()
    }

    fn extract_text(body: &Value) -> Result<String, GenerationError> {
        if let Some(refusal) = body["refusal"].as_str().filter(|r| !r.is_empty()) {
            return Err(GenerationError::Refusal(refusal.to_string()));
        }
        if body["finish_reason"].as_str() == Some("content_filter") {
            return Err(GenerationError::Refusal("response withheld by content filter".to_string()));
        }
        let text = body["text"]
            .as_str()
            .or_else(|| body["content"].as_str())
            .or_else(|| body["response"].as_str())
            .ok_or_else(|| GenerationError::Malformed("response does not contain generated text".to_string()))?;
        let cleaned = strip_code_fences(text);
        if cleaned.is_empty() {
            return Err(GenerationError::Refusal("empty completion".to_string()));
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl TextGenerator for LlmService {
    async fn generate(&self, prompt: &str, constraints: &OperationVocabulary) -> Result<String, GenerationError> {
        let gateway_url = self.gateway_url.as_ref().ok_or(GenerationError::NotConfigured)?;

        let system = format!(
            "Reply with a single JSON object describing an analysis routine. Use only these operations.\n{}",
            constraints.describe()
        );

        let mut request = self.http_client.post(gateway_url).json(&json!({
            "model": self.model,
            "system": system,
            "prompt": prompt,
            "max_tokens": 800,
            "temperature": 0.0,
        }));

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(Duration::ZERO)
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                GenerationError::Transport(format!("gateway returned {}: {}", status, error_text))
            } else {
                GenerationError::Refusal(format!("gateway returned {}: {}", status, error_text))
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(format!("invalid JSON body: {}", e)))?;

        let text = Self::extract_text(&body)?;
        debug!("Generated {} characters of routine text", text.len());
        Ok(text)
    }
}
