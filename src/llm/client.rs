//! Blocking client for OpenAI-compatible chat completion endpoints.
//!
//! Works against any server implementing `POST /v1/chat/completions`:
//! LM Studio (`http://localhost:1234/v1`), Ollama, llama.cpp server, vLLM.

use crate::config::LlmConfig;
use crate::error::{Result, SageError};
use std::time::Duration;
use tracing::debug;

/// Sampling settings for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatOptions {
    /// Deterministic short answer, as classifiers want.
    #[must_use]
    pub fn classifier(max_tokens: u32) -> Self {
        Self {
            temperature: 0.0,
            max_tokens,
        }
    }
}

/// Non-streaming chat completion client.
pub struct ChatClient {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();

        let base = config.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        Self {
            agent,
            url: format!("{base}/v1/chat/completions"),
            model: config.api_model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Full endpoint URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Send a system + user message pair and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Llm`] on transport failure, a non-2xx status, or
    /// a reply without message content.
    pub fn complete(&self, system: &str, user: &str, options: ChatOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| SageError::Llm(format!("JSON serialization failed: {e}")))?;

        let mut req = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            let auth = format!("Bearer {}", self.api_key);
            req = req.set("Authorization", &auth);
        }

        let response = req.send_string(&body_str).map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                SageError::Llm(format!("API request failed with status {code}"))
            }
            other => SageError::Llm(format!("API request failed: {other}")),
        })?;
        let text = response
            .into_string()
            .map_err(|e| SageError::Llm(format!("read response: {e}")))?;
        let reply: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| SageError::Llm(format!("JSON parse error: {e}")))?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| SageError::Llm("response has no message content".to_owned()))?;
        debug!("chat completion returned {} chars", content.len());
        Ok(content.trim().to_owned())
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish_non_exhaustive()
    }
}
