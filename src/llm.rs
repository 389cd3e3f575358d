//! Text generation over an OpenAI-compatible chat-completions API
//!
//! The analysis run only needs "role-tagged prompt in, text out", so the
//! [`TextGenerator`] trait is the seam; [`ChatClient`] is the HTTP
//! implementation and tests substitute canned responses.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A prompt plus sampling parameters. Unset parameters use the provider default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromptRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl PromptRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn penalties(mut self, frequency: f32, presence: f32) -> Self {
        self.frequency_penalty = Some(frequency);
        self.presence_penalty = Some(presence);
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: PromptRequest) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    prompt: &'a PromptRequest,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client (DeepSeek by default).
pub struct ChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    /// Build a client; fails when the configured API-key variable is unset.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            HarvestError::Config(format!(
                "{} environment variable is not set",
                config.api_key_env
            ))
        })?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn generate(&self, request: PromptRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            prompt: &request,
        };

        debug!("Sending {} messages to {}", request.messages.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HarvestError::Generation(format!("HTTP {}: {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Generation(format!("invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| HarvestError::Generation("response had no content".into()))
    }
}

/// Strip a ```json fence when the reply carries one; otherwise return the text trimmed.
pub fn extract_json_block(text: &str) -> &str {
    match text.split_once("```json") {
        Some((_, rest)) => rest.split("```").next().unwrap_or(rest).trim(),
        None => text.trim(),
    }
}
