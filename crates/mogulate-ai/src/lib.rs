//! # Mogulate generators
//!
//! Clients for the two external generative APIs the wizard relies on:
//!
//! - a chat-completion provider (OpenAI) for market-gap analysis, feature
//!   planning and validation plans
//! - a web-search-grounded provider (Perplexity) for competitor discovery
//!
//! Both speak the same chat-completions wire format, so one [`ChatClient`]
//! serves both, configured with a [`Provider`].
//!
//! ```rust,no_run
//! use mogulate_ai::{ChatClient, Generator, Provider, prompts};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ChatClient::new(Provider::Perplexity, "pplx-key", Duration::from_secs(30))?;
//! let completion = client.complete(&prompts::competitors("a bakery for dogs", 3)).await?;
//! let competitors = mogulate_ai::parse::competitors(&completion.content)?;
//! # Ok(())
//! # }
//! ```

pub mod parse;
pub mod prompts;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generator request failed: {0}")]
    Transport(String),
    #[error("Generator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Generator timed out")]
    Timeout,
    #[error("Malformed generator output: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Perplexity,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Perplexity => "https://api.perplexity.ai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Perplexity => "sonar",
        }
    }
}

/// A fully built request for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Raw text output plus the resource cost the provider reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn provider(&self) -> Provider;
    async fn complete(&self, prompt: &Prompt) -> Result<Completion>;
}

/// Chat-completions client for OpenAI-compatible providers.
pub struct ChatClient {
    client: Client,
    provider: Provider,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

impl ChatClient {
    pub fn new(provider: Provider, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            provider,
            base_url: provider.default_base_url().to_string(),
            api_key: api_key.to_string(),
            model: provider.default_model().to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl Generator for ChatClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(provider = ?self.provider, status, "Generator returned an error status");
            return Err(GenerationError::Status { status, body });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(format!("Invalid completion envelope: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Malformed("Completion had no content".to_string()))?;
        let tokens_used = body.usage.map(|u| u.total_tokens).unwrap_or(0);

        debug!(provider = ?self.provider, tokens_used, "Completion received");
        Ok(Completion {
            content,
            tokens_used,
        })
    }
}
