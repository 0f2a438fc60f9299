//! Chat-completion client used by scheduled-task executors to turn gathered
//! content into a short summary.
//!
//! Configuration:
//! - `OPENAI_API_KEY`: API key for the chat-completion endpoint
//! - `OPENAI_API_URL`: Base URL (default: `https://api.openai.com/v1`)
//! - `SUMMARY_MODEL`: Model to use (default: `gpt-4o-mini`)

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default chat-completion API URL
const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Default summarization model
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// The only provider this client speaks to; foreign provider hints are ignored.
const PROVIDER: &str = "openai";

/// Timeout for summarization requests
const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum completion tokens requested per summary
const MAX_COMPLETION_TOKENS: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("summarizer returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("summarizer returned no choices")]
    EmptyResponse,
}

/// Configuration for the summarization client
#[derive(Debug, Clone)]
pub struct SummarizeConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl SummarizeConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_url: env::var("OPENAI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            model: env::var("SUMMARY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }
}

/// One summarization request.
#[derive(Debug, Clone)]
pub struct SummarizeParams {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Per-task model override; `None` uses the configured model.
    pub model: Option<String>,
    /// Per-task provider hint; anything other than `openai` is ignored.
    pub provider: Option<String>,
}

/// Client for the chat-completion collaborator.
#[derive(Debug, Clone)]
pub struct SummarizeClient {
    config: SummarizeConfig,
    client: Client,
}

impl SummarizeClient {
    /// The timeout bounds every request; a client that cannot carry it is a
    /// construction error, not a fallback.
    pub fn new(config: SummarizeConfig) -> Result<Self, SummarizeError> {
        let client = Client::builder().timeout(SUMMARIZE_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, SummarizeError> {
        Self::new(SummarizeConfig::from_env())
    }

    /// Run one summarization round-trip and return the completion text.
    pub async fn summarize(&self, params: &SummarizeParams) -> Result<String, SummarizeError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(SummarizeError::MissingApiKey)?;

        if let Some(provider) = params.provider.as_deref() {
            if !provider.eq_ignore_ascii_case(PROVIDER) {
                warn!(
                    "ignoring unsupported provider hint '{}', using {}",
                    provider, PROVIDER
                );
            }
        }
        let model = params
            .model
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.config.model.clone());

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: params.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: params.user_prompt.clone(),
                },
            ],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
        };

        debug!("calling summarizer: {} with model {}", url, request.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Status { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(SummarizeError::EmptyResponse)?;

        Ok(content)
    }
}

/// Request body for the chat-completion endpoint
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the chat-completion endpoint
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
