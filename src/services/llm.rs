use crate::core::config::{Config, LlmConfig};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一名拥有丰富经验的中文小说策划与写作助手。";
const DEFAULT_API_ERROR: &str = "AI 服务请求失败";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is not configured: {0}")]
    Config(String),
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("AI returned no content")]
    EmptyResponse,
}

/// Hint passed through as the request's `response_format`.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
}

/// One system+user exchange and the sampling settings it must be sent with.
#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub response_format: Option<ResponseFormat>,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// Whether every connection parameter needed by `chat` is present.
    fn is_ready(&self) -> bool {
        true
    }
}

pub fn create_llm(config: &Config) -> Box<dyn LlmClient> {
    Box::new(OpenAIClient::new(&config.llm))
}

/// Resolves the chat-completions URL from a user supplied base URL.
pub fn build_endpoint(base_url: &str) -> Result<String, LlmError> {
    let endpoint = base_url.trim();
    if endpoint.is_empty() {
        return Err(LlmError::Config("base URL is not set".to_string()));
    }
    let endpoint = endpoint.strip_suffix('/').unwrap_or(endpoint);
    if endpoint.ends_with("chat/completions") {
        Ok(endpoint.to_string())
    } else {
        Ok(format!("{}/chat/completions", endpoint))
    }
}

// --- OpenAI-compatible chat completions ---

#[derive(Debug)]
pub struct OpenAIClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, prompt: &Prompt) -> OpenAIRequest {
        let system = if prompt.system.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            prompt.system.clone()
        };

        OpenAIRequest {
            model: self.config.model.trim().to_string(),
            temperature: prompt.temperature,
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system,
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            response_format: prompt.response_format,
        }
    }
}

#[derive(Serialize, Debug)]
struct OpenAIRequest {
    model: String,
    temperature: f32,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize, Debug)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    error: Option<OpenAIError>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessageResponse>,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: Option<String>,
}

/// Maps an HTTP status and raw body to the reply text or a typed failure.
fn extract_content(status: StatusCode, body: &str) -> Result<String, LlmError> {
    let parsed: Option<OpenAIResponse> = serde_json::from_str(body).ok();

    if !status.is_success() {
        let message = parsed
            .as_ref()
            .and_then(|r| r.error.as_ref())
            .and_then(|e| e.message.clone())
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                let raw = body.trim();
                (!raw.is_empty()).then(|| raw.to_string())
            })
            .unwrap_or_else(|| DEFAULT_API_ERROR.to_string());
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let content = parsed
        .and_then(|r| r.choices.into_iter().next())
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content)
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, prompt: &Prompt) -> Result<String, LlmError> {
        if !self.config.is_ready() {
            return Err(LlmError::Config(
                "base URL, model and API key must all be set".to_string(),
            ));
        }

        let url = build_endpoint(&self.config.base_url)?;
        let request_body = self.build_request(prompt);
        debug!(
            "POST {} model={} temperature={}",
            url, request_body.model, request_body.temperature
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key.trim()))
            .json(&request_body)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                endpoint: url.clone(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| LlmError::Transport {
            endpoint: url.clone(),
            source,
        })?;

        extract_content(status, &body)
    }

    fn is_ready(&self) -> bool {
        self.config.is_ready()
    }
}
