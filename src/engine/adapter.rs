//! HTTP adapter for OpenAI-compatible chat completion endpoints.
//!
//! All engine variants go through this adapter; they differ only in the
//! configuration they hand it (base URL, model id, sampling defaults).

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// Errors that can occur when calling a backend.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Invalid request - permanent, don't retry.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backend returned an error payload - may be retryable.
    #[error("backend error: {message}")]
    Backend { message: String, retryable: bool },

    /// Rate limited - retryable after a pause.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, bad base URL, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl AdapterError {
    pub fn backend(message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            message: message.into(),
            retryable,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether retrying the call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => false,
            Self::Backend { retryable, .. } => *retryable,
            Self::RateLimited(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Config(_) => false,
        }
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Backend { .. } => "backend_error",
            Self::RateLimited(_) => "rate_limited",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }
}

/// A single chat call, already flattened to the wire shape the adapter sends.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub model: String,
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Raw outcome of a successful chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency: Duration,
}

/// Reqwest client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ChatAdapter {
    /// Create with an explicit base URL and optional bearer key.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| AdapterError::config("invalid API key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| AdapterError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Cheap reachability probe: HEAD the base URL with a short timeout.
    pub async fn probe(&self) -> bool {
        self.client
            .head(&self.base_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    pub async fn chat(&self, call: &ChatCall) -> Result<ChatOutcome, AdapterError> {
        let total_chars = call.user.len() + call.system.as_deref().map_or(0, str::len);
        if total_chars > MAX_INPUT_CHARS {
            return Err(AdapterError::InvalidRequest(format!(
                "input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &call.system {
            messages.push(ApiMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: call.user.clone(),
        });

        let api_req = ChatApiRequest {
            model: &call.model,
            messages: &messages,
            temperature: call.temperature,
            max_tokens: call.max_tokens,
        };

        let mut response = self.client.post(self.chat_url()).json(&api_req).send().await?;

        let status = response.status();

        // Stream response to enforce size limit.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(AdapterError::backend(
                    format!("response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AdapterError::RateLimited(Duration::from_secs(30)));
            }
            if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
                if let Some(error) = parsed.error {
                    return Err(AdapterError::backend(
                        error.message.unwrap_or_default(),
                        status.as_u16() >= 500,
                    ));
                }
            }
            return Err(AdapterError::backend(
                format!("HTTP {}", status.as_u16()),
                status.as_u16() >= 500,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::backend(format!("invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            return Err(AdapterError::backend(
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| AdapterError::backend("no choices in response", false))?;

        let mut content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.len() > MAX_RESPONSE_LEN {
            content.truncate(MAX_RESPONSE_LEN);
        }

        let (prompt_tokens, completion_tokens) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (None, None),
        };

        Ok(ChatOutcome {
            content,
            prompt_tokens,
            completion_tokens,
            latency: start.elapsed(),
        })
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}
