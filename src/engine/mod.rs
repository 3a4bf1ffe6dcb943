//! Engine abstraction and registry.
//!
//! Every backend variant implements [`Engine`]; the factory is the single
//! place where "which backend am I talking to" becomes a closed,
//! exhaustively-handled choice. Adding a variant means one new enum case
//! and one new factory arm, never scattered conditionals.

pub mod adapter;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::runner::{EngineResponse, PromptRequest, TokenUsage};

pub use adapter::{AdapterError, ChatAdapter, ChatCall, ChatOutcome};

/// Default transport timeout for engine HTTP clients.
const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Closed set of engine variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Remote frontier-class model (slow, expensive, high quality).
    RemoteLarge,
    /// Remote small/cheap model.
    RemoteSmall,
    /// Locally-hosted model (Ollama-style endpoint).
    Local,
    /// User-defined backend; fallback for unresolvable names.
    Custom,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::RemoteLarge => "remote-large",
            EngineKind::RemoteSmall => "remote-small",
            EngineKind::Local => "local",
            EngineKind::Custom => "custom",
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Registry name the caller used (e.g. "gpt-4o", "ollama:llama3").
    pub name: String,
    /// Model id sent on the wire.
    pub model: String,
    /// Base URL of the chat-completions endpoint.
    pub base_url: String,
    pub kind: EngineKind,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>, kind: EngineKind) -> Self {
        let base_url = match kind {
            EngineKind::Local => local_base_url(),
            _ => remote_base_url(),
        };
        Self {
            name: name.into(),
            model: model.into(),
            base_url,
            kind,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

fn remote_base_url() -> String {
    std::env::var("CHORUS_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into())
}

fn local_base_url() -> String {
    std::env::var("CHORUS_LOCAL_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".into())
}

fn api_key() -> Option<String> {
    std::env::var("CHORUS_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok()
}

/// Capability contract every backend variant satisfies.
///
/// `execute` must not fail for ordinary remote errors: transport faults,
/// backend error payloads, and malformed responses are all captured into
/// [`EngineResponse::error`] so a single engine's trouble never becomes a
/// raised fault inside the orchestrator.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(&self, request: &PromptRequest) -> EngineResponse;

    /// Cheap reachability/configuration check.
    async fn is_available(&self) -> bool;

    fn config(&self) -> &EngineConfig;

    fn name(&self) -> &str {
        &self.config().name
    }
}

// =============================================================================
// VARIANTS
// =============================================================================

/// Shared dispatch path: one chat call, outcome normalized into a response.
async fn run_chat(adapter: &ChatAdapter, config: &EngineConfig, request: &PromptRequest) -> EngineResponse {
    let start = Instant::now();
    let call = ChatCall {
        model: config.model.clone(),
        system: request.system_prompt.clone(),
        user: request.prompt.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    match adapter.chat(&call).await {
        Ok(outcome) => {
            let token_usage = match (outcome.prompt_tokens, outcome.completion_tokens) {
                (Some(p), Some(c)) => Some(TokenUsage {
                    prompt_tokens: p,
                    completion_tokens: c,
                    total_tokens: p + c,
                }),
                _ => None,
            };
            EngineResponse {
                content: outcome.content,
                model: config.model.clone(),
                engine: config.name.clone(),
                timestamp: Utc::now(),
                execution_time_ms: outcome.latency.as_millis() as u64,
                token_usage,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(
                engine = %config.name,
                code = e.code(),
                error = %e,
                "Engine call failed"
            );
            EngineResponse::failure(&config.name, &config.model, e.to_string(), start.elapsed())
        }
    }
}

/// State every variant carries: its config plus a ready HTTP client.
struct Backend {
    config: EngineConfig,
    adapter: ChatAdapter,
    has_key: bool,
}

impl Backend {
    fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        let key = api_key();
        let adapter = ChatAdapter::new(
            config.base_url.clone(),
            key.as_deref(),
            DEFAULT_TRANSPORT_TIMEOUT,
        )?;
        Ok(Self {
            config,
            adapter,
            has_key: key.is_some(),
        })
    }
}

/// Remote frontier-class backend.
pub struct RemoteLargeEngine {
    backend: Backend,
}

impl RemoteLargeEngine {
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            backend: Backend::new(config)?,
        })
    }
}

#[async_trait]
impl Engine for RemoteLargeEngine {
    async fn execute(&self, request: &PromptRequest) -> EngineResponse {
        run_chat(&self.backend.adapter, &self.backend.config, request).await
    }

    async fn is_available(&self) -> bool {
        self.backend.has_key
    }

    fn config(&self) -> &EngineConfig {
        &self.backend.config
    }
}

/// Remote small/cheap backend.
pub struct RemoteSmallEngine {
    backend: Backend,
}

impl RemoteSmallEngine {
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            backend: Backend::new(config)?,
        })
    }
}

#[async_trait]
impl Engine for RemoteSmallEngine {
    async fn execute(&self, request: &PromptRequest) -> EngineResponse {
        run_chat(&self.backend.adapter, &self.backend.config, request).await
    }

    async fn is_available(&self) -> bool {
        self.backend.has_key
    }

    fn config(&self) -> &EngineConfig {
        &self.backend.config
    }
}

/// Locally-hosted backend (Ollama-compatible endpoint). Needs no API key;
/// availability means the local runtime answers on its port.
pub struct LocalEngine {
    backend: Backend,
}

impl LocalEngine {
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            backend: Backend::new(config)?,
        })
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn execute(&self, request: &PromptRequest) -> EngineResponse {
        run_chat(&self.backend.adapter, &self.backend.config, request).await
    }

    async fn is_available(&self) -> bool {
        self.backend.adapter.probe().await
    }

    fn config(&self) -> &EngineConfig {
        &self.backend.config
    }
}

/// User-defined backend; uses whatever endpoint the config names.
pub struct CustomEngine {
    backend: Backend,
}

impl CustomEngine {
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            backend: Backend::new(config)?,
        })
    }
}

#[async_trait]
impl Engine for CustomEngine {
    async fn execute(&self, request: &PromptRequest) -> EngineResponse {
        run_chat(&self.backend.adapter, &self.backend.config, request).await
    }

    async fn is_available(&self) -> bool {
        !self.backend.config.base_url.is_empty()
    }

    fn config(&self) -> &EngineConfig {
        &self.backend.config
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Resolve an engine name to a variant kind.
///
/// Known default names first, then naming-convention sniffing (vendor
/// prefixes, small-model markers, local-runtime markers). Anything
/// unresolvable falls back to [`EngineKind::Custom`].
pub fn resolve_kind(name: &str) -> EngineKind {
    let lower = name.to_ascii_lowercase();

    match lower.as_str() {
        "gpt-4o" | "gpt-4-turbo" | "claude-3-5-sonnet" | "claude-sonnet" => {
            return EngineKind::RemoteLarge
        }
        "gpt-4o-mini" | "claude-3-5-haiku" | "claude-haiku" => return EngineKind::RemoteSmall,
        "llama3" | "mistral" | "phi3" => return EngineKind::Local,
        _ => {}
    }

    if lower.starts_with("ollama:") || lower.contains("local") {
        EngineKind::Local
    } else if lower.contains("mini") || lower.contains("haiku") || lower.contains("flash") {
        EngineKind::RemoteSmall
    } else if lower.starts_with("gpt")
        || lower.starts_with("claude")
        || lower.starts_with("openai/")
        || lower.starts_with("anthropic/")
    {
        EngineKind::RemoteLarge
    } else {
        EngineKind::Custom
    }
}

/// Instantiate an engine for a registry name with default configuration.
pub fn create_engine(name: &str) -> Result<Arc<dyn Engine>, AdapterError> {
    let kind = resolve_kind(name);
    let model = name.strip_prefix("ollama:").unwrap_or(name).to_string();
    create_engine_with_config(EngineConfig::new(name, model, kind))
}

/// Instantiate an engine from an explicit configuration.
pub fn create_engine_with_config(config: EngineConfig) -> Result<Arc<dyn Engine>, AdapterError> {
    Ok(match config.kind {
        EngineKind::RemoteLarge => Arc::new(RemoteLargeEngine::new(config)?),
        EngineKind::RemoteSmall => Arc::new(RemoteSmallEngine::new(config)?),
        EngineKind::Local => Arc::new(LocalEngine::new(config)?),
        EngineKind::Custom => Arc::new(CustomEngine::new(config)?),
    })
}
