use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::FixError;
use crate::json::{self, Scalar};
use crate::rank::{self, CandidateModel};

pub const DEFAULT_REMOTE_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LOCAL_BASE: &str = "http://localhost:11434/api";
pub const REMOTE_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-style chat completions behind a bearer credential.
    Remote,
    /// Local chat server, no credential.
    Local,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Remote => "openrouter",
            ProviderKind::Local => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of one HTTP round trip, whatever its status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One backend wire protocol. `send` performs exactly one round trip and never
/// retries; retrying is the orchestrator's job.
#[async_trait]
pub trait ModelProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn requires_credential(&self) -> bool;

    fn build_request(&self, model: &str, prompt_prefix: &str, input: &str) -> String;

    async fn send(&self, model: &str, wire: String, credential: Option<&str>, timeout: Duration) -> Result<RawResponse, FixError>;

    fn extract_content(&self, body: &str) -> Option<String>;

    fn extract_error(&self, body: &str) -> Option<String>;

    async fn list_models(&self, credential: Option<&str>, timeout: Duration) -> Result<Vec<CandidateModel>, FixError>;
}

pub struct RemoteAdapter {
    http: Client,
    base: String,
    temperature: f64,
}

impl RemoteAdapter {
    pub fn new(base: impl Into<String>, temperature: f64) -> anyhow::Result<Self> {
        Ok(Self { http: Client::builder().build()?, base: trim_base(base.into()), temperature })
    }
}

#[async_trait]
impl ModelProviderAdapter for RemoteAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn requires_credential(&self) -> bool {
        true
    }

    fn build_request(&self, model: &str, prompt_prefix: &str, input: &str) -> String {
        let content = format!("{prompt_prefix}{input}");
        json::encode_request(model, &content, &[("temperature", Scalar::Float(self.temperature))])
    }

    async fn send(&self, model: &str, wire: String, credential: Option<&str>, timeout: Duration) -> Result<RawResponse, FixError> {
        let key = credential.filter(|k| !k.trim().is_empty()).ok_or_else(|| FixError::MissingCredential {
            provider: self.kind().name().to_string(),
            env_var: REMOTE_KEY_ENV.to_string(),
        })?;
        let url = format!("{}/chat/completions", self.base);
        debug!(%url, model, bytes = wire.len(), "sending chat request");
        let request = self
            .http
            .post(&url)
            .bearer_auth(key)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(wire);
        round_trip(request, self.kind(), model, &url, timeout).await
    }

    fn extract_content(&self, body: &str) -> Option<String> {
        json::extract_field(body, "content")
    }

    /// `{"error": {"message": ..}}`; the message is searched only after the
    /// `"error"` key so a success body's `"message"` object is never read.
    fn extract_error(&self, body: &str) -> Option<String> {
        let at = body.find("\"error\"")?;
        json::extract_field(&body[at..], "message").or_else(|| json::extract_field(&body[at..], "error"))
    }

    async fn list_models(&self, credential: Option<&str>, timeout: Duration) -> Result<Vec<CandidateModel>, FixError> {
        let url = format!("{}/models", self.base);
        let mut request = self.http.get(&url).timeout(timeout);
        if let Some(key) = credential.filter(|k| !k.trim().is_empty()) {
            request = request.bearer_auth(key);
        }
        let body = fetch_catalog(request, self.kind(), &url).await?;
        Ok(rank::parse_remote_catalog(&body))
    }
}

pub struct LocalAdapter {
    http: Client,
    base: String,
}

impl LocalAdapter {
    pub fn new(base: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self { http: Client::builder().build()?, base: trim_base(base.into()) })
    }
}

#[async_trait]
impl ModelProviderAdapter for LocalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn build_request(&self, model: &str, prompt_prefix: &str, input: &str) -> String {
        let content = format!("{prompt_prefix}{input}");
        json::encode_request(model, &content, &[("stream", Scalar::Bool(false))])
    }

    async fn send(&self, model: &str, wire: String, _credential: Option<&str>, timeout: Duration) -> Result<RawResponse, FixError> {
        let url = format!("{}/chat", self.base);
        debug!(%url, model, bytes = wire.len(), "sending chat request");
        let request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(wire);
        round_trip(request, self.kind(), model, &url, timeout).await
    }

    fn extract_content(&self, body: &str) -> Option<String> {
        json::extract_field(body, "content")
    }

    /// `{"error": "model 'x' not found"}`
    fn extract_error(&self, body: &str) -> Option<String> {
        json::extract_field(body, "error")
    }

    async fn list_models(&self, _credential: Option<&str>, timeout: Duration) -> Result<Vec<CandidateModel>, FixError> {
        let url = format!("{}/tags", self.base);
        let body = fetch_catalog(self.http.get(&url).timeout(timeout), self.kind(), &url).await?;
        Ok(rank::parse_local_catalog(&body))
    }
}

async fn round_trip(
    request: reqwest::RequestBuilder,
    provider: ProviderKind,
    model: &str,
    url: &str,
    timeout: Duration,
) -> Result<RawResponse, FixError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, provider, model, url, timeout))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, provider, model, url, timeout))?;
    debug!(provider = %provider, model, status, bytes = body.len(), "response received");
    trace!(body = %body, "raw response");
    Ok(RawResponse { status, body })
}

fn transport_error(e: reqwest::Error, provider: ProviderKind, model: &str, url: &str, timeout: Duration) -> FixError {
    if e.is_timeout() {
        FixError::Timeout {
            provider: provider.name().to_string(),
            model: model.to_string(),
            after_ms: timeout.as_millis() as u64,
        }
    } else if e.is_connect() {
        FixError::Unreachable { provider: provider.name().to_string(), url: url.to_string() }
    } else {
        FixError::Transport {
            provider: provider.name().to_string(),
            model: model.to_string(),
            message: e.to_string(),
        }
    }
}

async fn fetch_catalog(request: reqwest::RequestBuilder, provider: ProviderKind, url: &str) -> Result<serde_json::Value, FixError> {
    let catalog_error = |message: String| FixError::Catalog { provider: provider.name().to_string(), message };
    let response = request.send().await.map_err(|e| {
        if e.is_connect() {
            FixError::Unreachable { provider: provider.name().to_string(), url: url.to_string() }
        } else {
            catalog_error(e.to_string())
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(catalog_error(format!("{status}: {}", preview(&text, 200))));
    }
    response.json().await.map_err(|e| catalog_error(format!("failed to parse catalog: {e}")))
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

/// First `max` characters of `text`, with `...` when cut.
pub fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

/// Adapters available for this run, keyed by provider.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    map: HashMap<ProviderKind, Arc<dyn ModelProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(remote_base: &str, local_base: &str, temperature: f64) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.insert(Arc::new(RemoteAdapter::new(remote_base, temperature)?));
        registry.insert(Arc::new(LocalAdapter::new(local_base)?));
        Ok(registry)
    }

    pub fn insert(&mut self, adapter: Arc<dyn ModelProviderAdapter>) {
        self.map.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ModelProviderAdapter>> {
        self.map.get(&kind).cloned()
    }
}
