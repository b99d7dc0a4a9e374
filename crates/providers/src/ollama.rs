use anyhow::{anyhow, Result};
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::Message;
use shared::models::{LocalModel, LocalModelListResponse};
use std::env;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("Could not connect to Ollama. Make sure it's running at {}", DEFAULT_OLLAMA_ENDPOINT)]
    Connection { url: String },

    #[error("Failed to fetch models from Ollama")]
    FetchFailed { reason: String },
}

/// Turn a user-supplied host into a base URL.
///
/// Empty input means the default local endpoint. A value with a scheme is
/// taken as-is, `host:port` gets `http://`, and a bare host also gets the
/// default port.
pub fn get_ollama_api_url(configured: Option<&str>) -> String {
    let host = match configured.map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => return DEFAULT_OLLAMA_ENDPOINT.to_string(),
    };

    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }

    if host.starts_with('[') {
        return if host.contains("]:") {
            format!("http://{}", host)
        } else {
            format!("http://{}:{}", host, DEFAULT_OLLAMA_PORT)
        };
    }

    match host.matches(':').count() {
        0 => format!("http://{}:{}", host, DEFAULT_OLLAMA_PORT),
        1 => format!("http://{}", host),
        // bare IPv6 address
        _ => format!("http://[{}]:{}", host, DEFAULT_OLLAMA_PORT),
    }
}

/// Base URL from `OLLAMA_HOST`, then the settings value, then the default.
/// An empty `OLLAMA_HOST` counts as unset.
pub fn resolve_ollama_api_url(settings_host: Option<&str>) -> String {
    let from_env = env::var("OLLAMA_HOST")
        .ok()
        .filter(|h| !h.trim().is_empty());
    get_ollama_api_url(from_env.as_deref().or(settings_host))
}

/// Human-friendly model name: "llama3.2:3b" -> "Llama 3 .2", "model1" -> "Model 1".
pub fn display_name(raw: &str) -> String {
    let base = raw.split(':').next().unwrap_or(raw).replace('-', " ");
    let spaced = FIRST_NUMBER.replacen(&base, 1, " $1 ");
    spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Option<Vec<OllamaModelEntry>>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelEntry {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

/// Streaming response: each line is one of these JSON objects.
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Done,
    Error(String),
}

pub struct OllamaClient {
    http: Client,
    base: String,
    model: String,
}

impl OllamaClient {
    /// Client for the host named by `OLLAMA_HOST` (or the default endpoint).
    pub fn new(model: String) -> Self {
        Self::with_base_url(resolve_ollama_api_url(None), model)
    }

    pub fn with_base_url(base: impl Into<String>, model: String) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// List installed models via `GET /api/tags`.
    pub async fn list_models(&self) -> std::result::Result<LocalModelListResponse, OllamaError> {
        let url = format!("{}/api/tags", self.base);
        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                error!("Could not reach Ollama at {}: {}", url, e);
                OllamaError::Connection { url: url.clone() }
            } else {
                error!("Model list request to {} failed: {}", url, e);
                OllamaError::FetchFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            error!("Ollama returned {} for {}", status, url);
            return Err(OllamaError::FetchFailed {
                reason: format!("HTTP {}", status),
            });
        }

        let body: OllamaTagsResponse = resp.json().await.map_err(|e| {
            error!("Unreadable model list from {}: {}", url, e);
            OllamaError::FetchFailed {
                reason: e.to_string(),
            }
        })?;

        let models: Vec<LocalModel> = body
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| LocalModel {
                display_name: display_name(&m.name),
                model_name: m.name,
                provider: "ollama".to_string(),
            })
            .collect();
        debug!("Ollama reported {} models", models.len());

        Ok(LocalModelListResponse { models })
    }

    pub async fn generate_stream(
        &self,
        messages: Vec<Message>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let conversation: Vec<OllamaMessage> = messages
            .into_iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect();
        let url = format!("{}/api/chat", self.base);
        let req = OllamaChatRequest {
            model: &self.model,
            messages: conversation,
            stream: true,
        };
        let resp = self.http.post(url).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("ollama error: {}", resp.status()));
        }

        // Ollama streams line-delimited JSON
        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| anyhow!("stream read error: {}", e))?;
            lines.push(&bytes);
            while let Some(line) = lines.next_line() {
                if forward_line(&line, &tx) {
                    return Ok(());
                }
            }
        }

        // Last line may lack its newline
        if forward_line(&lines.take_rest(), &tx) {
            return Ok(());
        }
        warn!("Ollama stream ended without a done marker");
        Ok(())
    }
}

/// Accumulates raw bytes and hands out complete lines. Bytes are only
/// decoded once a whole line is present, so a character split across
/// network reads stays intact.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    fn take_rest(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Forward one NDJSON line. Returns true once the stream is over.
fn forward_line(line: &[u8], tx: &UnboundedSender<StreamChunk>) -> bool {
    let line = line.trim_ascii();
    if line.is_empty() {
        return false;
    }

    match serde_json::from_slice::<OllamaStreamChunk>(line) {
        Ok(chunk_data) => {
            if let Some(err) = chunk_data.error {
                let _ = tx.send(StreamChunk::Error(err));
                return true;
            }
            if let Some(msg) = chunk_data.message {
                if !msg.content.is_empty() {
                    let _ = tx.send(StreamChunk::Text(msg.content));
                }
            }
            if chunk_data.done {
                let _ = tx.send(StreamChunk::Done);
                return true;
            }
            false
        }
        Err(e) => {
            warn!(
                "Unparseable Ollama stream line: {}",
                String::from_utf8_lossy(line)
            );
            let _ = tx.send(StreamChunk::Error(format!(
                "Failed to parse Ollama stream: {}",
                e
            )));
            true
        }
    }
}

/// List models from the host configured in the environment or settings.
pub async fn fetch_ollama_models(
    settings_host: Option<&str>,
) -> std::result::Result<LocalModelListResponse, OllamaError> {
    OllamaClient::with_base_url(resolve_ollama_api_url(settings_host), String::new())
        .list_models()
        .await
}
