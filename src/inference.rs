// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Chat-completion client for a local inference server (LM Studio and
//! other OpenAI-compatible servers)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{LmscribeError, Result};

/// Chat-completion route, relative to the endpoint
pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Default bound on establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prompt used by connection probes
pub const PROBE_PROMPT: &str = "Reply with OK.";

/// Read timeout used by connection probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single completion request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Could not connect in time; the server is likely not running
    #[error("server unreachable at {endpoint}")]
    ConnectTimeout { endpoint: String },

    /// Connected, but no full response arrived in time
    #[error("no response within {}s", .timeout.as_secs())]
    ReadTimeout { timeout: Duration },

    #[error("{0}")]
    Server(String),

    #[error("{0}")]
    MalformedResponse(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Anything that can turn a prompt into a completion
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Base URL requests are sent to
    fn endpoint(&self) -> &str;

    /// Request a completion for `prompt`, waiting at most `read_timeout`
    async fn complete(
        &self,
        prompt: &str,
        read_timeout: Duration,
    ) -> std::result::Result<String, InferenceError>;

    /// Send a trivial prompt and report whether the server answered
    async fn test_connection(&self) -> bool {
        match self.complete(PROBE_PROMPT, PROBE_TIMEOUT).await {
            Ok(_) => {
                debug!("Connection test to {} succeeded", self.endpoint());
                true
            }
            Err(e) => {
                warn!("Connection test to {} failed: {}", self.endpoint(), e);
                false
            }
        }
    }
}

/// HTTP client for the `/v1/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    connect_timeout: Duration,
}

impl InferenceClient {
    /// Create a client for `endpoint` with the given connect-phase bound
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self> {
        // The server is local; system proxies would only get in the way.
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(|e| LmscribeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_endpoint(endpoint),
            connect_timeout,
        })
    }

    fn classify(&self, err: reqwest::Error, read_timeout: Duration) -> InferenceError {
        if err.is_timeout() && err.is_connect() {
            InferenceError::ConnectTimeout {
                endpoint: self.base_url.clone(),
            }
        } else if err.is_timeout() {
            InferenceError::ReadTimeout {
                timeout: read_timeout,
            }
        } else {
            InferenceError::Server(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionBackend for InferenceClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn complete(
        &self,
        prompt: &str,
        read_timeout: Duration,
    ) -> std::result::Result<String, InferenceError> {
        let url = format!("{}{}", self.base_url, COMPLETIONS_PATH);
        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("POST {} ({} bytes of prompt)", url, prompt.len());

        // reqwest's request timeout spans the connect phase too; widen it so
        // the connect bound always fires first and the read keeps its budget.
        let total = self.connect_timeout.saturating_add(read_timeout);

        let response = self
            .client
            .post(&url)
            .timeout(total)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e, read_timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify(e, read_timeout))?;

        if !status.is_success() {
            return Err(InferenceError::Server(format!(
                "server returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        extract_completion(&body)
    }
}

/// Strip trailing slashes and any API path pasted into the endpoint
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    trimmed
        .strip_suffix(COMPLETIONS_PATH)
        .or_else(|| trimmed.strip_suffix("/v1"))
        .unwrap_or(trimmed)
        .to_string()
}

/// Pull the first choice's message content out of a response body
pub fn extract_completion(body: &str) -> std::result::Result<String, InferenceError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            InferenceError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}

/// One-shot completion against `endpoint`
pub async fn complete(
    endpoint: &str,
    prompt: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<String> {
    let client = InferenceClient::new(endpoint, connect_timeout)?;
    Ok(client.complete(prompt, read_timeout).await?)
}
