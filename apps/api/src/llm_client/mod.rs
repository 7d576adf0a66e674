/// LLM Client: the single point of entry for all language-model calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// Pipeline stages talk to the `LanguageModel` trait; `LlmClient` is the production
/// implementation. Model output is untrusted: callers receive a `ModelOutput` and
/// must handle both the parsed and the unparsed case.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM call timed out")]
    Timeout,

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// Timeouts, connection failures, 429 and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Timeout => true,
            LlmError::EmptyContent => false,
        }
    }
}

/// Request contract for a single completion.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_content: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Other,
}

/// Response contract for a single completion.
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// Tagged result of interpreting model text as structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput<T> {
    Parsed(T),
    Unparsed(String),
}

impl LlmCompletion {
    /// Attempts to read the completion as JSON of type `T`.
    /// Truncated completions and schema mismatches come back as `Unparsed`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> ModelOutput<T> {
        if self.finish_reason != FinishReason::Stop {
            return ModelOutput::Unparsed(self.text.clone());
        }
        match serde_json::from_str::<T>(strip_json_fences(&self.text)) {
            Ok(value) => ModelOutput::Parsed(value),
            Err(e) => {
                debug!("Model output did not match the expected schema: {e}");
                ModelOutput::Unparsed(self.text.clone())
            }
        }
    }
}

/// Seam between the pipeline and whichever model backend is configured.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One attempt, no retries. Retrying is the caller's decision.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, LlmError>;
}

/// Calls `complete`, retrying transient failures with exponential backoff.
/// Non-transient errors are returned immediately.
pub async fn complete_with_retry(
    llm: &dyn LanguageModel,
    request: &LlmRequest,
    policy: &RetryPolicy,
) -> Result<LlmCompletion, LlmError> {
    let mut retry = 0u32;
    loop {
        match llm.complete(request).await {
            Ok(completion) => return Ok(completion),
            Err(e) if e.is_transient() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    "LLM call failed ({e}), retry {}/{} after {}ms",
                    retry,
                    policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }

    fn finish_reason(&self) -> FinishReason {
        match self.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::MaxTokens,
            _ => FinishReason::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, LlmError> {
        let body = AnthropicRequest {
            model: MODEL,
            max_tokens: request.max_tokens,
            temperature: 0.0,
            system: &request.system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.user_content,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Try to parse error message
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AnthropicResponse = response.json().await?;
        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            parsed.usage.input_tokens, parsed.usage.output_tokens
        );

        let text = parsed.text().ok_or(LlmError::EmptyContent)?.to_string();
        Ok(LlmCompletion {
            text,
            finish_reason: parsed.finish_reason(),
        })
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
