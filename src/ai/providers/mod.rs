//! LLM provider abstraction.
//!
//! A trait-plus-wire-types shape covering the Responses-style contract
//! this platform's three providers share: `{model, instructions, input,
//! previous_response_id?, tools?, max_output_tokens?}` in, `{id, output_text,
//! usage?}` out.

pub mod chatforyou;
pub mod openai;
pub mod protalk;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which provider backs a [`crate::store::models::UserBot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI Responses-style API.
    OpenAi,
    /// ChatForYou assistant API.
    ChatForYou,
    /// ProTalk assistant API.
    ProTalk,
}

/// Declared auto-detection probe order: openai, then chatforyou, then
/// protalk.
pub const DETECTION_ORDER: [ProviderKind; 3] =
    [ProviderKind::OpenAi, ProviderKind::ChatForYou, ProviderKind::ProTalk];

impl ProviderKind {
    /// The value persisted in `user_bots.ai_provider`.
    #[must_use]
    pub fn as_store_value(self) -> crate::store::models::AiProvider {
        match self {
            Self::OpenAi => crate::store::models::AiProvider::OpenAi,
            Self::ChatForYou => crate::store::models::AiProvider::ChatForYou,
            Self::ProTalk => crate::store::models::AiProvider::ProTalk,
        }
    }
}

/// A turn sent to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt / assistant instructions.
    pub instructions: Option<String>,
    /// The end-user's message text.
    pub input: String,
    /// Server-side thread handle to continue, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// Tool definitions, when `ai_settings.enable_file_search` or similar
    /// capabilities are requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Response length cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Token usage reported by a provider. Some providers alias these as
/// `prompt_tokens`/`completion_tokens`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UsageStats {
    /// Tokens consumed by the prompt/instructions/input.
    #[serde(alias = "prompt_tokens")]
    pub input_tokens: Option<u32>,
    /// Tokens consumed by the generated output.
    #[serde(alias = "completion_tokens")]
    pub output_tokens: Option<u32>,
}

/// A completed turn.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Provider-side handle for the next turn's `previous_response_id`.
    pub response_id: String,
    /// Assistant's reply text.
    pub output_text: String,
    /// Reported usage, if the provider sent any.
    pub usage: Option<UsageStats>,
}

/// Errors a provider call can fail with, classified by retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure (DNS, connect, timeout).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The response body did not match the expected shape.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// `429`: honor the server-supplied delay, retry up to 3 times.
    #[error("provider rate limited, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },
    /// `401`/`403`: the credential itself is bad; do not retry.
    #[error("provider rejected credentials")]
    Auth,
    /// `5xx`: transient, exponential retry up to 3 times.
    #[error("provider server error: {status} {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// `4xx` other than auth/rate-limit: surfaced to the end-user verbatim,
    /// never retried.
    #[error("provider rejected the request: {status} {body}")]
    BadRequest {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

impl ProviderError {
    /// Whether this failure should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Server { .. } | Self::Request(_))
    }
}

/// Classify an HTTP response into success text or a typed [`ProviderError`].
///
/// # Errors
///
/// Returns the appropriate [`ProviderError`] variant for non-2xx statuses.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimit { retry_after_secs });
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::Auth);
    }

    let body = response.text().await?;
    if status.is_server_error() {
        return Err(ProviderError::Server {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }
    if !status.is_success() {
        return Err(ProviderError::BadRequest {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }

    Ok(body)
}

fn truncate(body: &str) -> String {
    const MAX_CHARS: usize = 256;
    if body.chars().count() <= MAX_CHARS {
        return body.to_owned();
    }
    let shortened: String = body.chars().take(MAX_CHARS).collect();
    format!("{shortened}...[truncated]")
}

/// Common interface every provider implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion turn.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, auth, rate-limit, or
    /// malformed-response failure.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a minimal validation request, used by auto-detection
    /// to decide whether this provider accepts the owner-supplied token.
    async fn probe(&self) -> Result<(), ProviderError>;

    /// This provider's kind, for persistence.
    fn kind(&self) -> ProviderKind;
}

/// Construct the provider for a detected/configured kind.
#[must_use]
pub fn build(kind: ProviderKind, api_key: &str, model: &str) -> Box<dyn LlmProvider> {
    match kind {
        ProviderKind::OpenAi => Box::new(openai::OpenAiProvider::new(api_key.to_owned(), model.to_owned())),
        ProviderKind::ChatForYou => {
            Box::new(chatforyou::ChatForYouProvider::new(api_key.to_owned(), model.to_owned()))
        }
        ProviderKind::ProTalk => Box::new(protalk::ProTalkProvider::new(api_key.to_owned(), model.to_owned())),
    }
}

/// Probe providers in [`DETECTION_ORDER`] and return the first that
/// accepts `api_key`.
///
/// # Errors
///
/// Returns an error if every provider rejects the credential.
pub async fn detect_provider(api_key: &str, model: &str) -> anyhow::Result<ProviderKind> {
    for kind in DETECTION_ORDER {
        let provider = build(kind, api_key, model);
        if provider.probe().await.is_ok() {
            return Ok(kind);
        }
    }
    anyhow::bail!("no provider accepted the supplied credential")
}
