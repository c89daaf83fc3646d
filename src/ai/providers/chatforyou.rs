//! ChatForYou assistant API provider.
//!
//! A third-party assistant-hosting API reachable over the same
//! Responses-style contract; endpoint and auth header differ
//! from OpenAI's, so it gets its own thin client rather than reusing
//! [`super::openai::OpenAiProvider`].

use serde::{Deserialize, Serialize};

use super::{
    check_http_response, CompletionRequest, CompletionResponse, LlmProvider, ProviderError,
    ProviderKind, UsageStats,
};

const CHATFORYOU_URL: &str = "https://chatforyou.ru/api/v1/responses";

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    output_text: String,
    usage: Option<UsageStats>,
}

/// ChatForYou-backed provider instance.
#[derive(Debug, Clone)]
pub struct ChatForYouProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatForYouProvider {
    /// Construct a provider over an owner-supplied API key and model name.
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ChatForYouProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let wire = WireRequest {
            model: &request.model,
            input: &request.input,
            instructions: request.instructions.as_deref(),
            previous_response_id: request.previous_response_id.as_deref(),
            max_output_tokens: request.max_output_tokens,
        };

        let response = self
            .client
            .post(CHATFORYOU_URL)
            .header("X-Api-Key", &self.api_key)
            .json(&wire)
            .send()
            .await?;

        let body = check_http_response(response).await?;
        let parsed: WireResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(CompletionResponse {
            response_id: parsed.id,
            output_text: parsed.output_text,
            usage: parsed.usage,
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let wire = WireRequest {
            model: &self.model,
            input: "ping",
            instructions: None,
            previous_response_id: None,
            max_output_tokens: Some(1),
        };

        let response = self
            .client
            .post(CHATFORYOU_URL)
            .header("X-Api-Key", &self.api_key)
            .json(&wire)
            .send()
            .await?;

        check_http_response(response).await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ChatForYou
    }
}
