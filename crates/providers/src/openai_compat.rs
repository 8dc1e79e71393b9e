//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any self-hosted endpoint that exposes
//! `/chat/completions` and `/embeddings` in the OpenAI wire format.
//!
//! Credentials are resolved per request: a scope's endpoint override
//! replaces the base URL and its API key replaces the provider default.

use async_trait::async_trait;
use convoke_core::capability::CapabilitySchema;
use convoke_core::error::ProviderError;
use convoke_core::message::{Message, MessageToolCall, Role};
use convoke_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible LLM and embedding provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    default_api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider against `base_url`.
    ///
    /// `default_api_key` is used when a request carries no key of its own.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        default_api_key: Option<String>,
    ) -> Self {
        // Per-attempt timeouts are enforced by RetryingProvider; this is a backstop.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_api_key,
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(default_api_key: Option<String>) -> Self {
        Self::new("openai", DEFAULT_BASE_URL, default_api_key)
    }

    fn base_url_for<'a>(&'a self, credentials: &'a Credentials) -> &'a str {
        credentials
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/'))
            .unwrap_or(&self.base_url)
    }

    fn api_key_for<'a>(&'a self, credentials: &'a Credentials) -> Option<&'a str> {
        credentials
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .or(self.default_api_key.as_deref())
    }

    fn post(&self, url: &str, credentials: &Credentials) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match self.api_key_for(credentials) {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Capability => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(capabilities: &[CapabilitySchema]) -> Vec<ApiToolDefinition> {
        capabilities
            .iter()
            .map(|c| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    parameters: c.parameters.clone(),
                },
            })
            .collect()
    }

    /// Map a non-200 status onto the error taxonomy.
    async fn status_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        match status {
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5);
                ProviderError::RateLimited { retry_after_secs }
            }
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            404 => {
                let body = response.text().await.unwrap_or_default();
                ProviderError::ModelNotFound(body)
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(status, body = %body, "Provider returned error");
                ProviderError::ApiError {
                    status_code: status,
                    message: body,
                }
            }
        }
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl convoke_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url_for(&request.credentials));

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.capabilities.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.capabilities));
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            capabilities = request.capabilities.len(),
            "Sending completion request"
        );

        let response = self
            .post(&url, &request.credentials)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status().as_u16() != 200 {
            return Err(Self::status_error(response).await);
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        parse_completion(api_response)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/embeddings", self.base_url_for(&request.credentials));

        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self
            .post(&url, &request.credentials)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status().as_u16() != 200 {
            return Err(Self::status_error(response).await);
        }

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        Ok(parse_embeddings(api_resp))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = self.default_api_key.as_deref() {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await.map_err(Self::map_send_error)?;

        Ok(response.status().is_success())
    }
}

fn parse_completion(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    let tool_calls: Vec<MessageToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| MessageToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let mut message = Message::assistant(choice.message.content.unwrap_or_default());
    message.tool_calls = tool_calls;

    let usage = api_response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    Ok(ProviderResponse {
        message,
        usage,
        model: api_response.model,
    })
}

fn parse_embeddings(api_resp: EmbeddingApiResponse) -> EmbeddingResponse {
    let mut data = api_resp.data;
    data.sort_by_key(|d| d.index);
    let embeddings = data.into_iter().map(|d| d.embedding).collect();

    let usage = api_resp.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: 0,
        total_tokens: u.total_tokens,
    });

    EmbeddingResponse {
        embeddings,
        model: api_resp.model,
        usage,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    model: String,
    usage: Option<EmbeddingApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}
