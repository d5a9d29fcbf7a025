//! OpenAI-compatible responder.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, DashScope compatible mode,
//! and any endpoint exposing `/chat/completions`.
//!
//! Supports plain replies and tool calling. Compaction summaries
//! (`system_memory` turns) are sent to the model as system messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turnstore_core::error::ResponderError;
use turnstore_core::responder::{Responder, ToolDefinition};
use turnstore_core::turn::{Payload, Role, ToolInvocation, Turn};

/// A responder backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatResponder {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    tools: Vec<ToolDefinition>,
    client: reqwest::Client,
}

impl OpenAiCompatResponder {
    /// Create a responder. Fails only if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ResponderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ResponderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "openai_compat".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            tools: Vec::new(),
            client,
        })
    }

    /// Create an OpenAI responder (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ResponderError> {
        Ok(Self::new("https://api.openai.com/v1", api_key, model)?.with_name("openai"))
    }

    /// Create an Ollama responder (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, ResponderError> {
        Ok(Self::new(
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
        )?
        .with_name("ollama"))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Advertise tools the model may call.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convert turns to OpenAI API messages.
    fn to_api_messages(turns: &[Turn]) -> Vec<ApiMessage> {
        turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    Role::System | Role::SystemMemory => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::ToolResult => "tool",
                };
                let tool_calls = match &t.payload {
                    Payload::ToolInvocation { calls } => Some(
                        calls
                            .iter()
                            .map(|c| ApiToolCall {
                                id: c.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: c.name.clone(),
                                    arguments: c.arguments.to_string(),
                                },
                            })
                            .collect(),
                    ),
                    _ => None,
                };
                let tool_call_id = match &t.payload {
                    Payload::ToolResult { call_id, .. } => Some(call_id.clone()),
                    _ => None,
                };
                ApiMessage {
                    role: role.into(),
                    content: Some(t.content.clone()),
                    tool_calls,
                    tool_call_id,
                }
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the reply turn from the first choice of a response.
    fn to_turn(response: ApiResponse) -> Result<Turn, ResponderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ResponderError::EmptyResponse)?;

        let content = choice.message.content.unwrap_or_default();
        let calls: Vec<ToolInvocation> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolInvocation {
                id: tc.id,
                name: tc.function.name,
                // Models occasionally emit arguments that are not JSON
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments)),
            })
            .collect();

        if calls.is_empty() {
            Ok(Turn::assistant(content))
        } else {
            Ok(Turn::tool_invocation(content, calls))
        }
    }
}

#[async_trait]
impl Responder for OpenAiCompatResponder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, context: &[Turn]) -> std::result::Result<Turn, ResponderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(context),
            "temperature": self.temperature,
            "stream": false,
        });

        if !self.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&self.tools));
        }

        debug!(
            responder = %self.name,
            model = %self.model,
            turns = context.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ResponderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ResponderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ResponderError::Authentication(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Responder returned error");
            return Err(ResponderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ResponderError::Api {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        if let Some(usage) = &api_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        Self::to_turn(api_response)
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
}
