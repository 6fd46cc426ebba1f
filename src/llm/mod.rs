//! LLM Pool: model routing and connection management for the Anthropic API.
//!
//! The reasoning chain talks to models only through [`CompletionModel`]:
//! `complete(system, history, tools, tool_choice) -> {content, tool_calls}`.
//! [`LlmPool`] implements it over `AnthropicClient`, with model aliasing and
//! a hard per-request timeout.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use client::{AnthropicClient, LlmError, DEFAULT_BASE_URL};
use types::{
    resolve_model, ApiTool, ApiToolChoice, ContentBlock, Message, MessagesRequest, Role,
};

use crate::config::LlmConfig;
use crate::tools::ToolDefinition;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Result of a tool call, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Turn {
    User(String),
    Assistant {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResults(Vec<ToolOutcome>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// No tools are offered.
    None,
    /// The model decides.
    Auto,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What the model said, and which tools it wants called (in order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

/// LLM connection pool with model routing.
#[derive(Debug)]
pub struct LlmPool {
    client: AnthropicClient,
    default_model: String,
    timeout: Duration,
}

impl LlmPool {
    /// Create a pool with an explicit API key and default model.
    pub fn new(api_key: String, default_model: &str) -> Self {
        Self {
            client: AnthropicClient::new(api_key, DEFAULT_BASE_URL),
            default_model: resolve_model(default_model).to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::MissingApiKey(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            client: AnthropicClient::new(api_key, &config.base_url),
            default_model: resolve_model(&config.tool_model).to_string(),
            timeout: config.request_timeout(),
        })
    }

    /// Get the default model (resolved to full ID).
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn build_request(&self, request: CompletionRequest) -> MessagesRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            resolve_model(&request.model).to_string()
        };
        let offer_tools = request.tool_choice == ToolChoice::Auto && !request.tools.is_empty();
        let tools = offer_tools.then(|| {
            request
                .tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters_schema(),
                })
                .collect()
        });

        MessagesRequest {
            model,
            max_tokens: request.max_tokens,
            messages: request.history.into_iter().map(to_message).collect(),
            system: (!request.system.is_empty()).then_some(request.system),
            temperature: Some(request.temperature),
            tools,
            tool_choice: offer_tools.then_some(ApiToolChoice::Auto),
        }
    }
}

fn to_message(turn: Turn) -> Message {
    match turn {
        Turn::User(text) => Message::text(Role::User, text),
        Turn::Assistant { text, tool_calls } if tool_calls.is_empty() => {
            Message::text(Role::Assistant, text)
        }
        Turn::Assistant { text, tool_calls } => {
            let text_block = (!text.is_empty()).then(|| ContentBlock::Text { text });
            let uses = tool_calls.into_iter().map(|c| ContentBlock::ToolUse {
                id: c.id,
                name: c.name,
                input: c.arguments,
            });
            Message::blocks(Role::Assistant, text_block.into_iter().chain(uses).collect())
        }
        Turn::ToolResults(outcomes) => {
            let results = outcomes.into_iter().map(|o| ContentBlock::ToolResult {
                tool_use_id: o.call_id,
                content: o.content,
                is_error: o.is_error,
            });
            Message::blocks(Role::User, results.collect())
        }
    }
}

#[async_trait]
impl CompletionModel for LlmPool {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let request = self.build_request(request);
        debug!(model = %request.model, messages = request.messages.len(), "model request");

        let response = tokio::time::timeout(self.timeout, self.client.send(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        debug!(
            model = %response.model,
            stop_reason = response.stop_reason.as_deref().unwrap_or("none"),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model response"
        );

        let tool_calls = response
            .tool_uses()
            .map(|(id, name, input)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: input.clone(),
            })
            .collect();
        Ok(Completion {
            content: response.text(),
            tool_calls,
        })
    }
}
