//! The oracle: a multimodal model that proposes the next tool call.
//!
//! The session calls [`Oracle::ask`] at most once per step. Replies are
//! mapped onto the closed [`ToolCall`] shape; nothing the model returns is
//! passed through unparsed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::backend::Screenshot;
use crate::llm::{
    ChatMessage, ChatOptions, ContentPart, ImageUrl, LlmClient, LlmError, ToolDefinition,
};
use crate::session::ActionRecord;
use crate::tools::{ToolCall, ToolRegistry};

const SYSTEM_PROMPT: &str = "You operate a computer by calling tools. Every screenshot you \
receive is mapped onto a 0-1000 grid on both axes: (0, 0) is the top-left corner and \
(1000, 1000) the bottom-right corner, whatever the real resolution. Always give positions \
in that grid. Call exactly one tool per turn, then wait for the next screenshot. Use \
`click_and_type` to fill a field in one step, `wait` while pages load, and `task_complete` \
as soon as the task is done or cannot be done.";

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Everything the oracle sees for one step.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub screenshot: &'a Screenshot,
    pub instruction: &'a str,
    pub history: &'a [ActionRecord],
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    ToolCalls(Vec<ToolCall>),
    /// The model answered in prose; treated as the end of the task.
    Terminate { message: String },
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn ask(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError>;
}

/// Oracle backed by an OpenAI-compatible function-calling model.
pub struct LlmOracle {
    client: Arc<dyn LlmClient>,
    model: String,
    tools: Vec<ToolDefinition>,
    history_window: usize,
}

impl LlmOracle {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        history_window: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            tools: ToolRegistry::new().get_tool_schemas(),
            history_window,
        }
    }

    fn build_messages(&self, request: &OracleRequest<'_>) -> Vec<ChatMessage> {
        let mut text = format!("Task: {}\n", request.instruction);
        let skip = request.history.len().saturating_sub(self.history_window);
        let recent = &request.history[skip..];
        if recent.is_empty() {
            text.push_str("\nNo actions taken yet.\n");
        } else {
            text.push_str("\nPrevious actions (oldest first):\n");
            if skip > 0 {
                text.push_str(&format!("... {} earlier action(s) omitted\n", skip));
            }
            for record in recent {
                text.push_str(&format!("{}\n", render_record(record)));
            }
        }
        text.push_str("\nThe current screenshot follows. Choose the next action.");

        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_parts(vec![
                ContentPart::Text { text },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.screenshot.data_url(),
                    },
                },
            ]),
        ]
    }
}

fn render_record(record: &ActionRecord) -> String {
    let outcome = if record.result.success { "ok" } else { "failed" };
    format!(
        "{}. {}({}) -> {}: {}",
        record.step_index,
        record.tool_call.name,
        record.tool_call.arguments,
        outcome,
        record.result.detail
    )
}

/// Parse a provider's JSON-encoded argument string.
///
/// Anything that is not valid JSON is kept as a string so validation rejects it.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn ask(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        let messages = self.build_messages(&request);
        let response = self
            .client
            .chat_completion(
                &self.model,
                &messages,
                Some(self.tools.as_slice()),
                ChatOptions {
                    temperature: Some(0.0),
                    max_tokens: Some(1024),
                },
            )
            .await?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Oracle usage"
            );
        }

        let calls: Vec<ToolCall> = response
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: Some(call.id),
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect();

        if calls.is_empty() {
            return Ok(OracleReply::Terminate {
                message: response.content.unwrap_or_default(),
            });
        }
        Ok(OracleReply::ToolCalls(calls))
    }
}
