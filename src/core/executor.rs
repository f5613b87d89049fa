//! Completion, tool-calling and tool-execution collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::BoardError;

/// Options forwarded to the completion service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// System instruction prepended by the service.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token cap.
    pub max_tokens: Option<u32>,
    /// Ask the service for a JSON object response, if it supports one.
    pub json_response: bool,
}

/// Description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Human description.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Response of a tool-calling round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    /// Final assistant message.
    pub message: String,
    /// Tool calls the model requested.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Text-completion and tool-calling service.
///
/// Cancellation and timeouts are the implementation's concern; callers await
/// each call to completion.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_planboard::core::{
///     BoardError, CompletionClient, CompletionOptions, ToolCallResponse, ToolSchema,
/// };
///
/// struct Canned;
///
/// #[async_trait]
/// impl CompletionClient for Canned {
///     async fn complete(
///         &self,
///         _prompt: &str,
///         _opts: &CompletionOptions,
///     ) -> Result<String, BoardError> {
///         Ok(r#"{"should_create_instance": false, "priority_score": 10}"#.into())
///     }
///
///     async fn call_tools(
///         &self,
///         _prompt: &str,
///         _tools: &[ToolSchema],
///         _opts: &CompletionOptions,
///     ) -> Result<ToolCallResponse, BoardError> {
///         Ok(ToolCallResponse::default())
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a prompt and return the text.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, BoardError>;

    /// Run a prompt with a tool catalog and return the message and requested calls.
    async fn call_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        options: &CompletionOptions,
    ) -> Result<ToolCallResponse, BoardError>;
}

/// Generic tool-execution router.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Names of every registered tool.
    fn list(&self) -> Vec<String>;

    /// Schemas of every registered tool.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Execute a tool by name.
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BoardError>;
}
