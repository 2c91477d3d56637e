//! Provider adapter ("Mailbox") capability set and the three wire-format implementations.
//! Grounded in the existing per-provider client pattern ([`crate::cloudllm::clients::openai`],
//! [`crate::cloudllm::clients::claude`]) but, unlike `clients::claude`'s delegate-to-OpenAI
//! shortcut, each adapter here builds and parses its provider's genuine wire shape (tool_use
//! blocks for Anthropic, a `tool` role for OpenAI, functionCall/functionResponse parts for
//! Gemini).

pub mod anthropic;
pub mod gemini;
pub mod openai;
mod retry;

pub use retry::{with_retry, RetryConfig};

use crate::cloudllm::engine::Engine;
use crate::cloudllm::error::CoreError;
use crate::cloudllm::tool_protocol::ToolMetadata;
use crate::cloudllm::tree::{ConversationMessage, ToolCallRecord, ToolResultRecord};
use async_trait::async_trait;

/// Usage and cost reported for a single adapter call.
#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost_usd: f64,
}

/// An opaque provider response. Adapters parse their own wire shape into this before the step
/// machine asks for text/tool-calls/usage; kept provider-specific (`serde_json::Value`) rather
/// than forcing a shared response struct, since the three wire formats disagree on everything but
/// the provider-neutral facts the step machine actually needs.
pub struct RawResponse(pub serde_json::Value);

/// The capability set a provider adapter must implement.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// The engine (provider + model) this mailbox instance speaks for.
    fn engine(&self) -> &Engine;

    /// Compose a provider-specific wire request from the system prompt, full message history,
    /// and available tool schemas.
    fn build_request(
        &self,
        system_message: &str,
        messages: &[ConversationMessage],
        tools: &[ToolMetadata],
        max_tokens: u32,
        temperature: f32,
    ) -> serde_json::Value;

    /// Perform the network call, retrying transient failures per [`RetryConfig`].
    async fn send(&self, request: serde_json::Value) -> Result<RawResponse, CoreError>;

    fn extract_text(&self, response: &RawResponse) -> String;

    fn extract_tool_calls(&self, response: &RawResponse) -> Vec<ToolCallRecord>;

    fn extract_usage(&self, response: &RawResponse) -> UsageReport;

    /// Shape tool results into the provider's required follow-up message(s): Anthropic wants a
    /// user message of `tool_result` blocks, OpenAI wants one `tool` role message per result,
    /// Gemini wants `functionResponse` parts on the next user message.
    fn attach_results_to_next_message(&self, results: &[ToolResultRecord]) -> serde_json::Value;
}
