//! Anthropic wire format: `messages[]` with `role ∈ {user,assistant}`, a distinct top-level
//! `system` field, tool calls as `tool_use` content blocks, tool results as a `user` message
//! containing `tool_result` blocks keyed by `tool_use_id`.

use super::{with_retry, Mailbox, RawResponse, RetryConfig, UsageReport};
use crate::cloudllm::clients::http_pool::get_http_client;
use crate::cloudllm::engine::Engine;
use crate::cloudllm::error::CoreError;
use crate::cloudllm::tool_protocol::ToolMetadata;
use crate::cloudllm::tree::{ConversationMessage, Role, ToolCallRecord, ToolResultRecord};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicMailbox {
    engine: Engine,
    api_key: String,
    base_url: String,
    pub retry: RetryConfig,
}

impl AnthropicMailbox {
    pub fn new(engine: Engine, api_key: impl Into<String>) -> Self {
        Self {
            engine,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn do_request(&self, request: &serde_json::Value) -> Result<RawResponse, CoreError> {
        let client = get_http_client(&self.base_url);
        let response = client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| CoreError::ProviderTransient(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderFatal(format!("invalid JSON response: {}", e)))?;

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CoreError::ProviderTransient(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(CoreError::ProviderFatal(format!("HTTP {}: {}", status, body)));
        }
        Ok(RawResponse(body))
    }
}

fn schema_to_tool(tool: &ToolMetadata) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for p in &tool.parameters {
        properties.insert(
            p.name.clone(),
            serde_json::json!({
                "type": serde_json::to_value(&p.param_type).unwrap_or(serde_json::json!("string")),
                "description": p.description.clone().unwrap_or_default(),
            }),
        );
        if p.required {
            required.push(p.name.clone());
        }
    }
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

#[async_trait]
impl Mailbox for AnthropicMailbox {
    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn build_request(
        &self,
        system_message: &str,
        messages: &[ConversationMessage],
        tools: &[ToolMetadata],
        max_tokens: u32,
        temperature: f32,
    ) -> serde_json::Value {
        let mut wire_messages = Vec::new();
        for m in messages {
            match m.role {
                Role::Assistant if !m.tool_calls.is_empty() => {
                    let mut content = Vec::new();
                    if !m.content.is_empty() {
                        content.push(serde_json::json!({"type": "text", "text": m.content}));
                    }
                    for c in &m.tool_calls {
                        content.push(serde_json::json!({
                            "type": "tool_use",
                            "id": c.id,
                            "name": c.name,
                            "input": c.arguments,
                        }));
                    }
                    wire_messages.push(serde_json::json!({"role": "assistant", "content": content}));
                    if !m.tool_results.is_empty() {
                        wire_messages.push(self.attach_results_to_next_message(&m.tool_results));
                    }
                }
                Role::System | Role::Empty => {}
                _ => {
                    let role = if matches!(m.role, Role::User | Role::Tool) {
                        "user"
                    } else {
                        "assistant"
                    };
                    wire_messages.push(serde_json::json!({"role": role, "content": m.content}));
                }
            }
        }

        let mut request = serde_json::json!({
            "model": self.engine.model_id,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": wire_messages,
        });
        if !system_message.is_empty() {
            request["system"] = serde_json::json!(system_message);
        }
        if !tools.is_empty() {
            request["tools"] = serde_json::Value::Array(tools.iter().map(schema_to_tool).collect());
        }
        request
    }

    async fn send(&self, request: serde_json::Value) -> Result<RawResponse, CoreError> {
        with_retry(
            self.retry,
            |attempt, err| {
                log::warn!("anthropic send attempt {} failed: {}", attempt, err);
            },
            || self.do_request(&request),
        )
        .await
    }

    fn extract_text(&self, response: &RawResponse) -> String {
        response.0["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn extract_tool_calls(&self, response: &RawResponse) -> Vec<ToolCallRecord> {
        response.0["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "tool_use")
                    .filter_map(|b| {
                        Some(ToolCallRecord {
                            id: b["id"].as_str()?.to_string(),
                            name: b["name"].as_str()?.to_string(),
                            arguments: b["input"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, response: &RawResponse) -> UsageReport {
        let usage = &response.0["usage"];
        let input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as usize;
        let output_tokens = usage["output_tokens"].as_u64().unwrap_or(0) as usize;
        UsageReport {
            input_tokens,
            output_tokens,
            cost_usd: self.engine.cost(input_tokens, output_tokens),
        }
    }

    fn attach_results_to_next_message(&self, results: &[ToolResultRecord]) -> serde_json::Value {
        serde_json::json!({
            "role": "user",
            "content": results.iter().map(|r| serde_json::json!({
                "type": "tool_result",
                "tool_use_id": r.call_id,
                "content": r.content,
            })).collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::engine::{Provider, TokenPrice};

    fn engine() -> Engine {
        Engine::new(
            Provider::Anthropic,
            "claude-sonnet-4-0",
            TokenPrice {
                input_usd_per_token: 0.0,
                output_usd_per_token: 0.0,
            },
        )
    }

    #[test]
    fn extract_tool_calls_parses_tool_use_blocks() {
        let mailbox = AnthropicMailbox::new(engine(), "key");
        let raw = RawResponse(serde_json::json!({
            "content": [
                {"type": "text", "text": "Let me compute that."},
                {"type": "tool_use", "id": "toolu_1", "name": "add", "input": {"x": 2, "y": 3}}
            ]
        }));
        assert_eq!(mailbox.extract_text(&raw), "Let me compute that.");
        let calls = mailbox.extract_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
    }

    #[test]
    fn attach_results_wraps_as_user_message_with_tool_result_blocks() {
        let mailbox = AnthropicMailbox::new(engine(), "key");
        let shaped = mailbox.attach_results_to_next_message(&[ToolResultRecord {
            call_id: "toolu_1".into(),
            content: "5".into(),
        }]);
        assert_eq!(shaped["role"], "user");
        assert_eq!(shaped["content"][0]["type"], "tool_result");
    }
}
