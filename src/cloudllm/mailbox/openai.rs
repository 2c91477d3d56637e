//! OpenAI wire format: `messages[]` with `role ∈ {system,user,assistant,tool}`, tool calls as an
//! array on the assistant message, tool results as separate `tool` role messages keyed by
//! `tool_call_id`.

use super::{with_retry, Mailbox, RawResponse, RetryConfig, UsageReport};
use crate::cloudllm::clients::http_pool::get_http_client;
use crate::cloudllm::engine::Engine;
use crate::cloudllm::error::CoreError;
use crate::cloudllm::tool_protocol::ToolMetadata;
use crate::cloudllm::tree::{ConversationMessage, Role, ToolCallRecord, ToolResultRecord};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiMailbox {
    engine: Engine,
    api_key: String,
    base_url: String,
    pub retry: RetryConfig,
}

impl OpenAiMailbox {
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
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
            return Err(CoreError::ProviderTransient(format!(
                "HTTP {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(CoreError::ProviderFatal(format!("HTTP {}: {}", status, body)));
        }
        Ok(RawResponse(body))
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::Empty => "user",
    }
}

fn schema_to_function(tool: &ToolMetadata) -> serde_json::Value {
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
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}

#[async_trait]
impl Mailbox for OpenAiMailbox {
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
        if !system_message.is_empty() {
            wire_messages.push(serde_json::json!({"role": "system", "content": system_message}));
        }
        for m in messages {
            if !m.tool_calls.is_empty() {
                let tool_calls: Vec<_> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments.to_string()}
                        })
                    })
                    .collect();
                wire_messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": m.content,
                    "tool_calls": tool_calls,
                }));
                if !m.tool_results.is_empty() {
                    if let serde_json::Value::Array(results) =
                        self.attach_results_to_next_message(&m.tool_results)
                    {
                        wire_messages.extend(results);
                    }
                }
            } else {
                wire_messages.push(serde_json::json!({
                    "role": role_str(m.role),
                    "content": m.content,
                }));
            }
        }

        let mut request = serde_json::json!({
            "model": self.engine.model_id,
            "messages": wire_messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if !tools.is_empty() {
            let function_tools: Vec<_> = tools.iter().map(schema_to_function).collect();
            request["tools"] = serde_json::Value::Array(function_tools);
        }
        request
    }

    async fn send(&self, request: serde_json::Value) -> Result<RawResponse, CoreError> {
        with_retry(
            self.retry,
            |attempt, err| {
                log::warn!("openai send attempt {} failed: {}", attempt, err);
            },
            || self.do_request(&request),
        )
        .await
    }

    fn extract_text(&self, response: &RawResponse) -> String {
        response.0["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    fn extract_tool_calls(&self, response: &RawResponse) -> Vec<ToolCallRecord> {
        response.0["choices"][0]["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let id = c["id"].as_str()?.to_string();
                        let name = c["function"]["name"].as_str()?.to_string();
                        let raw_args = c["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments =
                            serde_json::from_str(raw_args).unwrap_or(serde_json::json!({}));
                        Some(ToolCallRecord { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, response: &RawResponse) -> UsageReport {
        let usage = &response.0["usage"];
        let input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0) as usize;
        let output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0) as usize;
        UsageReport {
            input_tokens,
            output_tokens,
            cost_usd: self.engine.cost(input_tokens, output_tokens),
        }
    }

    fn attach_results_to_next_message(&self, results: &[ToolResultRecord]) -> serde_json::Value {
        serde_json::Value::Array(
            results
                .iter()
                .map(|r| {
                    serde_json::json!({"role": "tool", "tool_call_id": r.call_id, "content": r.content})
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::engine::{Provider, TokenPrice};

    fn engine() -> Engine {
        Engine::new(
            Provider::OpenAI,
            "gpt-4.1-mini",
            TokenPrice {
                input_usd_per_token: 0.0,
                output_usd_per_token: 0.0,
            },
        )
    }

    #[test]
    fn extract_tool_calls_parses_function_call_shape() {
        let mailbox = OpenAiMailbox::new(engine(), "key");
        let raw = RawResponse(serde_json::json!({
            "choices": [{"message": {"content": "", "tool_calls": [
                {"id": "call_1", "function": {"name": "add", "arguments": "{\"x\":1}"}}
            ]}}]
        }));
        let calls = mailbox.extract_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments["x"], 1);
    }

    #[test]
    fn attach_results_produces_one_tool_message_per_result() {
        let mailbox = OpenAiMailbox::new(engine(), "key");
        let results = vec![ToolResultRecord {
            call_id: "call_1".into(),
            content: "5".into(),
        }];
        let shaped = mailbox.attach_results_to_next_message(&results);
        assert_eq!(shaped[0]["role"], "tool");
        assert_eq!(shaped[0]["tool_call_id"], "call_1");
    }
}
