//! Gemini wire format: `contents[]` with `role ∈ {user,model}`, function calls as `functionCall`
//! parts, results as `functionResponse` parts on the following user turn.

use super::{with_retry, Mailbox, RawResponse, RetryConfig, UsageReport};
use crate::cloudllm::clients::http_pool::get_http_client;
use crate::cloudllm::engine::Engine;
use crate::cloudllm::error::CoreError;
use crate::cloudllm::tool_protocol::ToolMetadata;
use crate::cloudllm::tree::{ConversationMessage, Role, ToolCallRecord, ToolResultRecord};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiMailbox {
    engine: Engine,
    api_key: String,
    base_url: String,
    pub retry: RetryConfig,
}

impl GeminiMailbox {
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
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.engine.model_id, self.api_key
        );
        let response = client
            .post(url)
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

fn schema_to_function_declaration(tool: &ToolMetadata) -> serde_json::Value {
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
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

#[async_trait]
impl Mailbox for GeminiMailbox {
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
        let mut contents = Vec::new();
        for m in messages {
            if !m.tool_calls.is_empty() {
                let parts: Vec<_> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({"functionCall": {"name": c.name, "args": c.arguments}})
                    })
                    .collect();
                contents.push(serde_json::json!({"role": "model", "parts": parts}));
                if !m.tool_results.is_empty() {
                    contents.push(self.attach_results_to_next_message(&m.tool_results));
                }
            } else if m.role != Role::System && m.role != Role::Empty {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                contents.push(serde_json::json!({"role": role, "parts": [{"text": m.content}]}));
            }
        }

        let mut request = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature,
            }
        });
        if !system_message.is_empty() {
            request["systemInstruction"] = serde_json::json!({"parts": [{"text": system_message}]});
        }
        if !tools.is_empty() {
            request["tools"] = serde_json::json!([{
                "functionDeclarations": tools.iter().map(schema_to_function_declaration).collect::<Vec<_>>()
            }]);
        }
        request
    }

    async fn send(&self, request: serde_json::Value) -> Result<RawResponse, CoreError> {
        with_retry(
            self.retry,
            |attempt, err| {
                log::warn!("gemini send attempt {} failed: {}", attempt, err);
            },
            || self.do_request(&request),
        )
        .await
    }

    fn extract_text(&self, response: &RawResponse) -> String {
        response.0["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn extract_tool_calls(&self, response: &RawResponse) -> Vec<ToolCallRecord> {
        response.0["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| p.get("functionCall").is_some())
                    .enumerate()
                    .filter_map(|(i, p)| {
                        let call = &p["functionCall"];
                        Some(ToolCallRecord {
                            // Gemini does not assign call ids; synthesize a stable one from
                            // position within this response so results can still be paired.
                            id: format!("gemini_call_{}", i),
                            name: call["name"].as_str()?.to_string(),
                            arguments: call["args"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn extract_usage(&self, response: &RawResponse) -> UsageReport {
        let usage = &response.0["usageMetadata"];
        let input_tokens = usage["promptTokenCount"].as_u64().unwrap_or(0) as usize;
        let output_tokens = usage["candidatesTokenCount"].as_u64().unwrap_or(0) as usize;
        UsageReport {
            input_tokens,
            output_tokens,
            cost_usd: self.engine.cost(input_tokens, output_tokens),
        }
    }

    fn attach_results_to_next_message(&self, results: &[ToolResultRecord]) -> serde_json::Value {
        serde_json::json!({
            "role": "user",
            "parts": results.iter().map(|r| serde_json::json!({
                "functionResponse": {"name": r.call_id, "response": {"content": r.content}}
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
            Provider::Gemini,
            "gemini-1.5-pro",
            TokenPrice {
                input_usd_per_token: 0.0,
                output_usd_per_token: 0.0,
            },
        )
    }

    #[test]
    fn extract_tool_calls_parses_function_call_parts() {
        let mailbox = GeminiMailbox::new(engine(), "key");
        let raw = RawResponse(serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "add", "args": {"x": 1, "y": 2}}}
            ]}}]
        }));
        let calls = mailbox.extract_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
    }
}
