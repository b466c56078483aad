// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, Usage};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{build_http_client, execute_with_retry, ApiClient};

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    endpoint: String,
    api_version: String,
    timeout: Duration,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        api_version: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> LLMResult<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
            api_version: api_version.unwrap_or_else(|| "2023-06-01".to_string()),
            timeout,
            max_retries,
        })
    }

    fn build_anthropic_payload(&self, request: &ProviderRequest) -> Value {
        let mut system_content = Vec::new();
        let mut regular_messages = Vec::new();

        for msg in &request.messages {
            if msg.role == "system" {
                system_content.push(msg.content.clone());
            } else {
                regular_messages.push(json!({
                    "role": msg.role,
                    "content": msg.content
                }));
            }
        }

        let mut payload = json!({
            "model": request.model,
            "messages": regular_messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });

        if !system_content.is_empty() {
            payload["system"] = json!(system_content.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop_sequences {
            payload["stop_sequences"] = json!(stop);
        }

        // Structured output is obtained by forcing a single tool call whose
        // input schema is the requested response schema.
        if let Some(schema) = &request.response_schema {
            payload["tools"] = json!([{
                "name": schema.name,
                "description": "Return the complete structured response.",
                "input_schema": schema.schema,
            }]);
            payload["tool_choice"] = json!({ "type": "tool", "name": schema.name });
        }

        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }

        payload
    }

    fn parse_anthropic_response(
        &self,
        response_data: Value,
        model: String,
        structured: bool,
    ) -> LLMResult<ProviderResponse> {
        let blocks = response_data["content"].as_array().ok_or_else(|| {
            LLMError::Provider("Anthropic response has no content blocks".to_string())
        })?;

        let content = if structured {
            let tool_input = blocks
                .iter()
                .find(|block| block["type"] == "tool_use")
                .map(|block| block["input"].clone())
                .ok_or_else(|| {
                    LLMError::Serialisation(
                        "Anthropic response did not contain the forced tool call".to_string(),
                    )
                })?;
            serde_json::to_string(&tool_input)
                .map_err(|e| LLMError::Serialisation(format!("Failed to encode tool input: {e}")))?
        } else {
            blocks
                .iter()
                .filter_map(|block| block["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        };

        let input_tokens = response_data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = response_data["usage"]["output_tokens"]
            .as_u64()
            .unwrap_or(0) as u32;
        let finish_reason = response_data["stop_reason"].as_str().map(|s| s.to_string());

        debug!(
            structured,
            content_length = content.len(),
            "Parsed Anthropic response"
        );

        Ok(ProviderResponse {
            content,
            model,
            usage: Usage::new(input_tokens, output_tokens),
            finish_reason,
            raw_response: response_data,
        })
    }
}

#[async_trait]
impl ApiClient for AnthropicClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_anthropic_payload(&request);
        let structured = request.response_schema.is_some();
        let response_data = execute_with_retry(
            self.provider_name(),
            || {
                self.client
                    .post(&self.endpoint)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", &self.api_version)
                    .header("content-type", "application/json")
                    .json(&payload)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;
        self.parse_anthropic_response(response_data, request.model, structured)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{Message, ResponseSchema};
    use std::collections::HashMap;

    fn client() -> AnthropicClient {
        AnthropicClient::new("key".into(), None, None, Duration::from_secs(5), 0).unwrap()
    }

    fn request(schema: Option<ResponseSchema>) -> ProviderRequest {
        ProviderRequest {
            model: "claude-test".into(),
            messages: vec![Message::system("be precise"), Message::user("hello")],
            max_tokens: None,
            temperature: Some(0.1),
            top_p: None,
            stop_sequences: None,
            response_schema: schema,
            provider_specific: HashMap::new(),
        }
    }

    #[test]
    fn schema_becomes_forced_tool() {
        let schema = ResponseSchema::new("semantic_plan", json!({"type": "object"}));
        let payload = client().build_anthropic_payload(&request(Some(schema)));
        assert_eq!(payload["system"], "be precise");
        assert_eq!(payload["max_tokens"], 4096);
        assert_eq!(payload["tools"][0]["name"], "semantic_plan");
        assert_eq!(payload["tool_choice"]["name"], "semantic_plan");
        assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn structured_response_reads_tool_input() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "name": "semantic_plan", "input": {"goal": "x"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4},
            "stop_reason": "tool_use"
        });
        let parsed = client()
            .parse_anthropic_response(raw, "claude-test".into(), true)
            .unwrap();
        assert_eq!(parsed.content, r#"{"goal":"x"}"#);
        assert_eq!(parsed.usage.total_tokens, 14);
    }

    #[test]
    fn missing_tool_call_is_serialisation_error() {
        let raw = json!({"content": [{"type": "text", "text": "no tool"}]});
        let err = client()
            .parse_anthropic_response(raw, "claude-test".into(), true)
            .unwrap_err();
        assert!(matches!(err, LLMError::Serialisation(_)));
    }
}
