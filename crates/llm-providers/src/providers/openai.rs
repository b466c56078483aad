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

use super::{build_http_client, execute_with_retry, ApiClient};

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> LLMResult<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            timeout,
            max_retries,
        })
    }

    fn build_openai_payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            }).collect::<Vec<_>>()
        });

        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop_sequences {
            payload["stop"] = json!(stop);
        }
        if let Some(schema) = &request.response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true
                }
            });
        }

        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }

        payload
    }

    fn parse_openai_response(
        &self,
        response_data: Value,
        model: String,
    ) -> LLMResult<ProviderResponse> {
        let choice = &response_data["choices"][0];
        if let Some(refusal) = choice["message"]["refusal"].as_str() {
            return Err(LLMError::Provider(format!("OpenAI refused: {refusal}")));
        }
        let content = choice["message"]["content"].as_str().ok_or_else(|| {
            LLMError::Provider("Failed to extract content from OpenAI response".to_string())
        })?;

        let usage = Usage::new(
            response_data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            response_data["usage"]["completion_tokens"]
                .as_u64()
                .unwrap_or(0) as u32,
        );
        let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());

        Ok(ProviderResponse {
            content: content.to_string(),
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_openai_payload(&request);
        let response_data = execute_with_retry(
            self.provider_name(),
            || {
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .header("content-type", "application/json")
                    .json(&payload)
            },
            self.timeout,
            self.max_retries,
        )
        .await?;
        self.parse_openai_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{Message, ResponseSchema};
    use std::collections::HashMap;

    #[test]
    fn schema_becomes_strict_response_format() {
        let client = OpenAIClient::new("key".into(), None, Duration::from_secs(5), 0).unwrap();
        let request = ProviderRequest {
            model: "gpt-test".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            max_tokens: Some(100),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            response_schema: Some(ResponseSchema::new("ir", json!({"type": "object"}))),
            provider_specific: HashMap::new(),
        };
        let payload = client.build_openai_payload(&request);
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert_eq!(payload["response_format"]["json_schema"]["strict"], true);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert!(payload.get("temperature").is_none());
    }

    #[test]
    fn refusal_is_reported() {
        let client = OpenAIClient::new("key".into(), None, Duration::from_secs(5), 0).unwrap();
        let raw = json!({"choices": [{"message": {"refusal": "no", "content": null}}]});
        assert!(matches!(
            client.parse_openai_response(raw, "gpt-test".into()),
            Err(LLMError::Provider(_))
        ));
    }
}
