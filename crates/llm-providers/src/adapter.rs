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

use crate::providers::{client_from_settings, ApiClient};
use async_trait::async_trait;
use chrono::Utc;
use llm_contracts::{
    LLMAdapter, LLMRequest, LLMResponse, LLMResult, Message, ProviderRequest, ProviderResponse,
    ProviderSettings, ResponseMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

struct ConfiguredClient {
    client: Arc<dyn ApiClient>,
    model: String,
}

/// `LLMAdapter` over one primary provider and an optional fallback provider.
/// The fallback only sees requests whose primary failure was retryable.
pub struct ProviderAdapter {
    primary: ConfiguredClient,
    fallback: Option<ConfiguredClient>,
}

impl ProviderAdapter {
    pub fn new(client: Arc<dyn ApiClient>, model: impl Into<String>) -> Self {
        Self {
            primary: ConfiguredClient {
                client,
                model: model.into(),
            },
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, client: Arc<dyn ApiClient>, model: impl Into<String>) -> Self {
        self.fallback = Some(ConfiguredClient {
            client,
            model: model.into(),
        });
        self
    }

    pub fn from_settings(
        primary: &ProviderSettings,
        fallback: Option<&ProviderSettings>,
    ) -> LLMResult<Self> {
        let mut adapter = Self::new(client_from_settings(primary)?, primary.model.clone());
        info!(
            provider = %primary.provider,
            model = %primary.model,
            "Primary LLM provider initialised"
        );
        if let Some(settings) = fallback {
            match client_from_settings(settings) {
                Ok(client) => {
                    info!(provider = %settings.provider, model = %settings.model, "Fallback LLM provider initialised");
                    adapter = adapter.with_fallback(client, settings.model.clone());
                }
                Err(e) => warn!("Fallback provider {} unavailable: {}", settings.provider, e),
            }
        }
        Ok(adapter)
    }

    fn build_provider_request(&self, request: &LLMRequest, model_name: &str) -> ProviderRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(Message::system(system_prompt.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        ProviderRequest {
            model: model_name.to_string(),
            messages,
            max_tokens: request.generation_config.max_tokens,
            temperature: request.generation_config.temperature,
            top_p: request.generation_config.top_p,
            stop_sequences: request.generation_config.stop_sequences.clone(),
            response_schema: request.response_schema.clone(),
            provider_specific: HashMap::new(),
        }
    }

    fn build_llm_response(
        &self,
        request: &LLMRequest,
        provider_response: ProviderResponse,
        provider_name: &str,
        used_fallback_provider: bool,
        processing_time_ms: u64,
    ) -> LLMResponse {
        LLMResponse {
            id: Uuid::new_v4(),
            request_id: request.id,
            content: provider_response.content,
            model_used: provider_response.model,
            provider_used: provider_name.to_string(),
            usage: provider_response.usage,
            metadata: ResponseMetadata {
                processing_time_ms,
                structured: request.response_schema.is_some(),
                used_fallback_provider,
                retry_count: 0,
                additional_data: HashMap::new(),
            },
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LLMAdapter for ProviderAdapter {
    async fn generate_response(&self, request: LLMRequest) -> LLMResult<LLMResponse> {
        let start_time = std::time::Instant::now();
        info!(
            request_id = %request.id,
            provider = self.primary.client.provider_name(),
            "Processing LLM request"
        );

        let provider_request = self.build_provider_request(&request, &self.primary.model);
        let primary_error = match self.primary.client.send_request(provider_request).await {
            Ok(response) => {
                return Ok(self.build_llm_response(
                    &request,
                    response,
                    self.primary.client.provider_name(),
                    false,
                    start_time.elapsed().as_millis() as u64,
                ));
            }
            Err(e) => e,
        };

        let Some(fallback) = self.fallback.as_ref().filter(|_| primary_error.is_retryable()) else {
            return Err(primary_error);
        };

        warn!(
            "Primary provider {} failed ({}); trying fallback {}",
            self.primary.client.provider_name(),
            primary_error,
            fallback.client.provider_name()
        );
        let provider_request = self.build_provider_request(&request, &fallback.model);
        let response = fallback.client.send_request(provider_request).await?;
        Ok(self.build_llm_response(
            &request,
            response,
            fallback.client.provider_name(),
            true,
            start_time.elapsed().as_millis() as u64,
        ))
    }

    fn provider_name(&self) -> &str {
        self.primary.client.provider_name()
    }
}
