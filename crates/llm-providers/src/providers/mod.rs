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

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use llm_contracts::{
    LLMError, LLMResult, Provider, ProviderRequest, ProviderResponse, ProviderSettings,
};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use anthropic::AnthropicClient;
pub use openai::OpenAIClient;

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    fn provider_name(&self) -> &'static str;
}

/// Builds a client for `settings`, reading the API key from the environment.
pub fn client_from_settings(settings: &ProviderSettings) -> LLMResult<Arc<dyn ApiClient>> {
    let key_variable = settings.api_key_variable();
    let api_key = std::env::var(&key_variable).map_err(|_| {
        LLMError::Configuration(format!(
            "{key_variable} is not set; cannot create {} client",
            settings.provider
        ))
    })?;
    let timeout = Duration::from_secs(settings.timeout_seconds);
    match &settings.provider {
        Provider::Anthropic => Ok(Arc::new(AnthropicClient::new(
            api_key,
            settings.endpoint.clone(),
            None,
            timeout,
            settings.max_retries,
        )?)),
        Provider::OpenAI => Ok(Arc::new(OpenAIClient::new(
            api_key,
            settings.endpoint.clone(),
            timeout,
            settings.max_retries,
        )?)),
        Provider::Custom(name) => Err(LLMError::Configuration(format!(
            "Unsupported provider: {name}"
        ))),
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> LLMResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Sends the request produced by `build` with a per-attempt timeout.
/// Transport failures, timeouts and 5xx responses are retried up to
/// `max_retries` times; credential, quota and other 4xx responses return at once.
pub(crate) async fn execute_with_retry<F>(
    provider: &str,
    build: F,
    timeout: Duration,
    max_retries: u32,
) -> LLMResult<Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        debug!(
            provider,
            attempt = attempt + 1,
            max_attempts = max_retries + 1,
            "Sending request to provider API"
        );

        match tokio::time::timeout(timeout, build().send()).await {
            Ok(Ok(resp)) => {
                let status = resp.status();
                info!(provider, %status, "Received provider response");

                if status.is_success() {
                    return resp.json::<Value>().await.map_err(|e| {
                        LLMError::Serialisation(format!("Failed to parse {provider} response: {e}"))
                    });
                }

                let body = resp
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
                let error = classify_status(provider, status, body);
                if !status.is_server_error() {
                    return Err(error);
                }
                last_error = Some(error);
            }
            Ok(Err(e)) => {
                last_error = Some(LLMError::Network(format!("Request failed: {e}")));
            }
            Err(_) => {
                warn!(
                    provider,
                    "Request timed out after {} seconds",
                    timeout.as_secs()
                );
                last_error = Some(LLMError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        }

        if attempt < max_retries {
            let wait_time = Duration::from_millis(250 * 2_u64.pow(attempt.min(4)));
            tokio::time::sleep(wait_time).await;
        }
    }

    Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
}

pub(crate) fn classify_status(provider: &str, status: StatusCode, body: String) -> LLMError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LLMError::Authentication(format!("{provider} rejected credentials ({status}): {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LLMError::RateLimit(format!("{provider} rate limit ({status}): {body}"))
        }
        _ => LLMError::Provider(format!("{provider} API error {status}: {body}")),
    }
}
