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

use crate::config::LlmSettings;
use crate::error::{Phase, PipelineError};
use llm_contracts::{LLMAdapter, LLMError, LLMRequest, Usage};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a response could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeFailure {
    /// Not parseable as the expected document.
    Malformed(String),
    /// Parseable, but violates rules that make it unusable.
    Schema(Vec<String>),
}

impl DecodeFailure {
    fn describe(&self) -> String {
        match self {
            DecodeFailure::Malformed(message) => message.clone(),
            DecodeFailure::Schema(issues) => issues.join("; "),
        }
    }
}

impl From<String> for DecodeFailure {
    fn from(message: String) -> Self {
        DecodeFailure::Malformed(message)
    }
}

#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
    pub usage: Usage,
    pub model: String,
    pub provider: String,
}

enum LastFailure {
    Provider(LLMError),
    Decode(DecodeFailure),
}

/// Bounded retry around a provider call. Each attempt races the call
/// against a timer; failed attempts feed their reason into the next prompt.
/// Authentication, quota and configuration failures abort at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            call_timeout,
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self::new(settings.max_attempts, settings.call_timeout())
    }

    pub async fn execute<T, D>(
        &self,
        adapter: &dyn LLMAdapter,
        phase: Phase,
        template: &LLMRequest,
        decode: D,
    ) -> Result<Attempted<T>, PipelineError>
    where
        D: Fn(&str) -> Result<T, DecodeFailure>,
    {
        let mut usage = Usage::default();
        let mut last_failure: Option<LastFailure> = None;

        for attempt in 1..=self.max_attempts {
            let request = self.prepare(template, phase, attempt, last_failure.as_ref());
            let started = Instant::now();

            let outcome = match tokio::time::timeout(
                self.call_timeout,
                adapter.generate_response(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout {
                    seconds: self.call_timeout.as_secs(),
                }),
            };

            let response = match outcome {
                Ok(response) => response,
                Err(err) if !err.is_retryable() => {
                    warn!(
                        phase = phase.as_str(),
                        attempt = attempt,
                        kind = err.kind(),
                        "Provider error is not retryable, aborting"
                    );
                    return Err(PipelineError::Provider {
                        phase,
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        phase = phase.as_str(),
                        attempt = attempt,
                        kind = err.kind(),
                        error = %err,
                        "Provider call failed"
                    );
                    last_failure = Some(LastFailure::Provider(err));
                    continue;
                }
            };

            usage.accumulate(&response.usage);
            debug!(
                phase = phase.as_str(),
                attempt = attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                tokens = response.usage.total_tokens,
                "Provider call returned"
            );

            if response.content.trim().is_empty() {
                warn!(phase = phase.as_str(), attempt = attempt, "Provider returned empty content");
                last_failure = Some(LastFailure::Decode(DecodeFailure::Malformed(
                    "response was empty".to_string(),
                )));
                continue;
            }

            match decode(&response.content) {
                Ok(value) => {
                    info!(
                        phase = phase.as_str(),
                        attempts = attempt,
                        model = %response.model_used,
                        "Structured output accepted"
                    );
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                        usage,
                        model: response.model_used,
                        provider: response.provider_used,
                    });
                }
                Err(failure) => {
                    warn!(
                        phase = phase.as_str(),
                        attempt = attempt,
                        reason = %failure.describe(),
                        "Structured output rejected"
                    );
                    last_failure = Some(LastFailure::Decode(failure));
                }
            }
        }

        let attempts = self.max_attempts;
        Err(match last_failure {
            Some(LastFailure::Provider(source)) => PipelineError::Provider {
                phase,
                attempts,
                source,
            },
            Some(LastFailure::Decode(DecodeFailure::Schema(issues))) => {
                PipelineError::SchemaViolation { phase, issues }
            }
            Some(LastFailure::Decode(DecodeFailure::Malformed(message))) => {
                PipelineError::MalformedOutput {
                    phase,
                    attempts,
                    message,
                }
            }
            None => PipelineError::MalformedOutput {
                phase,
                attempts,
                message: "no attempt was made".to_string(),
            },
        })
    }

    fn prepare(
        &self,
        template: &LLMRequest,
        phase: Phase,
        attempt: u32,
        last_failure: Option<&LastFailure>,
    ) -> LLMRequest {
        let mut request = template.clone();
        request.id = Uuid::new_v4();

        let mut context = template.context.clone().unwrap_or_default();
        context.phase = Some(phase.as_str().to_string());
        context.attempt = Some(attempt);
        request.context = Some(context);

        if let Some(failure) = last_failure {
            let reason = match failure {
                LastFailure::Provider(err) => err.to_string(),
                LastFailure::Decode(decode) => decode.describe(),
            };
            request.prompt = format!(
                "{}\n\nIMPORTANT: attempt {} of {} failed: {}\nReturn a corrected response that is a single valid JSON document.",
                template.prompt,
                attempt - 1,
                self.max_attempts,
                reason
            );
        }
        request
    }
}
