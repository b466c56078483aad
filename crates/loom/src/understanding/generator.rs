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

use super::prompt::{build_user_message, SYSTEM_PROMPT};
use super::schema::{semantic_plan_schema, validate_plan};
use crate::config::GenerationSettings;
use crate::error::{Phase, PipelineError};
use crate::llm::{decode_json, DecodeFailure, RetryPolicy};
use crate::models::{EnhancedPrompt, SemanticPlan};
use llm_contracts::{LLMAdapter, LLMRequest, RequestContext, ResponseSchema, Usage};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct PlanGeneration {
    pub plan: SemanticPlan,
    pub warnings: Vec<String>,
    pub attempts: u32,
    pub usage: Usage,
}

pub struct SemanticPlanGenerator {
    adapter: Arc<dyn LLMAdapter>,
    settings: GenerationSettings,
    policy: RetryPolicy,
}

impl SemanticPlanGenerator {
    pub fn new(adapter: Arc<dyn LLMAdapter>, settings: GenerationSettings, policy: RetryPolicy) -> Self {
        Self {
            adapter,
            settings,
            policy,
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn generate(
        &self,
        prompt: &EnhancedPrompt,
        request_id: &str,
    ) -> Result<PlanGeneration, PipelineError> {
        let missing = prompt.missing_fields();
        if !missing.is_empty() {
            return Err(PipelineError::invalid_input(
                Phase::Understanding,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        let request = LLMRequest::new(SYSTEM_PROMPT, build_user_message(prompt))
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens)
            .with_schema(ResponseSchema::new("semantic_plan", semantic_plan_schema()))
            .with_context(RequestContext {
                request_id: Some(request_id.to_string()),
                ..Default::default()
            });

        let attempted = self
            .policy
            .execute(self.adapter.as_ref(), Phase::Understanding, &request, |text| {
                let plan: SemanticPlan = decode_json(text).map_err(DecodeFailure::Malformed)?;
                let report = validate_plan(&plan);
                if !report.is_usable() {
                    return Err(DecodeFailure::Schema(report.hard));
                }
                Ok((plan, report.warnings))
            })
            .await?;

        let (plan, warnings) = attempted.value;
        for warning in &warnings {
            warn!(warning = %warning, "Semantic plan warning");
        }
        info!(
            assumptions = plan.assumptions.len(),
            ambiguities = plan.ambiguities.len(),
            attempts = attempted.attempts,
            tokens = attempted.usage.total_tokens,
            "Semantic plan generated"
        );

        Ok(PlanGeneration {
            plan,
            warnings,
            attempts: attempted.attempts,
            usage: attempted.usage,
        })
    }
}
