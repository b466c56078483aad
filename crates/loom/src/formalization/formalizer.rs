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

use super::ir::{ir_schema, IntermediateRepresentation, IR_VERSION};
use super::validator::validate_ir;
use crate::catalog::PluginCatalog;
use crate::config::GenerationSettings;
use crate::error::{Phase, PipelineError};
use crate::llm::{decode_json, DecodeFailure, RetryPolicy};
use crate::models::{EnhancedPrompt, GroundedSemanticPlan, ResolvedOverride};
use llm_contracts::{LLMAdapter, LLMRequest, RequestContext, ResponseSchema};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const SYSTEM_PROMPT: &str = "You convert a validated workflow plan into a formal intermediate \
representation (IR). Use only the plugins and actions listed below; never invent one. Every node \
has a unique id. A node's input or for_each must name a node that appears earlier, in the order \
data_sources, filters, transforms, actions, delivery. Leave a data source's action empty when the \
request does not say which operation to run. Use {{item.<field>}} inside params of an action that \
runs for_each, and {{<node_id>.data}} to reference another node's output. Reviewer overrides and \
grounded facts are final: use the resolved field names exactly.";

pub struct IRFormalizer {
    adapter: Arc<dyn LLMAdapter>,
    settings: GenerationSettings,
    policy: RetryPolicy,
    catalog: Arc<PluginCatalog>,
}

impl IRFormalizer {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        settings: GenerationSettings,
        policy: RetryPolicy,
        catalog: Arc<PluginCatalog>,
    ) -> Self {
        Self {
            adapter,
            settings,
            policy,
            catalog,
        }
    }

    /// Services named by the request, or every catalog service when none are.
    fn scope(&self, prompt: &EnhancedPrompt) -> PluginCatalog {
        let services = &prompt.specifics.services_involved;
        if services.is_empty() {
            self.catalog.as_ref().clone()
        } else {
            self.catalog.scoped(services)
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id, overrides = overrides.len()))]
    pub async fn formalize(
        &self,
        grounded: &GroundedSemanticPlan,
        prompt: &EnhancedPrompt,
        overrides: &[ResolvedOverride],
        request_id: &str,
    ) -> Result<IntermediateRepresentation, PipelineError> {
        let scoped = self.scope(prompt);
        debug!(plugins = scoped.plugins.len(), "Formalisation scoped to catalog subset");

        let system = if scoped.is_empty() {
            SYSTEM_PROMPT.to_string()
        } else {
            format!("{SYSTEM_PROMPT}\n\nAvailable plugins and actions:\n{}", scoped.vocabulary())
        };
        let request = LLMRequest::new(system, build_user_message(grounded, prompt, overrides))
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens)
            .with_schema(ResponseSchema::new("workflow_ir", ir_schema()))
            .with_context(RequestContext {
                request_id: Some(request_id.to_string()),
                ..Default::default()
            });

        let attempted = self
            .policy
            .execute(self.adapter.as_ref(), Phase::Formalization, &request, |text| {
                decode_json::<IntermediateRepresentation>(text).map_err(DecodeFailure::Malformed)
            })
            .await?;

        let mut ir = attempted.value;
        if ir.ir_version.trim().is_empty() {
            ir.ir_version = IR_VERSION.to_string();
        }
        fill_default_actions(&mut ir, &scoped);
        ir.overrides = overrides.to_vec();

        if let Err(err) = validate_ir(&ir, Some(&scoped)) {
            warn!(issues = err.issues.len(), "IR failed structural validation");
            return Err(PipelineError::SchemaViolation {
                phase: Phase::Formalization,
                issues: err.issues,
            });
        }

        info!(
            nodes = ir.node_ids().len(),
            plugins = ?ir.plugins(),
            attempts = attempted.attempts,
            "IR formalised"
        );
        Ok(ir)
    }
}

/// Data sources without an action get the service's default read action.
pub fn fill_default_actions(ir: &mut IntermediateRepresentation, catalog: &PluginCatalog) {
    for node in ir.data_sources.iter_mut().filter(|n| n.action.trim().is_empty()) {
        if let Some(action) = catalog.default_action(&node.plugin_key) {
            debug!(node = %node.id, plugin = %node.plugin_key, action = %action.name, "Filled default action");
            node.action = action.name.clone();
        }
    }
}

fn build_user_message(
    grounded: &GroundedSemanticPlan,
    prompt: &EnhancedPrompt,
    overrides: &[ResolvedOverride],
) -> String {
    let plan = &grounded.plan;
    let mut message = String::new();
    let _ = writeln!(message, "## Goal\n{}\n", plan.goal);
    let _ = writeln!(message, "## Original request\n{}\n", prompt.user_context.original_request);

    if !plan.understanding.summary.is_empty() {
        let _ = writeln!(message, "## Understanding\n{}", plan.understanding.summary);
        for step in &plan.understanding.data_flow {
            let _ = writeln!(message, "- {step}");
        }
        message.push('\n');
    }

    let facts = grounded.grounded_facts();
    if !facts.is_empty() {
        message.push_str("## Grounded facts\n");
        for (id, value) in facts {
            let description = plan
                .assumption(&id)
                .map(|a| a.description.as_str())
                .unwrap_or_default();
            let _ = writeln!(message, "- {id}: {description} => {value}");
        }
        message.push('\n');
    }

    let unresolved: Vec<_> = plan
        .assumptions
        .iter()
        .filter(|a| grounded.result_for(&a.id).map_or(true, |r| !r.validated))
        .collect();
    if !unresolved.is_empty() {
        message.push_str("## Unconfirmed assumptions (use the fallback if given)\n");
        for assumption in unresolved {
            let _ = writeln!(
                message,
                "- {}: {}{}",
                assumption.id,
                assumption.description,
                assumption
                    .fallback
                    .as_deref()
                    .map(|f| format!(" (fallback: {f})"))
                    .unwrap_or_default()
            );
        }
        message.push('\n');
    }

    if !plan.understanding.edge_cases.is_empty() {
        message.push_str("## Edge cases\n");
        for edge in &plan.understanding.edge_cases {
            let _ = writeln!(message, "- {}: {}", edge.condition, edge.suggested_handling);
        }
        message.push('\n');
    }

    if !prompt.specifics.resolved_user_inputs.is_empty() {
        message.push_str("## Resolved user inputs\n");
        for input in &prompt.specifics.resolved_user_inputs {
            let _ = writeln!(message, "- {} = {}", input.key, input.value);
        }
        message.push('\n');
    }

    if !overrides.is_empty() {
        message.push_str("## Reviewer decisions (authoritative)\n");
        for o in overrides {
            let _ = writeln!(message, "- {} = {}", o.key, o.value);
        }
        message.push('\n');
    }

    message.push_str("Return the IR as JSON.");
    message
}
