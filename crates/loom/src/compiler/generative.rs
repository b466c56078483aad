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

use crate::compiler::dsl::WorkflowStep;
use crate::config::CompilationSettings;
use crate::error::{Phase, PipelineError};
use crate::formalization::IntermediateRepresentation;
use crate::llm::{extract_json, Attempted, DecodeFailure, RetryPolicy};
use crate::models::GroundedSemanticPlan;
use llm_contracts::{LLMAdapter, LLMRequest, RequestContext};
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, instrument};

const SYSTEM_PROMPT: &str = "You compile a formal workflow IR into executable workflow steps. \
Return only a JSON array of steps. Each step has a unique id and a type: \"action\" (plugin, \
action, params), \"transform\" (operation one of filter, map, sort, group_by, deduplicate, \
aggregate, format; input; config) or \"scatter_gather\" (scatter {input, itemVariable, steps}, \
gather {operation one of collect, merge, flatten, count}). Reference another step's output as \
{{step_id.data}} and the current loop item as {{<itemVariable>.field}}. A filter's config.condition \
is a JavaScript boolean expression over `item`. Keep every plugin, action and field name from the \
IR exactly as written.";

/// Model-driven compilation. Used when rule-based mapping fails or when a
/// reviewer left free-text feedback on an earlier result.
pub struct GenerativeCompiler {
    adapter: Arc<dyn LLMAdapter>,
    settings: CompilationSettings,
    policy: RetryPolicy,
}

impl GenerativeCompiler {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        settings: CompilationSettings,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            adapter,
            settings,
            policy,
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id, has_feedback = feedback.is_some()))]
    pub async fn compile(
        &self,
        ir: &IntermediateRepresentation,
        grounded: &GroundedSemanticPlan,
        feedback: Option<&str>,
        request_id: &str,
    ) -> Result<Attempted<Vec<WorkflowStep>>, PipelineError> {
        let message = build_user_message(ir, grounded, feedback).map_err(|err| {
            PipelineError::Compilation {
                phase: Phase::Compilation,
                message: format!("IR could not be serialised: {err}"),
            }
        })?;
        let request = LLMRequest::new(SYSTEM_PROMPT, message)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens)
            .with_context(RequestContext {
                request_id: Some(request_id.to_string()),
                ..Default::default()
            });

        let attempted = self
            .policy
            .execute(self.adapter.as_ref(), Phase::Compilation, &request, decode_steps)
            .await?;
        info!(
            steps = attempted.value.len(),
            attempts = attempted.attempts,
            "Workflow generated by model"
        );
        Ok(attempted)
    }
}

/// Accepts a bare array or an object wrapping it under `workflow` or `steps`.
pub fn decode_steps(text: &str) -> Result<Vec<WorkflowStep>, DecodeFailure> {
    let value = extract_json(text).map_err(DecodeFailure::Malformed)?;
    let steps = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("workflow").or_else(|| map.remove("steps")) {
            Some(steps @ Value::Array(_)) => steps,
            _ => {
                return Err(DecodeFailure::Malformed(
                    "expected a step array or an object with `workflow` or `steps`".to_string(),
                ))
            }
        },
        other => {
            return Err(DecodeFailure::Malformed(format!(
                "expected a step array, got {}",
                json_kind(&other)
            )))
        }
    };
    let steps: Vec<WorkflowStep> =
        serde_json::from_value(steps).map_err(|err| DecodeFailure::Schema(vec![err.to_string()]))?;
    if steps.is_empty() {
        return Err(DecodeFailure::Malformed("the workflow has no steps".to_string()));
    }
    Ok(steps)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn build_user_message(
    ir: &IntermediateRepresentation,
    grounded: &GroundedSemanticPlan,
    feedback: Option<&str>,
) -> Result<String, serde_json::Error> {
    let plan = &grounded.plan;
    let mut message = String::new();
    let _ = writeln!(message, "## Goal\n{}\n", plan.goal);

    if !plan.understanding.summary.is_empty() {
        let _ = writeln!(message, "## Understanding\n{}", plan.understanding.summary);
        for step in &plan.understanding.data_flow {
            let _ = writeln!(message, "- {step}");
        }
        message.push('\n');
    }

    if !plan.reasoning_trace.is_empty() {
        message.push_str("## Reasoning\n");
        for (i, line) in plan.reasoning_trace.iter().enumerate() {
            let _ = writeln!(message, "{}. {line}", i + 1);
        }
        message.push('\n');
    }

    let facts = grounded.grounded_facts();
    if !facts.is_empty() {
        message.push_str("## Grounded facts (use these exact names)\n");
        for (id, value) in facts {
            let _ = writeln!(message, "- {id} => {value}");
        }
        message.push('\n');
    }

    let _ = writeln!(message, "## IR\n{}\n", serde_json::to_string_pretty(ir)?);

    if let Some(feedback) = feedback.map(str::trim).filter(|f| !f.is_empty()) {
        let _ = writeln!(
            message,
            "## Reviewer feedback on the previous workflow (apply it)\n{feedback}\n"
        );
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formalization::ir::fixtures::invoice_ir;
    use crate::models::SemanticPlan;
    use crate::testing::ScriptedAdapter;
    use std::time::Duration;

    fn grounded() -> GroundedSemanticPlan {
        GroundedSemanticPlan {
            plan: SemanticPlan {
                goal: "Remind customers".into(),
                reasoning_trace: vec!["overdue rows come from the sheet".into()],
                ..Default::default()
            },
            grounding_results: vec![],
            grounding_errors: vec![],
            grounding_confidence: 1.0,
            validated_assumptions_count: 0,
            skipped_assumptions_count: 0,
            all_assumptions_skipped: false,
            disabled_assumptions: vec![],
        }
    }

    const STEPS: &str = r#"[{"type": "action", "id": "read", "plugin": "google-sheets", "action": "read_range"}]"#;

    #[test]
    fn wrapped_and_bare_arrays_decode() {
        assert_eq!(decode_steps(STEPS).unwrap().len(), 1);
        let wrapped = format!("Here you go:\n```json\n{{\"workflow\": {STEPS}}}\n```");
        assert_eq!(decode_steps(&wrapped).unwrap()[0].id(), "read");
    }

    #[test]
    fn empty_or_mistyped_output_is_rejected() {
        assert!(matches!(decode_steps("[]"), Err(DecodeFailure::Malformed(_))));
        assert!(matches!(decode_steps(r#"{"result": 1}"#), Err(DecodeFailure::Malformed(_))));
        assert!(matches!(
            decode_steps(r#"[{"type": "action", "id": "x"}]"#),
            Err(DecodeFailure::Schema(_))
        ));
    }

    #[tokio::test]
    async fn feedback_and_context_reach_the_model() {
        let adapter = Arc::new(ScriptedAdapter::with_texts([STEPS]));
        let compiler = GenerativeCompiler::new(
            adapter.clone(),
            CompilationSettings::default(),
            RetryPolicy::new(2, Duration::from_secs(5)),
        );
        let attempted = compiler
            .compile(&invoice_ir(), &grounded(), Some("send from billing@"), "req-1")
            .await
            .unwrap();
        assert_eq!(attempted.value.len(), 1);

        let prompt = &adapter.prompts()[0];
        assert!(prompt.contains("overdue rows come from the sheet"));
        assert!(prompt.contains("\"ir_version\": \"1.0\""));
        assert!(prompt.contains("send from billing@"));
        assert!(adapter.requests()[0].response_schema.is_none());
    }
}
