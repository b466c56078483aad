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

//! Fixed passes every compiled workflow goes through, whichever strategy
//! produced it.

pub mod filter_simplifier;
pub mod normalize;

pub use filter_simplifier::simplify_condition;
pub use normalize::{normalize_steps, Renumbering};

use crate::compiler::dsl::WorkflowStep;
use serde_json::Value;
use tracing::debug;

/// Collapses oversized keyword filters, then normalises shape and ids.
pub fn post_process(steps: Vec<WorkflowStep>, collapse_threshold: usize) -> Vec<WorkflowStep> {
    let mut collapsed = 0;
    let simplified = steps
        .into_iter()
        .map(|step| simplify_step(step, collapse_threshold, &mut collapsed))
        .collect();
    if collapsed > 0 {
        debug!(collapsed, collapse_threshold, "Collapsed keyword filter conditions");
    }
    normalize_steps(simplified)
}

fn simplify_step(step: WorkflowStep, threshold: usize, collapsed: &mut usize) -> WorkflowStep {
    match step {
        WorkflowStep::Action(mut step) => {
            step.condition = simplify_optional(step.condition, threshold, collapsed);
            WorkflowStep::Action(step)
        }
        WorkflowStep::Transform(mut step) => {
            step.condition = simplify_optional(step.condition, threshold, collapsed);
            if let Some(Value::String(condition)) = step.config.get_mut("condition") {
                if let Some(simpler) = simplify_condition(condition, threshold) {
                    *condition = simpler;
                    *collapsed += 1;
                }
            }
            WorkflowStep::Transform(step)
        }
        WorkflowStep::ScatterGather(mut step) => {
            step.scatter.steps = std::mem::take(&mut step.scatter.steps)
                .into_iter()
                .map(|nested| simplify_step(nested, threshold, collapsed))
                .collect();
            WorkflowStep::ScatterGather(step)
        }
    }
}

fn simplify_optional(
    condition: Option<String>,
    threshold: usize,
    collapsed: &mut usize,
) -> Option<String> {
    condition.map(|c| match simplify_condition(&c, threshold) {
        Some(simpler) => {
            *collapsed += 1;
            simpler
        }
        None => c,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::dsl::{ScatterGatherStep, StepOperation, TransformStep};
    use serde_json::json;

    fn keyword_filter(id: &str, input: &str) -> WorkflowStep {
        let condition = (0..12)
            .map(|i| format!("item.subject.includes('x{i}')"))
            .collect::<Vec<_>>()
            .join(" || ");
        WorkflowStep::Transform(TransformStep {
            id: id.into(),
            name: "Keyword filter".into(),
            operation: StepOperation::Filter,
            input: input.into(),
            config: json!({ "condition": condition }).as_object().cloned().unwrap_or_default(),
            condition: None,
            output_variable: Some("matches".into()),
        })
    }

    #[test]
    fn nested_filters_are_collapsed_and_whole_workflow_is_stable() {
        let steps: Vec<WorkflowStep> = serde_json::from_value(json!([
            {"type": "action", "id": "emails", "plugin": "gmail", "action": "search_emails"},
            {
                "type": "scatter_gather",
                "id": "each",
                "scatter": {"input": "{{emails.data}}", "itemVariable": "email", "steps": []},
                "gather": {"operation": "collect"},
                "output_variable": "each"
            }
        ]))
        .unwrap();
        let mut steps = steps;
        if let WorkflowStep::ScatterGather(ScatterGatherStep { scatter, .. }) = &mut steps[1] {
            scatter.steps.push(keyword_filter("match", "{{emails.data}}"));
        }

        let once = post_process(steps, 10);
        let WorkflowStep::ScatterGather(sg) = &once[1] else {
            panic!("expected scatter_gather");
        };
        let WorkflowStep::Transform(nested) = &sg.scatter.steps[0] else {
            panic!("expected transform");
        };
        let condition = nested.config["condition"].as_str().unwrap();
        assert!(condition.starts_with("['x0'"));
        assert!(!condition.contains("||"));
        assert_eq!(nested.input, "{{step1.data}}");
        assert_eq!(nested.output_variable, None);
        assert_eq!(sg.output_variable.as_deref(), Some("step2"));

        assert_eq!(post_process(once.clone(), 10), once);
    }
}
