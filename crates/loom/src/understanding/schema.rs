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

use crate::llm::schema::{array, nullable, number, object, string, string_enum};
use crate::models::{AssumptionCategory, SemanticPlan};
use serde_json::Value;
use std::collections::HashSet;

pub fn semantic_plan_schema() -> Value {
    let impact = string_enum(&["critical", "moderate", "low"]);
    let parameters = object(&[
        ("candidates", array(string())),
        ("expected_type", nullable(string())),
        ("pattern", nullable(string())),
        ("required_headers", array(string())),
        ("field", nullable(string())),
        ("plugin_key", nullable(string())),
        ("min_match_rate", nullable(number())),
    ]);
    let assumption = object(&[
        ("id", string()),
        (
            "category",
            string_enum(&["field_name", "data_type", "value_format", "structure", "behavior"]),
        ),
        ("description", string()),
        (
            "validation_strategy",
            object(&[("method", string()), ("parameters", parameters)]),
        ),
        ("impact_if_wrong", impact.clone()),
        ("fallback", nullable(string())),
    ]);
    let ambiguity = object(&[
        ("id", string()),
        ("question", string()),
        ("options", array(string())),
        ("impact", impact),
        ("default_option", nullable(string())),
        ("related_input", nullable(string())),
    ]);
    let inference = object(&[
        ("statement", string()),
        ("basis", string()),
        ("confidence", number()),
    ]);
    let understanding = object(&[
        ("summary", string()),
        ("data_flow", array(string())),
        (
            "edge_cases",
            array(object(&[("condition", string()), ("suggested_handling", string())])),
        ),
    ]);

    object(&[
        ("goal", string()),
        ("understanding", understanding),
        ("assumptions", array(assumption)),
        ("ambiguities", array(ambiguity)),
        ("inferences", array(inference)),
        ("reasoning_trace", array(string())),
    ])
}

/// Issues found in a decoded plan. Hard issues make the plan unusable;
/// warnings are reported alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanValidation {
    pub hard: Vec<String>,
    pub warnings: Vec<String>,
}

impl PlanValidation {
    pub fn is_usable(&self) -> bool {
        self.hard.is_empty()
    }
}

pub fn validate_plan(plan: &SemanticPlan) -> PlanValidation {
    let mut report = PlanValidation::default();

    if plan.goal.trim().is_empty() {
        report.hard.push("goal is required".to_string());
    }

    let mut seen = HashSet::new();
    for (index, assumption) in plan.assumptions.iter().enumerate() {
        if assumption.id.trim().is_empty() {
            report.hard.push(format!("assumptions[{index}] has an empty id"));
        } else if !seen.insert(assumption.id.as_str()) {
            report.hard.push(format!("duplicate assumption id '{}'", assumption.id));
        }
        if assumption.category == AssumptionCategory::Unknown {
            report.warnings.push(format!(
                "assumption '{}' has an unrecognised category and will fail grounding",
                assumption.id
            ));
        }
        if assumption.description.trim().is_empty() {
            report.warnings.push(format!("assumption '{}' has no description", assumption.id));
        }
        let params = &assumption.validation_strategy.parameters;
        let needs_field = matches!(
            assumption.category,
            AssumptionCategory::FieldName | AssumptionCategory::DataType | AssumptionCategory::ValueFormat
        );
        if needs_field && params.candidates.is_empty() && params.field.is_none() {
            report.warnings.push(format!(
                "assumption '{}' names no field to validate against",
                assumption.id
            ));
        }
    }

    let mut ambiguity_ids = HashSet::new();
    for ambiguity in &plan.ambiguities {
        if !ambiguity_ids.insert(ambiguity.id.as_str()) {
            report.warnings.push(format!("duplicate ambiguity id '{}'", ambiguity.id));
        }
        if ambiguity.options.is_empty() {
            report.warnings.push(format!("ambiguity '{}' offers no options", ambiguity.id));
        }
    }

    for inference in &plan.inferences {
        if !(0.0..=1.0).contains(&inference.confidence) {
            report.warnings.push(format!(
                "inference '{}' has confidence {} outside [0, 1]",
                inference.statement, inference.confidence
            ));
        }
    }

    if plan.understanding.summary.trim().is_empty() {
        report.warnings.push("understanding.summary is empty".to_string());
    }
    if plan.reasoning_trace.is_empty() {
        report.warnings.push("reasoning_trace is empty".to_string());
    }
    report
}
