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

use crate::compiler::dsl::{placeholder_names, StepOperation, WorkflowStep};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Structural check of a compiled workflow, attached to every compile result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_workflow(steps: &[WorkflowStep]) -> WorkflowValidation {
    let mut validator = Validator::default();
    if steps.is_empty() {
        validator.errors.push("workflow has no steps".to_string());
    }
    validator.walk(steps, &mut Vec::new());
    WorkflowValidation {
        valid: validator.errors.is_empty(),
        errors: validator.errors,
        warnings: validator.warnings,
    }
}

#[derive(Default)]
struct Validator {
    seen: HashSet<String>,
    available: HashSet<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Validator {
    fn walk(&mut self, steps: &[WorkflowStep], loop_variables: &mut Vec<String>) {
        for step in steps {
            let id = step.id();
            if id.trim().is_empty() {
                self.errors.push(format!("{} step without an id", step.kind()));
            } else if !self.seen.insert(id.to_string()) {
                self.errors.push(format!("duplicate step id {id}"));
            }

            match step {
                WorkflowStep::Action(action) => {
                    if action.plugin.trim().is_empty() || action.action.trim().is_empty() {
                        self.errors
                            .push(format!("step {id}: action needs both plugin and action"));
                    }
                    self.check_map(id, &action.params, loop_variables);
                    if let Some(condition) = &action.condition {
                        self.check_text(id, condition, loop_variables);
                    }
                }
                WorkflowStep::Transform(transform) => {
                    self.check_input(id, &transform.input, loop_variables);
                    self.check_map(id, &transform.config, loop_variables);
                    if let Some(condition) = &transform.condition {
                        self.check_text(id, condition, loop_variables);
                    }
                    if transform.operation == StepOperation::Filter
                        && !transform.config.contains_key("condition")
                    {
                        self.warnings
                            .push(format!("step {id}: filter has no config.condition"));
                    }
                }
                WorkflowStep::ScatterGather(sg) => {
                    self.check_input(id, &sg.scatter.input, loop_variables);
                    let variable = sg.scatter.item_variable.trim();
                    if variable.is_empty() {
                        self.errors.push(format!("step {id}: scatter has no item variable"));
                    }
                    if sg.scatter.steps.is_empty() {
                        self.errors.push(format!("step {id}: scatter has no steps"));
                    }
                    loop_variables.push(variable.to_string());
                    self.walk(&sg.scatter.steps, loop_variables);
                    loop_variables.pop();
                    if let Some(output) = &sg.output_variable {
                        self.available.insert(output.clone());
                    }
                }
            }
            self.available.insert(id.to_string());
        }
    }

    /// A bare step id or a templated reference.
    fn check_input(&mut self, id: &str, input: &str, loop_variables: &[String]) {
        let input = input.trim();
        if input.is_empty() {
            self.errors.push(format!("step {id}: empty input"));
        } else if input.contains("{{") {
            self.check_text(id, input, loop_variables);
        } else if !self.available.contains(input) {
            self.errors
                .push(format!("step {id}: input {input} is not an earlier step"));
        }
    }

    fn check_text(&mut self, id: &str, text: &str, loop_variables: &[String]) {
        for name in placeholder_names(text) {
            if loop_variables.iter().any(|v| v == name) || self.available.contains(name) {
                continue;
            }
            if self.seen.contains(name) && name != id {
                self.errors
                    .push(format!("step {id}: {{{{{name}}}}} is referenced before it runs"));
            } else {
                self.errors
                    .push(format!("step {id}: {{{{{name}}}}} does not name a step"));
            }
        }
    }

    fn check_map(&mut self, id: &str, map: &Map<String, Value>, loop_variables: &[String]) {
        for value in map.values() {
            self.check_value(id, value, loop_variables);
        }
    }

    fn check_value(&mut self, id: &str, value: &Value, loop_variables: &[String]) {
        match value {
            Value::String(text) => self.check_text(id, text, loop_variables),
            Value::Array(items) => {
                for item in items {
                    self.check_value(id, item, loop_variables);
                }
            }
            Value::Object(map) => self.check_map(id, map, loop_variables),
            _ => {}
        }
    }
}
