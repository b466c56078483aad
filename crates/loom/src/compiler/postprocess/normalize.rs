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

//! Canonical step shape: transient `output_variable` markers removed outside
//! scatter/gather, loop variables defaulted, and ids renumbered `step1..N`
//! depth-first with every reference rewritten to match.

use crate::compiler::dsl::{
    ActionStep, Gather, Scatter, ScatterGatherStep, TransformStep, WorkflowStep,
    DEFAULT_ITEM_VARIABLE, PLACEHOLDER,
};
use regex::Captures;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Applies the canonical shape to a whole workflow.
pub fn normalize_steps(steps: Vec<WorkflowStep>) -> Vec<WorkflowStep> {
    let mut renumbering = Renumbering::plan(&steps);
    steps.into_iter().map(|step| renumbering.step(step)).collect()
}

/// Old id to new id, assigned in the same depth-first order the mapping
/// walks. A duplicated id keeps the name of its first occurrence for
/// reference purposes.
pub struct Renumbering {
    names: HashMap<String, String>,
    counter: usize,
}

impl Renumbering {
    pub fn plan(steps: &[WorkflowStep]) -> Self {
        let mut names = HashMap::new();
        let mut counter = 0;
        assign(steps, &mut names, &mut counter);
        Self { names, counter: 0 }
    }

    pub fn renamed(&self, old: &str) -> Option<&str> {
        self.names.get(old).map(String::as_str)
    }

    /// The one mapping from an incoming step to its canonical form.
    pub fn step(&mut self, step: WorkflowStep) -> WorkflowStep {
        match step {
            WorkflowStep::Action(step) => WorkflowStep::Action(self.action(step)),
            WorkflowStep::Transform(step) => WorkflowStep::Transform(self.transform(step)),
            WorkflowStep::ScatterGather(step) => {
                WorkflowStep::ScatterGather(self.scatter_gather(step))
            }
        }
    }

    fn action(&mut self, step: ActionStep) -> ActionStep {
        ActionStep {
            id: self.next_id(),
            name: step.name,
            plugin: step.plugin,
            action: step.action,
            params: self.rewrite_map(step.params),
            condition: step.condition.map(|c| self.rewrite_text(&c)),
            output_variable: None,
        }
    }

    fn transform(&mut self, step: TransformStep) -> TransformStep {
        TransformStep {
            id: self.next_id(),
            name: step.name,
            operation: step.operation,
            input: self.rewrite_input(&step.input),
            config: self.rewrite_map(step.config),
            condition: step.condition.map(|c| self.rewrite_text(&c)),
            output_variable: None,
        }
    }

    fn scatter_gather(&mut self, step: ScatterGatherStep) -> ScatterGatherStep {
        let id = self.next_id();
        let input = self.rewrite_input(&step.scatter.input);
        let item_variable = match step.scatter.item_variable.trim() {
            "" => DEFAULT_ITEM_VARIABLE.to_string(),
            variable => variable.to_string(),
        };
        let steps = step
            .scatter
            .steps
            .into_iter()
            .map(|nested| self.step(nested))
            .collect();
        let output_variable = step
            .output_variable
            .map(|v| self.renamed(&v).map(str::to_string).unwrap_or(v));
        ScatterGatherStep {
            id,
            name: step.name,
            scatter: Scatter {
                input,
                item_variable,
                steps,
            },
            gather: Gather {
                operation: step.gather.operation,
            },
            output_variable,
        }
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("step{}", self.counter)
    }

    /// An input is either a bare step id or a templated string.
    fn rewrite_input(&self, input: &str) -> String {
        match self.renamed(input.trim()) {
            Some(new) => new.to_string(),
            None => self.rewrite_text(input),
        }
    }

    /// Single pass, so swapped names cannot chain.
    fn rewrite_text(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| match self.renamed(&caps[1]) {
                Some(new) => caps[0].replacen(&caps[1], new, 1),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    fn rewrite_map(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| (key, self.rewrite_value(value)))
            .collect()
    }

    fn rewrite_value(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.rewrite_text(&text)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.rewrite_value(v)).collect())
            }
            Value::Object(map) => Value::Object(self.rewrite_map(map)),
            other => other,
        }
    }
}

fn assign(steps: &[WorkflowStep], names: &mut HashMap<String, String>, counter: &mut usize) {
    for step in steps {
        *counter += 1;
        let new = format!("step{counter}");
        names.entry(step.id().to_string()).or_insert(new);
        assign(step.nested(), names, counter);
    }
}
