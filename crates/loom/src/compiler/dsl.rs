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

//! The executable step language. References between steps are written
//! `{{step_id.data}}`; inside a scatter, `{{<itemVariable>.field}}` names
//! the current item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_ITEM_VARIABLE: &str = "item";

/// Leading name of a `{{name.path}}` placeholder.
pub(crate) static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStep {
    Action(ActionStep),
    Transform(TransformStep),
    ScatterGather(ScatterGatherStep),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub plugin: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOperation {
    Filter,
    Map,
    Sort,
    GroupBy,
    Deduplicate,
    Aggregate,
    Format,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub operation: StepOperation,
    pub input: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherOperation {
    #[default]
    Collect,
    Merge,
    Flatten,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scatter {
    pub input: String,
    #[serde(rename = "itemVariable")]
    pub item_variable: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Gather {
    pub operation: GatherOperation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawScatterGather")]
pub struct ScatterGatherStep {
    pub id: String,
    pub name: String,
    pub scatter: Scatter,
    pub gather: Gather,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

/// Every shape a generated scatter/gather step has been seen in: the
/// canonical nested form, or flat fields on the step itself.
#[derive(Deserialize)]
struct RawScatterGather {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    scatter: Option<RawScatter>,
    #[serde(default)]
    gather: Option<RawGather>,
    #[serde(default, alias = "items")]
    input: Option<String>,
    #[serde(default, alias = "itemVariable", alias = "item_name")]
    item_variable: Option<String>,
    #[serde(default, alias = "actions")]
    steps: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    gather_operation: Option<GatherOperation>,
    #[serde(default)]
    output_variable: Option<String>,
}

#[derive(Deserialize)]
struct RawScatter {
    #[serde(default, alias = "items")]
    input: Option<String>,
    #[serde(default, rename = "itemVariable", alias = "item_variable", alias = "item_name")]
    item_variable: Option<String>,
    #[serde(default, alias = "actions")]
    steps: Option<Vec<WorkflowStep>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGather {
    Object {
        #[serde(default)]
        operation: GatherOperation,
    },
    Operation(GatherOperation),
}

impl From<RawScatterGather> for ScatterGatherStep {
    fn from(raw: RawScatterGather) -> Self {
        let (nested_input, nested_variable, nested_steps) = match raw.scatter {
            Some(s) => (s.input, s.item_variable, s.steps),
            None => (None, None, None),
        };
        let operation = match raw.gather {
            Some(RawGather::Object { operation }) | Some(RawGather::Operation(operation)) => operation,
            None => raw.gather_operation.unwrap_or_default(),
        };
        ScatterGatherStep {
            id: raw.id,
            name: raw.name,
            scatter: Scatter {
                input: nested_input.or(raw.input).unwrap_or_default(),
                item_variable: nested_variable
                    .or(raw.item_variable)
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_ITEM_VARIABLE.to_string()),
                steps: nested_steps.or(raw.steps).unwrap_or_default(),
            },
            gather: Gather { operation },
            output_variable: raw.output_variable,
        }
    }
}

impl WorkflowStep {
    pub fn id(&self) -> &str {
        match self {
            WorkflowStep::Action(step) => &step.id,
            WorkflowStep::Transform(step) => &step.id,
            WorkflowStep::ScatterGather(step) => &step.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowStep::Action(_) => "action",
            WorkflowStep::Transform(_) => "transform",
            WorkflowStep::ScatterGather(_) => "scatter_gather",
        }
    }

    pub fn nested(&self) -> &[WorkflowStep] {
        match self {
            WorkflowStep::ScatterGather(step) => &step.scatter.steps,
            WorkflowStep::Action(_) | WorkflowStep::Transform(_) => &[],
        }
    }
}

/// Names referenced by placeholders in `text`, in order of appearance.
pub fn placeholder_names(text: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Total number of steps, nested ones included.
pub fn count_steps(steps: &[WorkflowStep]) -> usize {
    steps.iter().map(|s| 1 + count_steps(s.nested())).sum()
}
