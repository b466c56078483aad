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

//! Rule-based IR to step mapping. No model call, same output for the same IR.

use crate::compiler::dsl::{
    ActionStep, Gather, GatherOperation, Scatter, ScatterGatherStep, StepOperation,
    TransformStep, WorkflowStep, DEFAULT_ITEM_VARIABLE,
};
use crate::error::CompileError;
use crate::formalization::{
    params_object, ActionNode, Combinator, Condition, ConditionOperator, DataSourceNode,
    DeliveryNode, FilterNode, IntermediateRepresentation, Param, TransformNode,
    TransformOperation,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

static FIELD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$").unwrap()
});

pub fn compile_deterministic(
    ir: &IntermediateRepresentation,
) -> Result<Vec<WorkflowStep>, CompileError> {
    let mut compiler = Deterministic::default();
    let mut steps = Vec::with_capacity(ir.node_ids().len());

    for node in &ir.data_sources {
        steps.push(compiler.source(node)?);
    }
    for node in &ir.filters {
        steps.push(compiler.filter(node)?);
    }
    for node in &ir.transforms {
        steps.push(compiler.transform(node)?);
    }
    for node in &ir.actions {
        steps.push(compiler.action(node)?);
    }
    for node in &ir.delivery {
        steps.push(compiler.delivery(node)?);
    }

    debug!(steps = steps.len(), "Compiled IR deterministically");
    Ok(steps)
}

/// Ids seen so far; a node may only read from one declared before it.
#[derive(Default)]
struct Deterministic {
    declared: HashSet<String>,
}

impl Deterministic {
    fn declare(&mut self, id: &str) -> Result<(), CompileError> {
        if id.trim().is_empty() {
            return Err(CompileError::unsupported("<unnamed>", "node without an id"));
        }
        if !self.declared.insert(id.to_string()) {
            return Err(CompileError::unsupported(id, "duplicate node id"));
        }
        Ok(())
    }

    fn reference(&self, node: &str, reference: &str) -> Result<String, CompileError> {
        if self.declared.contains(reference) {
            Ok(data_ref(reference))
        } else {
            Err(CompileError::InvalidReference {
                node: node.to_string(),
                reference: reference.to_string(),
            })
        }
    }

    fn source(&mut self, node: &DataSourceNode) -> Result<WorkflowStep, CompileError> {
        self.declare(&node.id)?;
        Ok(WorkflowStep::Action(call_step(
            &node.id,
            &node.plugin_key,
            &node.action,
            &node.params,
            None,
        )?))
    }

    fn filter(&mut self, node: &FilterNode) -> Result<WorkflowStep, CompileError> {
        let input = self.reference(&node.id, &node.input)?;
        self.declare(&node.id)?;
        if node.conditions.is_empty() {
            return Err(CompileError::unsupported(&node.id, "filter without conditions"));
        }

        let clauses = node
            .conditions
            .iter()
            .map(|c| render_condition(&node.id, c))
            .collect::<Result<Vec<_>, _>>()?;
        let joiner = match node.combinator {
            Combinator::And => " && ",
            Combinator::Or => " || ",
        };
        let mut config = Map::new();
        config.insert("condition".into(), Value::String(clauses.join(joiner)));

        Ok(WorkflowStep::Transform(TransformStep {
            id: node.id.clone(),
            name: format!("Filter {}", node.input),
            operation: StepOperation::Filter,
            input,
            config,
            condition: None,
            output_variable: Some(node.id.clone()),
        }))
    }

    fn transform(&mut self, node: &TransformNode) -> Result<WorkflowStep, CompileError> {
        let input = self.reference(&node.id, &node.input)?;
        self.declare(&node.id)?;
        let operation = match node.operation {
            TransformOperation::Map => StepOperation::Map,
            TransformOperation::Sort => StepOperation::Sort,
            TransformOperation::GroupBy => StepOperation::GroupBy,
            TransformOperation::Deduplicate => StepOperation::Deduplicate,
            TransformOperation::Aggregate => StepOperation::Aggregate,
            TransformOperation::Format => StepOperation::Format,
        };
        Ok(WorkflowStep::Transform(TransformStep {
            id: node.id.clone(),
            name: format!("{:?} {}", operation, node.input),
            operation,
            input,
            config: params_object(&node.config),
            condition: None,
            output_variable: Some(node.id.clone()),
        }))
    }

    /// An action with `for_each` becomes a scatter over that node's output.
    fn action(&mut self, node: &ActionNode) -> Result<WorkflowStep, CompileError> {
        let input = node
            .input
            .as_deref()
            .map(|r| self.reference(&node.id, r))
            .transpose()?;

        let Some(items) = node.for_each.as_deref() else {
            self.declare(&node.id)?;
            return Ok(WorkflowStep::Action(call_step(
                &node.id,
                &node.plugin_key,
                &node.action,
                &node.params,
                input,
            )?));
        };

        let items = self.reference(&node.id, items)?;
        self.declare(&node.id)?;
        let per_item = call_step(
            &format!("{}_item", node.id),
            &node.plugin_key,
            &node.action,
            &node.params,
            input,
        )?;
        Ok(WorkflowStep::ScatterGather(ScatterGatherStep {
            id: node.id.clone(),
            name: format!("For each item: {}.{}", node.plugin_key, node.action),
            scatter: Scatter {
                input: items,
                item_variable: DEFAULT_ITEM_VARIABLE.to_string(),
                steps: vec![WorkflowStep::Action(per_item)],
            },
            gather: Gather {
                operation: GatherOperation::Collect,
            },
            output_variable: Some(node.id.clone()),
        }))
    }

    fn delivery(&mut self, node: &DeliveryNode) -> Result<WorkflowStep, CompileError> {
        let input = node
            .input
            .as_deref()
            .map(|r| self.reference(&node.id, r))
            .transpose()?;
        self.declare(&node.id)?;
        Ok(WorkflowStep::Action(call_step(
            &node.id,
            &node.plugin_key,
            &node.action,
            &node.params,
            input,
        )?))
    }
}

fn call_step(
    id: &str,
    plugin: &str,
    action: &str,
    params: &[Param],
    input: Option<String>,
) -> Result<ActionStep, CompileError> {
    if plugin.trim().is_empty() {
        return Err(CompileError::unsupported(id, "empty plugin key"));
    }
    if action.trim().is_empty() {
        return Err(CompileError::MissingAction { node: id.to_string() });
    }
    let mut params = params_object(params);
    if let Some(input) = input {
        params.entry("input").or_insert(Value::String(input));
    }
    Ok(ActionStep {
        id: id.to_string(),
        name: format!("{plugin}.{action}"),
        plugin: plugin.to_string(),
        action: action.to_string(),
        params,
        condition: None,
        output_variable: Some(id.to_string()),
    })
}

fn data_ref(id: &str) -> String {
    format!("{{{{{id}.data}}}}")
}

fn accessor(field: &str) -> String {
    if FIELD_PATH.is_match(field) {
        format!("{DEFAULT_ITEM_VARIABLE}.{field}")
    } else {
        format!("{DEFAULT_ITEM_VARIABLE}[{}]", js_string(field))
    }
}

fn js_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Strings and numbers only; anything else has no textual form to match on.
fn text_operand(node: &str, condition: &Condition) -> Result<String, CompileError> {
    match &condition.value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CompileError::unsupported(
            node,
            format!("{:?} needs a text value, got {other}", condition.operator),
        )),
    }
}

fn scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(js_string(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn numeric_operand(node: &str, condition: &Condition) -> Result<String, CompileError> {
    let number = match &condition.value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(serde_json::Number::from_f64(n)
            .map(|n| n.to_string())
            .unwrap_or_else(|| n.to_string())),
        _ => Err(CompileError::unsupported(
            node,
            format!("{:?} needs a numeric value, got {}", condition.operator, condition.value),
        )),
    }
}

pub(crate) fn render_condition(node: &str, condition: &Condition) -> Result<String, CompileError> {
    if condition.field.trim().is_empty() {
        return Err(CompileError::unsupported(node, "condition without a field"));
    }
    let field = accessor(&condition.field);
    let text = format!("String({field} ?? '')");

    let rendered = match condition.operator {
        ConditionOperator::Contains | ConditionOperator::NotContains => {
            let needle = js_string(&text_operand(node, condition)?.to_lowercase());
            let test = format!("{text}.toLowerCase().includes({needle})");
            if condition.operator == ConditionOperator::Contains {
                test
            } else {
                format!("!{test}")
            }
        }
        ConditionOperator::StartsWith => {
            format!("{text}.startsWith({})", js_string(&text_operand(node, condition)?))
        }
        ConditionOperator::EndsWith => {
            format!("{text}.endsWith({})", js_string(&text_operand(node, condition)?))
        }
        ConditionOperator::Equals | ConditionOperator::NotEquals => {
            let literal = scalar_literal(&condition.value).ok_or_else(|| {
                CompileError::unsupported(node, "equality against a non-scalar value")
            })?;
            let op = if condition.operator == ConditionOperator::Equals {
                "==="
            } else {
                "!=="
            };
            format!("{field} {op} {literal}")
        }
        ConditionOperator::GreaterThan => {
            format!("Number({field}) > {}", numeric_operand(node, condition)?)
        }
        ConditionOperator::LessThan => {
            format!("Number({field}) < {}", numeric_operand(node, condition)?)
        }
        ConditionOperator::IsEmpty => format!("{text}.trim() === ''"),
        ConditionOperator::IsNotEmpty => format!("{text}.trim() !== ''"),
        ConditionOperator::In => {
            let Value::Array(options) = &condition.value else {
                return Err(CompileError::unsupported(node, "`in` needs a list of values"));
            };
            let literals = options
                .iter()
                .map(scalar_literal)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| CompileError::unsupported(node, "`in` list with nested values"))?;
            format!("[{}].includes({field})", literals.join(", "))
        }
    };
    Ok(rendered)
}
