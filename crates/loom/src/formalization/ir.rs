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

use crate::llm::schema::{array, nullable, object, string, string_enum};
use crate::models::ResolvedOverride;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const IR_VERSION: &str = "1.0";

/// Formal, plugin-aware description of a workflow. Nodes run in the order
/// sources, filters, transforms, actions, delivery, and may only consume
/// nodes that come before them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntermediateRepresentation {
    pub ir_version: String,
    pub goal: String,
    pub data_sources: Vec<DataSourceNode>,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    #[serde(default)]
    pub transforms: Vec<TransformNode>,
    #[serde(default)]
    pub actions: Vec<ActionNode>,
    #[serde(default)]
    pub delivery: Vec<DeliveryNode>,
    #[serde(default)]
    pub edge_cases: Vec<EdgeCaseRule>,
    #[serde(default)]
    pub overrides: Vec<ResolvedOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Param {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceNode {
    pub id: String,
    pub plugin_key: String,
    /// Empty when the request did not say; filled from the catalog.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    In,
}

impl ConditionOperator {
    pub const ALL: [&'static str; 11] = [
        "equals",
        "not_equals",
        "contains",
        "not_contains",
        "starts_with",
        "ends_with",
        "greater_than",
        "less_than",
        "is_empty",
        "is_not_empty",
        "in",
    ];

    pub fn takes_value(&self) -> bool {
        !matches!(self, ConditionOperator::IsEmpty | ConditionOperator::IsNotEmpty)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterNode {
    pub id: String,
    pub input: String,
    pub combinator: Combinator,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOperation {
    Map,
    Sort,
    GroupBy,
    Deduplicate,
    Aggregate,
    Format,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformNode {
    pub id: String,
    pub input: String,
    pub operation: TransformOperation,
    #[serde(default)]
    pub config: Vec<Param>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionNode {
    pub id: String,
    pub plugin_key: String,
    pub action: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub input: Option<String>,
    /// Runs the action once per item of this node's output.
    #[serde(default)]
    pub for_each: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryNode {
    pub id: String,
    pub plugin_key: String,
    pub action: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeCaseRule {
    pub condition: String,
    pub handling: String,
}

pub fn params_object(params: &[Param]) -> Map<String, Value> {
    params
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect()
}

impl IntermediateRepresentation {
    /// Node ids in execution order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.data_sources
            .iter()
            .map(|n| n.id.as_str())
            .chain(self.filters.iter().map(|n| n.id.as_str()))
            .chain(self.transforms.iter().map(|n| n.id.as_str()))
            .chain(self.actions.iter().map(|n| n.id.as_str()))
            .chain(self.delivery.iter().map(|n| n.id.as_str()))
            .collect()
    }

    /// Every plugin the workflow touches, first use first.
    pub fn plugins(&self) -> Vec<&str> {
        let mut plugins: Vec<&str> = Vec::new();
        let all = self
            .data_sources
            .iter()
            .map(|n| n.plugin_key.as_str())
            .chain(self.actions.iter().map(|n| n.plugin_key.as_str()))
            .chain(self.delivery.iter().map(|n| n.plugin_key.as_str()));
        for plugin in all {
            if !plugins.contains(&plugin) {
                plugins.push(plugin);
            }
        }
        plugins
    }
}

fn scalar() -> Value {
    json!({
        "anyOf": [
            {"type": ["string", "number", "boolean", "null"]},
            {"type": "array", "items": {"type": "string"}}
        ]
    })
}

fn params() -> Value {
    array(object(&[("key", string()), ("value", scalar())]))
}

pub fn ir_schema() -> Value {
    let condition = object(&[
        ("field", string()),
        ("operator", string_enum(&ConditionOperator::ALL)),
        ("value", scalar()),
    ]);
    object(&[
        ("ir_version", string_enum(&[IR_VERSION])),
        ("goal", string()),
        (
            "data_sources",
            array(object(&[
                ("id", string()),
                ("plugin_key", string()),
                ("action", string()),
                ("params", params()),
                ("fields", array(string())),
            ])),
        ),
        (
            "filters",
            array(object(&[
                ("id", string()),
                ("input", string()),
                ("combinator", string_enum(&["and", "or"])),
                ("conditions", array(condition)),
            ])),
        ),
        (
            "transforms",
            array(object(&[
                ("id", string()),
                ("input", string()),
                (
                    "operation",
                    string_enum(&["map", "sort", "group_by", "deduplicate", "aggregate", "format"]),
                ),
                ("config", params()),
            ])),
        ),
        (
            "actions",
            array(object(&[
                ("id", string()),
                ("plugin_key", string()),
                ("action", string()),
                ("params", params()),
                ("input", nullable(string())),
                ("for_each", nullable(string())),
            ])),
        ),
        (
            "delivery",
            array(object(&[
                ("id", string()),
                ("plugin_key", string()),
                ("action", string()),
                ("params", params()),
                ("input", nullable(string())),
            ])),
        ),
        (
            "edge_cases",
            array(object(&[("condition", string()), ("handling", string())])),
        ),
    ])
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn param(key: &str, value: Value) -> Param {
        Param {
            key: key.into(),
            value,
        }
    }

    /// Read a sheet, keep overdue rows, email each customer, post a summary.
    pub fn invoice_ir() -> IntermediateRepresentation {
        IntermediateRepresentation {
            ir_version: IR_VERSION.into(),
            goal: "Remind customers about overdue invoices".into(),
            data_sources: vec![DataSourceNode {
                id: "invoices".into(),
                plugin_key: "google-sheets".into(),
                action: "read_range".into(),
                params: vec![param("spreadsheet_id", json!("abc"))],
                fields: vec!["customer_email".into(), "status".into()],
            }],
            filters: vec![FilterNode {
                id: "overdue".into(),
                input: "invoices".into(),
                combinator: Combinator::And,
                conditions: vec![Condition {
                    field: "status".into(),
                    operator: ConditionOperator::Equals,
                    value: json!("overdue"),
                }],
            }],
            transforms: vec![],
            actions: vec![ActionNode {
                id: "remind".into(),
                plugin_key: "gmail".into(),
                action: "send_email".into(),
                params: vec![param("to", json!("{{item.customer_email}}"))],
                input: None,
                for_each: Some("overdue".into()),
            }],
            delivery: vec![DeliveryNode {
                id: "summary".into(),
                plugin_key: "slack".into(),
                action: "post_message".into(),
                params: vec![param("channel", json!("#finance"))],
                input: Some("overdue".into()),
            }],
            edge_cases: vec![],
            overrides: vec![],
        }
    }
}
