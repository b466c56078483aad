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

use super::ir::IntermediateRepresentation;
use crate::catalog::PluginCatalog;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("IR failed validation: {}", issues.join("; "))]
pub struct IrValidationError {
    pub issues: Vec<String>,
}

/// Walks nodes in execution order, remembering which ids exist so far.
struct Checker<'a> {
    seen: HashSet<&'a str>,
    issues: Vec<String>,
}

impl<'a> Checker<'a> {
    fn declare(&mut self, id: &'a str) {
        if id.trim().is_empty() {
            self.issues.push("node with an empty id".to_string());
        } else if !self.seen.insert(id) {
            self.issues.push(format!("duplicate node id '{id}'"));
        }
    }

    fn reference(&mut self, owner: &str, label: &str, reference: &str) {
        if !self.seen.contains(reference) {
            self.issues.push(format!(
                "{owner}.{label} refers to '{reference}', which is not an earlier node"
            ));
        }
    }

    fn plugin(&mut self, id: &str, plugin: &str, action: &str, catalog: Option<&PluginCatalog>) {
        if plugin.trim().is_empty() {
            self.issues.push(format!("node '{id}' has no plugin"));
        } else if action.trim().is_empty() {
            self.issues
                .push(format!("node '{id}' has no action for plugin '{plugin}'"));
        } else if let Some(catalog) = catalog {
            if catalog.plugin(plugin).is_none() {
                self.issues
                    .push(format!("node '{id}' uses unknown plugin '{plugin}'"));
            } else if !catalog.has_action(plugin, action) {
                self.issues
                    .push(format!("node '{id}' uses unknown action '{plugin}.{action}'"));
            }
        }
    }
}

/// Structural checks run before compilation. Catalog membership is only
/// checked when a non-empty catalog is supplied.
pub fn validate_ir(
    ir: &IntermediateRepresentation,
    catalog: Option<&PluginCatalog>,
) -> Result<(), IrValidationError> {
    let catalog = catalog.filter(|c| !c.is_empty());
    let mut check = Checker {
        seen: HashSet::new(),
        issues: Vec::new(),
    };

    if ir.ir_version.trim().is_empty() {
        check.issues.push("ir_version is required".to_string());
    }
    if ir.goal.trim().is_empty() {
        check.issues.push("goal is required".to_string());
    }
    if ir.data_sources.is_empty() {
        check
            .issues
            .push("at least one data source is required".to_string());
    }

    for node in &ir.data_sources {
        check.plugin(&node.id, &node.plugin_key, &node.action, catalog);
        check.declare(&node.id);
    }
    for node in &ir.filters {
        check.reference(&node.id, "input", &node.input);
        if node.conditions.is_empty() {
            check
                .issues
                .push(format!("filter '{}' has no conditions", node.id));
        }
        for condition in &node.conditions {
            if condition.field.trim().is_empty() {
                check
                    .issues
                    .push(format!("filter '{}' has a condition without a field", node.id));
            }
            if condition.operator.takes_value() && condition.value.is_null() {
                check.issues.push(format!(
                    "filter '{}' condition on '{}' needs a value",
                    node.id, condition.field
                ));
            }
        }
        check.declare(&node.id);
    }
    for node in &ir.transforms {
        check.reference(&node.id, "input", &node.input);
        check.declare(&node.id);
    }
    for node in &ir.actions {
        if let Some(input) = &node.input {
            check.reference(&node.id, "input", input);
        }
        if let Some(for_each) = &node.for_each {
            check.reference(&node.id, "for_each", for_each);
        }
        check.plugin(&node.id, &node.plugin_key, &node.action, catalog);
        check.declare(&node.id);
    }
    for node in &ir.delivery {
        if let Some(input) = &node.input {
            check.reference(&node.id, "input", input);
        }
        check.plugin(&node.id, &node.plugin_key, &node.action, catalog);
        check.declare(&node.id);
    }

    if check.issues.is_empty() {
        Ok(())
    } else {
        Err(IrValidationError {
            issues: check.issues,
        })
    }
}
