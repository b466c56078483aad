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

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use std::path::Path;
use tracing::{debug, info};

const READ_VERBS: &[&str] = &[
    "get", "list", "read", "search", "fetch", "find", "query", "retrieve", "lookup", "download",
];
const WRITE_VERBS: &[&str] = &[
    "send", "create", "update", "delete", "remove", "write", "append", "post", "insert", "modify",
    "archive", "move", "upload", "reply", "forward", "add", "set", "clear",
];
const READ_VERB_SCORE: i64 = 10;
const WRITE_VERB_SCORE: i64 = -100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCatalog {
    #[serde(default)]
    pub plugins: Vec<PluginDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
}

impl ActionDefinition {
    pub fn input_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                let mut names: Vec<String> = props.keys().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    pub fn required_inputs(&self) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn is_read_only(&self) -> bool {
        verb_score(&self.name) >= 0
    }
}

impl PluginCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let catalog: PluginCatalog =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: shown.clone(),
                source,
            })?;
        info!(path = %shown, plugins = catalog.plugins.len(), "Plugin catalog loaded");
        Ok(catalog)
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugin(&self, key: &str) -> Option<&PluginDefinition> {
        self.plugins.iter().find(|p| p.key == key)
    }

    pub fn action(&self, plugin: &str, action: &str) -> Option<&ActionDefinition> {
        self.plugin(plugin)?.actions.iter().find(|a| a.name == action)
    }

    pub fn has_action(&self, plugin: &str, action: &str) -> bool {
        self.action(plugin, action).is_some()
    }

    /// Restricts the catalog to the named services, in catalog order.
    pub fn scoped(&self, services: &[String]) -> PluginCatalog {
        PluginCatalog {
            plugins: self
                .plugins
                .iter()
                .filter(|p| services.iter().any(|s| s == &p.key))
                .cloned()
                .collect(),
        }
    }

    /// The read-only action to run when a request names a service but not
    /// an operation. Richer output schemas score higher; read verbs add,
    /// write verbs subtract heavily. A service offering only writes has no
    /// default.
    pub fn default_action(&self, service: &str) -> Option<&ActionDefinition> {
        let plugin = self.plugin(service)?;
        let mut best: Option<(&ActionDefinition, i64)> = None;
        for action in plugin.actions.iter().filter(|a| a.is_read_only()) {
            let score = action_score(action);
            debug!(plugin = service, action = %action.name, score = score, "Scored candidate default action");
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((action, score));
            }
        }
        best.map(|(action, _)| action)
    }

    /// Prompt rendering of every action, one per line.
    pub fn vocabulary(&self) -> String {
        let mut out = String::new();
        for plugin in &self.plugins {
            let _ = writeln!(out, "{} ({}):", plugin.key, plugin.name);
            for action in &plugin.actions {
                let inputs = action.input_names();
                let _ = writeln!(
                    out,
                    "  - {}: {}{}",
                    action.name,
                    action.description,
                    if inputs.is_empty() {
                        String::new()
                    } else {
                        format!(" [inputs: {}]", inputs.join(", "))
                    }
                );
            }
        }
        out
    }
}

fn action_score(action: &ActionDefinition) -> i64 {
    output_field_count(&action.output_schema) as i64 + verb_score(&action.name)
}

fn verb_score(name: &str) -> i64 {
    let lowered = name.to_lowercase();
    let words: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).collect();
    if words.iter().any(|w| WRITE_VERBS.contains(w)) {
        WRITE_VERB_SCORE
    } else if words.iter().any(|w| READ_VERBS.contains(w)) {
        READ_VERB_SCORE
    } else {
        0
    }
}

/// Counts leaf properties, looking through arrays and nested objects.
fn output_field_count(schema: &Value) -> usize {
    if let Some(items) = schema.get("items") {
        return output_field_count(items);
    }
    match schema.get("properties").and_then(Value::as_object) {
        Some(props) => props
            .values()
            .map(|p| output_field_count(p).max(1))
            .sum(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
plugins:
  - key: gmail
    name: Gmail
    actions:
      - name: send_email
        description: Send a message
        input_schema: {properties: {to: {type: string}, subject: {type: string}}, required: [to]}
        output_schema: {properties: {id: {}, thread_id: {}, label_ids: {}, a: {}, b: {}, c: {}, d: {}, e: {}, f: {}, g: {}, h: {}, i: {}}}
      - name: search_emails
        description: Search the mailbox
        output_schema:
          type: array
          items: {properties: {id: {}, subject: {}, snippet: {}, from: {}}}
      - name: get_labels
        output_schema: {properties: {labels: {}}}
  - key: slack
    name: Slack
    actions:
      - name: post_message
        output_schema: {properties: {ts: {}}}
"#;

    fn catalog() -> PluginCatalog {
        serde_yaml::from_str(CATALOG).unwrap()
    }

    #[test]
    fn default_action_prefers_rich_read_actions() {
        let catalog = catalog();
        assert_eq!(catalog.default_action("gmail").unwrap().name, "search_emails");
        assert!(catalog.default_action("slack").is_none());
        assert!(catalog.default_action("unknown").is_none());
    }

    #[test]
    fn wide_write_action_never_outranks_a_read() {
        let leaves = (0..150)
            .map(|i| format!("f{i}: {{}}"))
            .collect::<Vec<_>>()
            .join(", ");
        let yaml = format!(
            "plugins:\n  - key: crm\n    name: CRM\n    actions:\n      - name: update_records\n        output_schema: {{properties: {{{leaves}}}}}\n      - name: list_contacts\n        output_schema: {{properties: {{id: {{}}}}}}\n"
        );
        let catalog: PluginCatalog = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(catalog.default_action("crm").unwrap().name, "list_contacts");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, CATALOG.as_bytes()).unwrap();
        let loaded = PluginCatalog::from_path(file.path()).unwrap();
        assert_eq!(loaded.plugins.len(), 2);
        assert!(loaded.has_action("gmail", "search_emails"));
    }

    #[test]
    fn scoping_limits_the_vocabulary() {
        let catalog = catalog();
        let scoped = catalog.scoped(&["slack".to_string()]);
        assert!(scoped.has_action("slack", "post_message"));
        assert!(!scoped.has_action("gmail", "send_email"));
        let vocabulary = catalog.vocabulary();
        assert!(vocabulary.contains("send_email: Send a message [inputs: subject, to]"));
        assert_eq!(
            catalog.action("gmail", "send_email").unwrap().required_inputs(),
            vec!["to".to_string()]
        );
    }

    #[test]
    fn missing_catalog_file_is_an_io_error() {
        assert!(matches!(
            PluginCatalog::from_path("/no/such/plugins.yml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
