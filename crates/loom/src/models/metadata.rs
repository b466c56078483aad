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

use super::null_as_default;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field list and sampled rows for one connected data source.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DataSourceMetadata {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sample_rows: Vec<SampleRow>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub plugin_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn described(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
        }
    }
}

/// Rows arrive either keyed by field name or positionally, aligned with
/// `headers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SampleRow {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl DataSourceMetadata {
    /// Described fields when present, otherwise the legacy header list.
    pub fn effective_fields(&self) -> Vec<FieldDescriptor> {
        if !self.fields.is_empty() {
            return self.fields.clone();
        }
        self.headers.iter().map(FieldDescriptor::named).collect()
    }

    pub fn has_field_info(&self) -> bool {
        !self.fields.is_empty() || !self.headers.is_empty()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.effective_fields().into_iter().map(|f| f.name).collect()
    }

    /// Up to `limit` values of `field` across the sampled rows, nulls included.
    pub fn sample_values(&self, field: &str, limit: usize) -> Vec<Value> {
        let position = self.headers.iter().position(|h| h == field);
        self.sample_rows
            .iter()
            .filter_map(|row| match row {
                SampleRow::Object(map) => Some(map.get(field).cloned().unwrap_or(Value::Null)),
                SampleRow::Array(values) => {
                    position.map(|i| values.get(i).cloned().unwrap_or(Value::Null))
                }
            })
            .take(limit)
            .collect()
    }

    pub fn matches_plugin(&self, plugin_key: &str) -> bool {
        self.plugin_key.as_deref() == Some(plugin_key)
    }
}
