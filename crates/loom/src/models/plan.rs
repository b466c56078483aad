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

/// The model's understanding of a request before any data validation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SemanticPlan {
    #[serde(default)]
    pub goal: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub understanding: Understanding,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assumptions: Vec<Assumption>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ambiguities: Vec<Ambiguity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inferences: Vec<Inference>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning_trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Understanding {
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_flow: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub edge_cases: Vec<EdgeCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeCase {
    pub condition: String,
    #[serde(default)]
    pub suggested_handling: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assumption {
    pub id: String,
    pub category: AssumptionCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub validation_strategy: ValidationStrategy,
    #[serde(default)]
    pub impact_if_wrong: Impact,
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Assumption {
    pub fn is_critical(&self) -> bool {
        self.impact_if_wrong == Impact::Critical
    }
}

/// Each category is handled by exactly one validator. Anything the model
/// invents beyond these decodes to `Unknown` and fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssumptionCategory {
    FieldName,
    DataType,
    ValueFormat,
    Structure,
    Behavior,
    #[serde(other)]
    Unknown,
}

impl AssumptionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssumptionCategory::FieldName => "field_name",
            AssumptionCategory::DataType => "data_type",
            AssumptionCategory::ValueFormat => "value_format",
            AssumptionCategory::Structure => "structure",
            AssumptionCategory::Behavior => "behavior",
            AssumptionCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ValidationStrategy {
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: StrategyParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StrategyParameters {
    /// Synonyms for the field the assumption is about.
    #[serde(default, deserialize_with = "null_as_default")]
    pub candidates: Vec<String>,
    #[serde(default)]
    pub expected_type: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required_headers: Vec<String>,
    /// A concrete field name, or the id of an earlier assumption whose
    /// resolved value names the field.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub plugin_key: Option<String>,
    #[serde(default)]
    pub min_match_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    #[serde(alias = "high")]
    Critical,
    #[default]
    #[serde(alias = "medium")]
    Moderate,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ambiguity {
    pub id: String,
    pub question: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub default_option: Option<String>,
    /// Key of a user input that, once resolved, answers this question.
    #[serde(default)]
    pub related_input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inference {
    pub statement: String,
    #[serde(default)]
    pub basis: String,
    #[serde(default = "default_inference_confidence")]
    pub confidence: f64,
}

fn default_inference_confidence() -> f64 {
    0.5
}

impl SemanticPlan {
    pub fn assumption(&self, id: &str) -> Option<&Assumption> {
        self.assumptions.iter().find(|a| a.id == id)
    }
}
