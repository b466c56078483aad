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
use super::plan::SemanticPlan;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundingResult {
    pub assumption_id: String,
    pub validated: bool,
    #[serde(default)]
    pub skipped: bool,
    pub confidence: f64,
    #[serde(default)]
    pub resolved_value: Option<String>,
    pub validation_method: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alternatives: Vec<String>,
}

impl GroundingResult {
    /// A skipped result is never a success: not validated and zero confidence.
    pub fn skipped(assumption_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            assumption_id: assumption_id.into(),
            validated: false,
            skipped: true,
            confidence: 0.0,
            resolved_value: None,
            validation_method: "skipped".to_string(),
            evidence: reason.into(),
            alternatives: Vec::new(),
        }
    }

    pub fn failed(
        assumption_id: impl Into<String>,
        method: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            assumption_id: assumption_id.into(),
            validated: false,
            skipped: false,
            confidence: 0.0,
            resolved_value: None,
            validation_method: method.into(),
            evidence: evidence.into(),
            alternatives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingErrorCode {
    InsufficientValidation,
    CriticalAssumptionFailed,
    ValidationFailed,
    InvalidPattern,
}

impl GroundingErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingErrorCode::InsufficientValidation => "insufficient_validation",
            GroundingErrorCode::CriticalAssumptionFailed => "critical_assumption_failed",
            GroundingErrorCode::ValidationFailed => "validation_failed",
            GroundingErrorCode::InvalidPattern => "invalid_pattern",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundingError {
    pub code: GroundingErrorCode,
    #[serde(default)]
    pub assumption_id: Option<String>,
    pub message: String,
    pub blocking: bool,
}

/// A semantic plan extended with the outcome of validating its assumptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundedSemanticPlan {
    #[serde(flatten)]
    pub plan: SemanticPlan,
    #[serde(default, deserialize_with = "null_as_default")]
    pub grounding_results: Vec<GroundingResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub grounding_errors: Vec<GroundingError>,
    pub grounding_confidence: f64,
    #[serde(default)]
    pub validated_assumptions_count: usize,
    #[serde(default)]
    pub skipped_assumptions_count: usize,
    #[serde(default)]
    pub all_assumptions_skipped: bool,
    /// Assumptions removed during review, kept for traceability.
    #[serde(default, deserialize_with = "null_as_default")]
    pub disabled_assumptions: Vec<String>,
}

impl GroundedSemanticPlan {
    pub fn has_blocking_errors(&self) -> bool {
        self.grounding_errors.iter().any(|e| e.blocking)
    }

    pub fn result_for(&self, assumption_id: &str) -> Option<&GroundingResult> {
        self.grounding_results
            .iter()
            .find(|r| r.assumption_id == assumption_id)
    }

    /// Resolved values of validated assumptions, for prompts downstream.
    pub fn grounded_facts(&self) -> Vec<(String, String)> {
        self.grounding_results
            .iter()
            .filter(|r| r.validated)
            .filter_map(|r| {
                r.resolved_value
                    .as_ref()
                    .map(|v| (r.assumption_id.clone(), v.clone()))
            })
            .collect()
    }

    pub fn facts_json(&self) -> Value {
        Value::Object(
            self.grounded_facts()
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )
    }
}
