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
use std::collections::BTreeMap;

/// What a reviewer decided between generation and compilation. Maps are
/// ordered so the flattened overrides come out deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HumanDecisions {
    /// Ambiguity id to chosen answer.
    #[serde(default, deserialize_with = "null_as_default")]
    pub resolved_ambiguities: BTreeMap<String, String>,
    /// Assumption id to the pattern or field the reviewer confirmed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub confirmed_patterns: BTreeMap<String, String>,
    /// Edge case condition to chosen handling.
    #[serde(default, deserialize_with = "null_as_default")]
    pub edge_case_handling: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub disabled_assumptions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub acknowledge_blocking_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    Ambiguity,
    ConfirmedPattern,
    EdgeCase,
    DisabledAssumption,
    InputOverride,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedOverride {
    pub key: String,
    pub value: String,
    pub source: OverrideSource,
}

impl HumanDecisions {
    pub fn is_empty(&self) -> bool {
        self.resolved_ambiguities.is_empty()
            && self.confirmed_patterns.is_empty()
            && self.edge_case_handling.is_empty()
            && self.disabled_assumptions.is_empty()
            && self.input_overrides.is_empty()
    }
}
