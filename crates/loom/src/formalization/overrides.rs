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

use crate::grounding::aggregate_confidence;
use crate::models::{
    GroundedSemanticPlan, GroundingError, GroundingErrorCode, HumanDecisions, OverrideSource,
    ResolvedOverride,
};
use std::collections::HashSet;

/// Flattens review decisions into one ordered list: input overrides,
/// then ambiguity answers, confirmed patterns, edge-case handling and
/// finally disabled assumptions.
pub fn flatten_decisions(decisions: &HumanDecisions) -> Vec<ResolvedOverride> {
    let mut overrides = Vec::new();
    let mut push = |key: String, value: &str, source: OverrideSource| {
        overrides.push(ResolvedOverride {
            key,
            value: value.to_string(),
            source,
        });
    };

    for (key, value) in &decisions.input_overrides {
        push(key.clone(), value, OverrideSource::InputOverride);
    }
    for (id, answer) in &decisions.resolved_ambiguities {
        push(format!("ambiguity.{id}"), answer, OverrideSource::Ambiguity);
    }
    for (id, pattern) in &decisions.confirmed_patterns {
        push(format!("pattern.{id}"), pattern, OverrideSource::ConfirmedPattern);
    }
    for (condition, handling) in &decisions.edge_case_handling {
        push(format!("edge_case.{condition}"), handling, OverrideSource::EdgeCase);
    }
    for id in &decisions.disabled_assumptions {
        push(format!("assumption.{id}"), "disabled", OverrideSource::DisabledAssumption);
    }
    overrides
}

/// A copy of the grounded plan without the disabled assumptions, their
/// results and errors. Counts and confidence are recomputed, including the
/// majority-skip check.
pub fn prune_disabled(
    grounded: &GroundedSemanticPlan,
    disabled: &[String],
    skip_threshold: f64,
) -> GroundedSemanticPlan {
    let mut pruned = grounded.clone();
    let disabled_set: HashSet<&str> = disabled.iter().map(String::as_str).collect();
    if disabled_set.is_empty() {
        return pruned;
    }

    pruned
        .plan
        .assumptions
        .retain(|a| !disabled_set.contains(a.id.as_str()));
    pruned
        .grounding_results
        .retain(|r| !disabled_set.contains(r.assumption_id.as_str()));
    pruned.grounding_errors.retain(|e| {
        e.code != GroundingErrorCode::InsufficientValidation
            && e.assumption_id
                .as_deref()
                .map_or(true, |id| !disabled_set.contains(id))
    });

    let total = pruned.plan.assumptions.len();
    let skipped = pruned.grounding_results.iter().filter(|r| r.skipped).count();
    pruned.skipped_assumptions_count = skipped;
    pruned.validated_assumptions_count = pruned.grounding_results.iter().filter(|r| r.validated).count();
    pruned.all_assumptions_skipped = total > 0 && skipped == total;
    pruned.grounding_confidence = aggregate_confidence(&pruned.grounding_results);
    if total > 0 && skipped as f64 / total as f64 > skip_threshold {
        pruned.grounding_errors.push(GroundingError {
            code: GroundingErrorCode::InsufficientValidation,
            assumption_id: None,
            message: format!("{skipped} of {total} remaining assumptions could not be checked against data"),
            blocking: true,
        });
    }

    for id in disabled {
        if !pruned.disabled_assumptions.contains(id) {
            pruned.disabled_assumptions.push(id.clone());
        }
    }
    pruned
}
