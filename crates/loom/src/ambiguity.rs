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

//! Sorts everything a reviewer might need to look at into confirmation tiers.

use crate::config::AmbiguityConfig;
use crate::models::{
    Ambiguity, Assumption, EnhancedPrompt, GroundedSemanticPlan, GroundingResult, Impact,
    SemanticPlan,
};
use serde::{Deserialize, Serialize};

const LOW_INFERENCE_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewItemKind {
    Ambiguity,
    Assumption,
    Inference,
    GroundingError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub kind: ReviewItemKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default_option: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AmbiguityReport {
    pub must_confirm: Vec<ReviewItem>,
    pub should_review: Vec<ReviewItem>,
    pub looks_good: Vec<ReviewItem>,
    /// Assumptions the data could not settle: skipped, or unmatched with
    /// alternatives to pick from.
    pub grounding_ambiguities: Vec<ReviewItem>,
    pub overall_confidence: f64,
}

impl AmbiguityReport {
    pub fn needs_confirmation(&self) -> bool {
        !self.must_confirm.is_empty()
    }
}

pub struct AmbiguityDetector {
    config: AmbiguityConfig,
}

impl AmbiguityDetector {
    pub fn new(config: AmbiguityConfig) -> Self {
        Self { config }
    }

    pub fn detect(
        &self,
        plan: &SemanticPlan,
        grounded: &GroundedSemanticPlan,
        prompt: &EnhancedPrompt,
    ) -> AmbiguityReport {
        let mut report = AmbiguityReport::default();

        for ambiguity in &plan.ambiguities {
            self.classify_ambiguity(ambiguity, prompt, &mut report);
        }
        for assumption in &plan.assumptions {
            self.classify_assumption(assumption, grounded.result_for(&assumption.id), &mut report);
        }
        for (index, inference) in plan.inferences.iter().enumerate() {
            if inference.confidence < LOW_INFERENCE_CONFIDENCE {
                report.should_review.push(ReviewItem {
                    id: format!("inference_{}", index + 1),
                    kind: ReviewItemKind::Inference,
                    prompt: inference.statement.clone(),
                    options: Vec::new(),
                    default_option: None,
                    confidence: Some(inference.confidence),
                    reason: format!("low-confidence inference: {}", inference.basis),
                });
            }
        }
        for error in grounded.grounding_errors.iter().filter(|e| e.blocking && e.assumption_id.is_none()) {
            report.must_confirm.push(ReviewItem {
                id: error.code.as_str().to_string(),
                kind: ReviewItemKind::GroundingError,
                prompt: error.message.clone(),
                options: Vec::new(),
                default_option: None,
                confidence: Some(grounded.grounding_confidence),
                reason: "grounding could not be trusted".to_string(),
            });
        }

        let penalty = self
            .config
            .must_confirm_penalty
            .powi(report.must_confirm.len() as i32);
        report.overall_confidence = (grounded.grounding_confidence * penalty).clamp(0.0, 1.0);
        report
    }

    fn classify_ambiguity(&self, ambiguity: &Ambiguity, prompt: &EnhancedPrompt, report: &mut AmbiguityReport) {
        let answered = ambiguity
            .related_input
            .as_deref()
            .and_then(|key| prompt.resolved_input(key));
        let mut item = ReviewItem {
            id: ambiguity.id.clone(),
            kind: ReviewItemKind::Ambiguity,
            prompt: ambiguity.question.clone(),
            options: ambiguity.options.clone(),
            default_option: ambiguity.default_option.clone(),
            confidence: None,
            reason: String::new(),
        };

        if let Some(value) = answered {
            item.default_option = Some(value.to_string());
            item.reason = "answered by a resolved user input".to_string();
            report.looks_good.push(item);
            return;
        }

        match ambiguity.impact {
            Impact::Critical => {
                item.reason = "critical question without an answer".to_string();
                report.must_confirm.push(item);
            }
            Impact::Low if ambiguity.default_option.is_some() => {
                item.reason = "low impact with a sensible default".to_string();
                report.looks_good.push(item);
            }
            Impact::Moderate | Impact::Low => {
                item.reason = "open question".to_string();
                report.should_review.push(item);
            }
        }
    }

    fn classify_assumption(
        &self,
        assumption: &Assumption,
        result: Option<&GroundingResult>,
        report: &mut AmbiguityReport,
    ) {
        let critical = assumption.is_critical();
        let mut item = ReviewItem {
            id: assumption.id.clone(),
            kind: ReviewItemKind::Assumption,
            prompt: assumption.description.clone(),
            options: Vec::new(),
            default_option: assumption.fallback.clone(),
            confidence: result.map(|r| r.confidence),
            reason: String::new(),
        };

        let Some(result) = result else {
            item.reason = "not evaluated".to_string();
            report.should_review.push(item);
            return;
        };

        if result.validated {
            item.default_option = result.resolved_value.clone().or(item.default_option);
            if result.confidence >= self.config.looks_good_threshold {
                item.reason = format!("confirmed by {}", result.validation_method);
                report.looks_good.push(item);
            } else if critical {
                item.reason = "critical assumption confirmed with low confidence".to_string();
                report.must_confirm.push(item);
            } else {
                item.reason = "confirmed with low confidence".to_string();
                report.should_review.push(item);
            }
            return;
        }

        item.options = result.alternatives.clone();
        item.reason = result.evidence.clone();
        if critical {
            report.must_confirm.push(item);
        } else if result.skipped || !result.alternatives.is_empty() {
            report.grounding_ambiguities.push(item);
        } else {
            report.should_review.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssumptionCategory, ResolvedInput, ValidationStrategy};

    fn assumption(id: &str, impact: Impact) -> Assumption {
        Assumption {
            id: id.into(),
            category: AssumptionCategory::FieldName,
            description: format!("{id} exists"),
            validation_strategy: ValidationStrategy::default(),
            impact_if_wrong: impact,
            fallback: None,
        }
    }

    fn ambiguity(id: &str, impact: Impact, related: Option<&str>) -> Ambiguity {
        Ambiguity {
            id: id.into(),
            question: format!("{id}?"),
            options: vec!["a".into(), "b".into()],
            impact,
            default_option: None,
            related_input: related.map(str::to_string),
        }
    }

    fn validated(id: &str, confidence: f64) -> GroundingResult {
        let mut result = GroundingResult::failed(id, "exact", "");
        result.validated = true;
        result.confidence = confidence;
        result.resolved_value = Some(id.to_string());
        result
    }

    #[test]
    fn items_land_in_the_expected_buckets() {
        let plan = SemanticPlan {
            goal: "g".into(),
            assumptions: vec![
                assumption("ok", Impact::Moderate),
                assumption("weak", Impact::Critical),
                assumption("missing", Impact::Low),
            ],
            ambiguities: vec![
                ambiguity("which_sheet", Impact::Critical, Some("spreadsheet_id")),
                ambiguity("format", Impact::Critical, None),
                ambiguity("tone", Impact::Moderate, None),
            ],
            ..Default::default()
        };
        let missing = GroundingResult::skipped("missing", "no metadata");
        let grounded = GroundedSemanticPlan {
            plan: plan.clone(),
            grounding_results: vec![validated("ok", 1.0), validated("weak", 0.6), missing],
            grounding_errors: vec![],
            grounding_confidence: 0.8,
            validated_assumptions_count: 2,
            skipped_assumptions_count: 1,
            all_assumptions_skipped: false,
            disabled_assumptions: vec![],
        };
        let mut prompt = EnhancedPrompt::new("x");
        prompt.specifics.resolved_user_inputs.push(ResolvedInput {
            key: "spreadsheet_id".into(),
            value: "abc".into(),
        });

        let report = AmbiguityDetector::new(AmbiguityConfig::default()).detect(&plan, &grounded, &prompt);
        let ids = |items: &[ReviewItem]| items.iter().map(|i| i.id.clone()).collect::<Vec<_>>();

        assert_eq!(ids(&report.must_confirm), vec!["format", "weak"]);
        assert_eq!(ids(&report.should_review), vec!["tone"]);
        assert_eq!(ids(&report.looks_good), vec!["which_sheet", "ok"]);
        assert_eq!(ids(&report.grounding_ambiguities), vec!["missing"]);
        assert_eq!(report.looks_good[0].default_option.as_deref(), Some("abc"));
        assert!((report.overall_confidence - 0.8 * 0.81).abs() < 1e-9);
    }
}
