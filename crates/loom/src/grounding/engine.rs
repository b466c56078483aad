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

use super::data_sampler::{DataSampler, ValueType};
use super::field_matcher::{FieldMatch, FieldMatcher, MatchOutcome};
use crate::config::GroundingConfig;
use crate::models::{
    Assumption, AssumptionCategory, DataSourceMetadata, GroundedSemanticPlan, GroundingError,
    GroundingErrorCode, GroundingResult, SemanticPlan,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Validates a plan's assumptions against sampled data, one at a time and
/// in plan order so later assumptions can refer to earlier resolutions.
pub struct GroundingEngine {
    config: GroundingConfig,
    matcher: FieldMatcher,
    sampler: DataSampler,
}

/// A field located in one of the sources.
struct Located<'a> {
    source: &'a DataSourceMetadata,
    matched: FieldMatch,
}

impl GroundingEngine {
    pub fn new(config: GroundingConfig) -> Self {
        let matcher = FieldMatcher::new(config.min_fuzzy_similarity, config.max_alternatives);
        let sampler = DataSampler::new(config.sample_size, config.min_pattern_match_rate);
        Self {
            config,
            matcher,
            sampler,
        }
    }

    #[instrument(skip_all, fields(goal = %plan.goal, assumptions = plan.assumptions.len(), sources = metadata.len()))]
    pub fn ground(
        &self,
        plan: &SemanticPlan,
        metadata: &[DataSourceMetadata],
    ) -> GroundedSemanticPlan {
        let total = plan.assumptions.len();
        let mut results: Vec<GroundingResult> = Vec::with_capacity(total);
        let mut errors: Vec<GroundingError> = Vec::new();
        let mut resolved: HashMap<String, String> = HashMap::new();

        for assumption in &plan.assumptions {
            let result = self.validate(assumption, metadata, &resolved, &mut errors);
            debug!(
                assumption_id = %assumption.id,
                category = assumption.category.as_str(),
                validated = result.validated,
                skipped = result.skipped,
                confidence = result.confidence,
                method = %result.validation_method,
                "Assumption grounded"
            );

            if let Some(value) = result.resolved_value.as_ref().filter(|_| result.validated) {
                resolved.insert(assumption.id.clone(), value.clone());
            }

            let failed = !result.validated && !result.skipped;
            results.push(result);

            if failed {
                let critical = assumption.is_critical();
                errors.push(GroundingError {
                    code: if critical {
                        GroundingErrorCode::CriticalAssumptionFailed
                    } else {
                        GroundingErrorCode::ValidationFailed
                    },
                    assumption_id: Some(assumption.id.clone()),
                    message: format!("assumption '{}' could not be validated: {}", assumption.id, assumption.description),
                    blocking: critical,
                });
                if critical && self.config.fail_fast {
                    warn!(assumption_id = %assumption.id, "Critical assumption failed, stopping grounding early");
                    break;
                }
            }
        }

        let skipped = results.iter().filter(|r| r.skipped).count();
        let validated = results.iter().filter(|r| r.validated).count();
        let confidence = aggregate_confidence(&results);

        if total > 0 && skipped as f64 / total as f64 > self.config.skip_threshold {
            warn!(skipped = skipped, total = total, "Majority of assumptions skipped");
            errors.push(GroundingError {
                code: GroundingErrorCode::InsufficientValidation,
                assumption_id: None,
                message: format!(
                    "{skipped} of {total} assumptions could not be checked against data; grounding is not trustworthy"
                ),
                blocking: true,
            });
        }

        info!(
            validated = validated,
            skipped = skipped,
            total = total,
            confidence = confidence,
            blocking = errors.iter().any(|e| e.blocking),
            "Grounding complete"
        );

        GroundedSemanticPlan {
            plan: plan.clone(),
            grounding_results: results,
            grounding_errors: errors,
            grounding_confidence: confidence,
            validated_assumptions_count: validated,
            skipped_assumptions_count: skipped,
            all_assumptions_skipped: total > 0 && skipped == total,
            disabled_assumptions: Vec::new(),
        }
    }

    fn validate(
        &self,
        assumption: &Assumption,
        metadata: &[DataSourceMetadata],
        resolved: &HashMap<String, String>,
        errors: &mut Vec<GroundingError>,
    ) -> GroundingResult {
        match assumption.category {
            AssumptionCategory::FieldName => self.validate_field_name(assumption, metadata, resolved),
            AssumptionCategory::DataType => self.validate_data_type(assumption, metadata, resolved),
            AssumptionCategory::ValueFormat => {
                self.validate_value_format(assumption, metadata, resolved, errors)
            }
            AssumptionCategory::Structure => self.validate_structure(assumption, metadata),
            AssumptionCategory::Behavior => GroundingResult {
                assumption_id: assumption.id.clone(),
                validated: true,
                skipped: false,
                confidence: self.config.behavior_confidence,
                resolved_value: None,
                validation_method: "heuristic".to_string(),
                evidence: "behaviour can only be confirmed by running the workflow".to_string(),
                alternatives: Vec::new(),
            },
            AssumptionCategory::Unknown => GroundingResult::failed(
                &assumption.id,
                "unknown_category",
                "no validator exists for this assumption category",
            ),
        }
    }

    fn validate_field_name(
        &self,
        assumption: &Assumption,
        metadata: &[DataSourceMetadata],
        resolved: &HashMap<String, String>,
    ) -> GroundingResult {
        let candidates = field_candidates(assumption, resolved);
        if candidates.is_empty() {
            return GroundingResult::failed(&assumption.id, "field_match", "no candidate field names given");
        }
        let sources = self.sources_for(assumption, metadata);
        if sources.is_empty() {
            return GroundingResult::skipped(&assumption.id, "no field metadata available for this source");
        }

        let (located, alternatives) = self.locate(&candidates, &sources);
        let Some(Located { source, matched }) = located else {
            let mut result = GroundingResult::failed(
                &assumption.id,
                "field_match",
                format!("none of {:?} matched an available field", candidates),
            );
            result.alternatives = alternatives;
            return result;
        };

        let analysis = self.sampler.analyze_field(source, &matched.field);
        let expected = expected_type(assumption);
        let validation = self
            .sampler
            .validate_field_assumption(matched.confidence, &analysis, expected);

        GroundingResult {
            assumption_id: assumption.id.clone(),
            validated: true,
            skipped: false,
            confidence: validation.confidence,
            resolved_value: Some(matched.field.clone()),
            validation_method: matched.method.as_str().to_string(),
            evidence: format!(
                "matched '{}' ({}, {:.2}); {}",
                matched.field,
                matched.method.as_str(),
                matched.confidence,
                validation.evidence
            ),
            alternatives: Vec::new(),
        }
    }

    fn validate_data_type(
        &self,
        assumption: &Assumption,
        metadata: &[DataSourceMetadata],
        resolved: &HashMap<String, String>,
    ) -> GroundingResult {
        let Some(expected) = expected_type(assumption) else {
            return GroundingResult::failed(&assumption.id, "type_check", "no expected type given");
        };
        let located = match self.locate_required(assumption, metadata, resolved, "type_check") {
            Ok(located) => located,
            Err(result) => return result,
        };

        let analysis = self.sampler.analyze_field(located.source, &located.matched.field);
        if !analysis.has_samples() {
            return GroundingResult::skipped(&assumption.id, format!("no sample values for '{}'", located.matched.field));
        }
        let validation =
            self.sampler
                .validate_field_assumption(located.matched.confidence, &analysis, Some(expected));

        GroundingResult {
            assumption_id: assumption.id.clone(),
            validated: validation.type_compatible,
            skipped: false,
            confidence: validation.confidence,
            resolved_value: Some(analysis.inferred_type.as_str().to_string()),
            validation_method: "type_check".to_string(),
            evidence: validation.evidence,
            alternatives: Vec::new(),
        }
    }

    fn validate_value_format(
        &self,
        assumption: &Assumption,
        metadata: &[DataSourceMetadata],
        resolved: &HashMap<String, String>,
        errors: &mut Vec<GroundingError>,
    ) -> GroundingResult {
        let Some(raw) = assumption.validation_strategy.parameters.pattern.as_deref() else {
            return GroundingResult::failed(&assumption.id, "pattern_match", "no pattern given");
        };
        let pattern = match Regex::new(raw) {
            Ok(pattern) => pattern,
            Err(e) => {
                errors.push(GroundingError {
                    code: GroundingErrorCode::InvalidPattern,
                    assumption_id: Some(assumption.id.clone()),
                    message: format!("pattern '{raw}' does not compile: {e}"),
                    blocking: false,
                });
                return GroundingResult::failed(&assumption.id, "pattern_match", "invalid pattern");
            }
        };
        let located = match self.locate_required(assumption, metadata, resolved, "pattern_match") {
            Ok(located) => located,
            Err(result) => return result,
        };

        let outcome = self.sampler.validate_field_pattern(
            located.source,
            &located.matched.field,
            &pattern,
            assumption.validation_strategy.parameters.min_match_rate,
        );
        if outcome.total == 0 {
            return GroundingResult::skipped(&assumption.id, format!("no sample values for '{}'", located.matched.field));
        }

        GroundingResult {
            assumption_id: assumption.id.clone(),
            validated: outcome.passed,
            skipped: false,
            confidence: outcome.match_rate,
            resolved_value: Some(raw.to_string()),
            validation_method: "pattern_match".to_string(),
            evidence: format!(
                "{} of {} samples of '{}' match",
                outcome.matched, outcome.total, located.matched.field
            ),
            alternatives: Vec::new(),
        }
    }

    fn validate_structure(
        &self,
        assumption: &Assumption,
        metadata: &[DataSourceMetadata],
    ) -> GroundingResult {
        let params = &assumption.validation_strategy.parameters;
        let required = if params.required_headers.is_empty() {
            &params.candidates
        } else {
            &params.required_headers
        };
        if required.is_empty() {
            return GroundingResult::failed(&assumption.id, "header_check", "no required headers given");
        }
        let sources = self.sources_for(assumption, metadata);
        if sources.is_empty() {
            return GroundingResult::skipped(&assumption.id, "no header metadata available for this source");
        }

        // All headers must come from the same source.
        let mut best: Option<(f64, Vec<String>, Vec<String>)> = None;
        for source in sources {
            let fields = source.effective_fields();
            let mut found = Vec::new();
            let mut missing = Vec::new();
            let mut score = 0.0;
            for header in required {
                match self.matcher.match_field_with_descriptions(header, &fields).best {
                    Some(m) => {
                        score += m.confidence;
                        found.push(m.field);
                    }
                    None => missing.push(header.clone()),
                }
            }
            let score = score / required.len() as f64;
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, found, missing));
            }
        }

        let (confidence, found, missing) = best.unwrap_or_default();
        GroundingResult {
            assumption_id: assumption.id.clone(),
            validated: missing.is_empty(),
            skipped: false,
            confidence,
            resolved_value: Some(found.join(",")),
            validation_method: "header_check".to_string(),
            evidence: if missing.is_empty() {
                format!("all {} required headers present", required.len())
            } else {
                format!("missing headers: {}", missing.join(", "))
            },
            alternatives: missing,
        }
    }

    /// Sources that can answer for this assumption: restricted to its plugin
    /// when one is named, and only those that describe their fields.
    fn sources_for<'a>(
        &self,
        assumption: &Assumption,
        metadata: &'a [DataSourceMetadata],
    ) -> Vec<&'a DataSourceMetadata> {
        let plugin = assumption.validation_strategy.parameters.plugin_key.as_deref();
        metadata
            .iter()
            .filter(|m| plugin.map_or(true, |p| m.matches_plugin(p)))
            .filter(|m| m.has_field_info())
            .collect()
    }

    fn locate<'a>(
        &self,
        candidates: &[String],
        sources: &[&'a DataSourceMetadata],
    ) -> (Option<Located<'a>>, Vec<String>) {
        let mut best: Option<Located<'a>> = None;
        let mut alternatives = Vec::new();
        for &source in sources {
            let MatchOutcome {
                best: found,
                alternatives: alts,
            } = self
                .matcher
                .match_multiple_candidates(candidates, &source.effective_fields());
            match found {
                Some(matched) => {
                    let better = best.as_ref().map_or(true, |b| {
                        (matched.method, matched.confidence) > (b.matched.method, b.matched.confidence)
                    });
                    if better {
                        best = Some(Located { source, matched });
                    }
                }
                None => {
                    for alt in alts {
                        if !alternatives.contains(&alt) {
                            alternatives.push(alt);
                        }
                    }
                }
            }
        }
        alternatives.truncate(self.config.max_alternatives);
        (best, alternatives)
    }

    /// Finds the field a type or format assumption is about, or the result
    /// to report when that is impossible.
    fn locate_required<'a>(
        &self,
        assumption: &Assumption,
        metadata: &'a [DataSourceMetadata],
        resolved: &HashMap<String, String>,
        method: &str,
    ) -> Result<Located<'a>, GroundingResult> {
        let candidates = field_candidates(assumption, resolved);
        if candidates.is_empty() {
            return Err(GroundingResult::failed(&assumption.id, method, "no field given"));
        }
        let sources = self.sources_for(assumption, metadata);
        if sources.is_empty() {
            return Err(GroundingResult::skipped(
                &assumption.id,
                "no field metadata available for this source",
            ));
        }
        match self.locate(&candidates, &sources) {
            (Some(located), _) => Ok(located),
            (None, alternatives) => {
                let mut result = GroundingResult::failed(
                    &assumption.id,
                    method,
                    format!("field {:?} not found", candidates),
                );
                result.alternatives = alternatives;
                Err(result)
            }
        }
    }
}

/// `parameters.field` first (resolved through an earlier assumption when it
/// names one), then the listed candidates.
fn field_candidates(assumption: &Assumption, resolved: &HashMap<String, String>) -> Vec<String> {
    let params = &assumption.validation_strategy.parameters;
    let mut candidates = Vec::new();
    if let Some(field) = params.field.as_deref() {
        candidates.push(resolved.get(field).cloned().unwrap_or_else(|| field.to_string()));
    }
    for candidate in &params.candidates {
        if !candidates.contains(candidate) {
            candidates.push(candidate.clone());
        }
    }
    candidates
}

fn expected_type(assumption: &Assumption) -> Option<ValueType> {
    assumption
        .validation_strategy
        .parameters
        .expected_type
        .as_deref()
        .map(ValueType::parse)
}

/// Geometric mean over results that were actually checked. Zero when none
/// were, never the empty product.
pub fn aggregate_confidence(results: &[GroundingResult]) -> f64 {
    let checked: Vec<f64> = results
        .iter()
        .filter(|r| !r.skipped)
        .map(|r| r.confidence.clamp(0.0, 1.0))
        .collect();
    if checked.is_empty() || checked.iter().any(|c| *c == 0.0) {
        return 0.0;
    }
    let log_sum: f64 = checked.iter().map(|c| c.ln()).sum();
    (log_sum / checked.len() as f64).exp().clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldDescriptor, Impact, SampleRow, StrategyParameters, ValidationStrategy};
    use serde_json::json;

    fn assumption(id: &str, category: AssumptionCategory, parameters: StrategyParameters) -> Assumption {
        Assumption {
            id: id.into(),
            category,
            description: format!("assumption {id}"),
            validation_strategy: ValidationStrategy {
                method: String::new(),
                parameters,
            },
            impact_if_wrong: Impact::Moderate,
            fallback: None,
        }
    }

    fn candidates(list: &[&str]) -> StrategyParameters {
        StrategyParameters {
            candidates: list.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn plan(assumptions: Vec<Assumption>) -> SemanticPlan {
        SemanticPlan {
            goal: "test".into(),
            assumptions,
            ..Default::default()
        }
    }

    fn engine() -> GroundingEngine {
        GroundingEngine::new(GroundingConfig::default())
    }

    fn sheet() -> DataSourceMetadata {
        DataSourceMetadata {
            source_type: "sheet".into(),
            headers: vec!["customer_email".into(), "amount".into(), "due_date".into()],
            sample_rows: vec![
                SampleRow::Array(vec![json!("a@x.com"), json!(10), json!("2024-01-01")]),
                SampleRow::Array(vec![json!("b@x.com"), json!(25), json!("2024-02-01")]),
            ],
            plugin_key: Some("google-sheets".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_metadata_is_skipped_not_passed() {
        let plan = plan(vec![assumption("a1", AssumptionCategory::FieldName, candidates(&["email"]))]);
        let grounded = engine().ground(&plan, &[DataSourceMetadata::default()]);

        let result = &grounded.grounding_results[0];
        assert!(result.skipped);
        assert!(!result.validated);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(grounded.grounding_confidence, 0.0);
        assert!(grounded.all_assumptions_skipped);
    }

    #[test]
    fn majority_skipped_adds_blocking_error() {
        let gmail_only = StrategyParameters {
            plugin_key: Some("gmail".into()),
            ..candidates(&["subject"])
        };
        let plan = plan(vec![
            assumption("a1", AssumptionCategory::FieldName, candidates(&["Customer Email"])),
            assumption("a2", AssumptionCategory::FieldName, gmail_only.clone()),
            assumption("a3", AssumptionCategory::FieldName, gmail_only),
        ]);
        let grounded = engine().ground(&plan, &[sheet()]);

        assert_eq!(grounded.skipped_assumptions_count, 2);
        assert_eq!(grounded.validated_assumptions_count, 1);
        assert!(grounded
            .grounding_errors
            .iter()
            .any(|e| e.code == GroundingErrorCode::InsufficientValidation && e.blocking));
        // Only the checked assumption contributes.
        let only = grounded.grounding_results[0].confidence;
        assert!((grounded.grounding_confidence - only).abs() < 1e-9);
    }

    #[test]
    fn normalized_header_match_resolves_customer_email() {
        let metadata = DataSourceMetadata {
            headers: vec!["customer_email".into()],
            ..Default::default()
        };
        let plan = plan(vec![assumption("a1", AssumptionCategory::FieldName, candidates(&["Customer Email"]))]);
        let grounded = engine().ground(&plan, &[metadata]);
        let result = &grounded.grounding_results[0];
        assert!(result.validated);
        assert_eq!(result.resolved_value.as_deref(), Some("customer_email"));
        assert_eq!(result.validation_method, "normalized");
        assert!((result.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn description_match_picks_snippet() {
        let metadata = DataSourceMetadata {
            fields: vec![
                FieldDescriptor::described("snippet", "USE THIS for content matching"),
                FieldDescriptor::described("body", "usually empty"),
            ],
            ..Default::default()
        };
        let plan = plan(vec![assumption("a1", AssumptionCategory::FieldName, candidates(&["email content"]))]);
        let grounded = engine().ground(&plan, &[metadata]);
        let result = &grounded.grounding_results[0];
        assert_eq!(result.resolved_value.as_deref(), Some("snippet"));
        assert_eq!(result.validation_method, "description");
    }

    #[test]
    fn later_assumptions_use_earlier_resolutions() {
        let plan = plan(vec![
            assumption("email_field", AssumptionCategory::FieldName, candidates(&["Customer Email"])),
            assumption(
                "email_type",
                AssumptionCategory::DataType,
                StrategyParameters {
                    field: Some("email_field".into()),
                    expected_type: Some("email".into()),
                    ..Default::default()
                },
            ),
            assumption(
                "date_format",
                AssumptionCategory::ValueFormat,
                StrategyParameters {
                    field: Some("due date".into()),
                    pattern: Some(r"^\d{4}-\d{2}-\d{2}$".into()),
                    ..Default::default()
                },
            ),
        ]);
        let grounded = engine().ground(&plan, &[sheet()]);
        assert!(grounded.grounding_results.iter().all(|r| r.validated));
        assert_eq!(grounded.grounding_results[1].resolved_value.as_deref(), Some("email"));
        assert!(grounded.grounding_errors.is_empty());
        assert!(grounded.grounding_confidence > 0.9);
    }

    #[test]
    fn alternatives_from_several_sources_are_listed_once() {
        let first = DataSourceMetadata {
            headers: vec!["amount".into(), "region".into()],
            ..Default::default()
        };
        let second = DataSourceMetadata {
            headers: vec!["region".into(), "amount".into()],
            ..Default::default()
        };
        let plan = plan(vec![assumption("a1", AssumptionCategory::FieldName, candidates(&["zzzz"]))]);
        let grounded = engine().ground(&plan, &[first, second]);
        let result = &grounded.grounding_results[0];
        assert!(!result.validated);
        assert_eq!(result.alternatives, vec!["amount".to_string(), "region".to_string()]);
    }

    #[test]
    fn uncompilable_pattern_fails_without_blocking() {
        let plan = plan(vec![assumption(
            "a1",
            AssumptionCategory::ValueFormat,
            StrategyParameters {
                field: Some("due_date".into()),
                pattern: Some("([0-9".into()),
                ..Default::default()
            },
        )]);
        let grounded = engine().ground(&plan, &[sheet()]);
        let result = &grounded.grounding_results[0];
        assert!(!result.validated && !result.skipped);
        assert_eq!(result.confidence, 0.0);

        let error = grounded
            .grounding_errors
            .iter()
            .find(|e| e.code == GroundingErrorCode::InvalidPattern)
            .unwrap();
        assert_eq!(error.assumption_id.as_deref(), Some("a1"));
        assert!(!error.blocking);
        assert!(!grounded.has_blocking_errors());
    }

    #[test]
    fn unknown_category_fails_with_zero_confidence() {
        let plan = plan(vec![assumption("a1", AssumptionCategory::Unknown, candidates(&["x"]))]);
        let grounded = engine().ground(&plan, &[sheet()]);
        let result = &grounded.grounding_results[0];
        assert!(!result.validated && !result.skipped);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(grounded.grounding_confidence, 0.0);
    }

    #[test]
    fn behaviour_is_a_heuristic_pass() {
        let plan = plan(vec![assumption("a1", AssumptionCategory::Behavior, StrategyParameters::default())]);
        let grounded = engine().ground(&plan, &[]);
        let result = &grounded.grounding_results[0];
        assert!(result.validated);
        assert_eq!(result.validation_method, "heuristic");
        assert!((grounded.grounding_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn fail_fast_stops_on_critical_failure() {
        let mut critical = assumption("a1", AssumptionCategory::Structure, StrategyParameters {
            required_headers: vec!["invoice_number".into()],
            ..Default::default()
        });
        critical.impact_if_wrong = Impact::Critical;
        let plan = plan(vec![
            critical,
            assumption("a2", AssumptionCategory::FieldName, candidates(&["amount"])),
        ]);

        let config = GroundingConfig {
            fail_fast: true,
            ..Default::default()
        };
        let grounded = GroundingEngine::new(config).ground(&plan, &[sheet()]);
        assert_eq!(grounded.grounding_results.len(), 1);
        assert!(grounded.has_blocking_errors());

        let grounded = engine().ground(&plan, &[sheet()]);
        assert_eq!(grounded.grounding_results.len(), 2);
    }

    #[test]
    fn geometric_mean_ignores_skipped_results() {
        let mut a = GroundingResult::failed("a", "x", "");
        a.validated = true;
        a.confidence = 0.81;
        let mut b = a.clone();
        b.confidence = 1.0;
        let skipped = GroundingResult::skipped("c", "none");
        let confidence = aggregate_confidence(&[a, b, skipped]);
        assert!((confidence - 0.9).abs() < 1e-9);
        assert_eq!(aggregate_confidence(&[GroundingResult::skipped("d", "")]), 0.0);
        assert_eq!(aggregate_confidence(&[]), 0.0);
    }
}
