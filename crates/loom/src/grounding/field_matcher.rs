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

//! Resolves the field name a plan talks about ("Customer Email") to a field
//! that actually exists in a data source (`customer_email`).
//!
//! Resolution walks a ladder and stops at the first tier that matches:
//! exact, case-insensitive, separator-normalised, description, fuzzy. A
//! higher tier always wins over a lower one whatever the lower tier's score.

use crate::models::FieldDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-]+").unwrap());
static USAGE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\buse (this|for)\b").unwrap());

const DESCRIPTION_KEYWORD_SCORE: f64 = 0.3;
const DESCRIPTION_DIRECTIVE_SCORE: f64 = 0.2;
const DESCRIPTION_FULL_NAME_SCORE: f64 = 0.5;
const DESCRIPTION_ACCEPT_SCORE: f64 = 0.5;
const DESCRIPTION_MAX_CONFIDENCE: f64 = 0.89;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Fuzzy,
    Description,
    Normalized,
    CaseInsensitive,
    Exact,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::CaseInsensitive => "case_insensitive",
            MatchMethod::Normalized => "normalized",
            MatchMethod::Description => "description",
            MatchMethod::Fuzzy => "fuzzy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: String,
    pub confidence: f64,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub best: Option<FieldMatch>,
    /// Closest names by edit distance, offered for review when nothing matched.
    pub alternatives: Vec<String>,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.best.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FieldMatcher {
    min_similarity: f64,
    max_alternatives: usize,
}

impl Default for FieldMatcher {
    fn default() -> Self {
        Self::new(0.7, 3)
    }
}

impl FieldMatcher {
    pub fn new(min_similarity: f64, max_alternatives: usize) -> Self {
        Self {
            min_similarity: min_similarity.clamp(0.0, 1.0),
            max_alternatives,
        }
    }

    /// Matches against bare names, as found in legacy header lists.
    pub fn match_field(&self, semantic_name: &str, names: &[String]) -> MatchOutcome {
        let fields: Vec<FieldDescriptor> = names.iter().map(FieldDescriptor::named).collect();
        self.match_field_with_descriptions(semantic_name, &fields)
    }

    pub fn match_field_with_descriptions(
        &self,
        semantic_name: &str,
        fields: &[FieldDescriptor],
    ) -> MatchOutcome {
        if fields.is_empty() || semantic_name.trim().is_empty() {
            return MatchOutcome::default();
        }

        if let Some(field) = fields.iter().find(|f| f.name == semantic_name) {
            return found(&field.name, 1.0, MatchMethod::Exact);
        }

        let lowered = semantic_name.to_lowercase();
        if let Some(field) = fields.iter().find(|f| f.name.to_lowercase() == lowered) {
            return found(&field.name, 0.95, MatchMethod::CaseInsensitive);
        }

        let normalized = normalize_name(semantic_name);
        if let Some(field) = fields.iter().find(|f| normalize_name(&f.name) == normalized) {
            return found(&field.name, 0.9, MatchMethod::Normalized);
        }

        if let Some((field, score)) = best_description_match(semantic_name, fields) {
            return found(
                &field.name,
                score.min(DESCRIPTION_MAX_CONFIDENCE),
                MatchMethod::Description,
            );
        }

        let mut ranked: Vec<(&FieldDescriptor, f64)> = fields
            .iter()
            .map(|f| (f, similarity(&normalized, &normalize_name(&f.name))))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        match ranked.first() {
            Some((field, score)) if *score >= self.min_similarity => {
                found(&field.name, *score, MatchMethod::Fuzzy)
            }
            _ => MatchOutcome {
                best: None,
                alternatives: ranked
                    .into_iter()
                    .take(self.max_alternatives)
                    .map(|(f, _)| f.name.clone())
                    .collect(),
            },
        }
    }

    /// Runs the ladder for each synonym and keeps the best tier, then the
    /// best confidence within it. Earlier candidates win ties.
    pub fn match_multiple_candidates(
        &self,
        candidates: &[String],
        fields: &[FieldDescriptor],
    ) -> MatchOutcome {
        let mut best: Option<FieldMatch> = None;
        let mut alternatives: Vec<String> = Vec::new();

        for candidate in candidates {
            let outcome = self.match_field_with_descriptions(candidate, fields);
            match outcome.best {
                Some(found) => {
                    let better = best.as_ref().map_or(true, |current| {
                        (found.method, found.confidence) > (current.method, current.confidence)
                    });
                    if better {
                        best = Some(found);
                    }
                }
                None => {
                    for alt in outcome.alternatives {
                        if !alternatives.contains(&alt) {
                            alternatives.push(alt);
                        }
                    }
                }
            }
        }

        if best.is_some() {
            alternatives.clear();
        }
        alternatives.truncate(self.max_alternatives);
        MatchOutcome { best, alternatives }
    }
}

fn found(field: &str, confidence: f64, method: MatchMethod) -> MatchOutcome {
    MatchOutcome {
        best: Some(FieldMatch {
            field: field.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }),
        alternatives: Vec::new(),
    }
}

/// Case-folds and collapses runs of spaces, underscores and hyphens to `_`.
pub fn normalize_name(name: &str) -> String {
    SEPARATORS
        .replace_all(name.trim().to_lowercase().as_str(), "_")
        .trim_matches('_')
        .to_string()
}

fn keywords(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn best_description_match<'a>(
    semantic_name: &str,
    fields: &'a [FieldDescriptor],
) -> Option<(&'a FieldDescriptor, f64)> {
    let words = keywords(semantic_name);
    let spaced = normalize_name(semantic_name).replace('_', " ");
    let mut best: Option<(&FieldDescriptor, f64)> = None;

    for field in fields {
        let Some(description) = field.description.as_deref() else {
            continue;
        };
        let description = description.to_lowercase();
        let mut score = words
            .iter()
            .filter(|w| description.contains(w.as_str()))
            .count() as f64
            * DESCRIPTION_KEYWORD_SCORE;
        if USAGE_DIRECTIVE.is_match(&description) {
            score += DESCRIPTION_DIRECTIVE_SCORE;
        }
        if !spaced.is_empty()
            && (description.contains(&spaced) || description.contains(&normalize_name(semantic_name)))
        {
            score += DESCRIPTION_FULL_NAME_SCORE;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((field, score));
        }
    }

    // Float sums such as 0.3 + 0.2 can land a hair under the threshold.
    best.filter(|(_, score)| *score + 1e-9 >= DESCRIPTION_ACCEPT_SCORE)
}

/// `1 - distance / max(len_a, len_b)`, over characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ladder_tiers_report_their_confidence() {
        let matcher = FieldMatcher::default();
        let headers = names(&["Email", "customer_email", "created"]);

        let exact = matcher.match_field("Email", &headers).best.unwrap();
        assert_eq!((exact.method, exact.confidence), (MatchMethod::Exact, 1.0));

        let ci = matcher.match_field("email", &headers).best.unwrap();
        assert_eq!((ci.method, ci.confidence), (MatchMethod::CaseInsensitive, 0.95));

        let normalized = matcher.match_field("Customer Email", &headers).best.unwrap();
        assert_eq!(normalized.field, "customer_email");
        assert_eq!((normalized.method, normalized.confidence), (MatchMethod::Normalized, 0.9));
    }

    #[test]
    fn description_directive_resolves_content_field() {
        let fields = vec![
            FieldDescriptor::described("snippet", "USE THIS for content matching"),
            FieldDescriptor::described("body", "usually empty"),
        ];
        let outcome = FieldMatcher::default()
            .match_multiple_candidates(&names(&["email content"]), &fields);
        let best = outcome.best.unwrap();
        assert_eq!(best.field, "snippet");
        assert_eq!(best.method, MatchMethod::Description);
        assert!(best.confidence <= 1.0);
    }

    #[test]
    fn description_confidence_stays_below_normalized() {
        let fields = vec![FieldDescriptor::described(
            "contact",
            "Use this for the customer email address",
        )];
        let best = FieldMatcher::default()
            .match_field_with_descriptions("Customer Email", &fields)
            .best
            .unwrap();
        assert_eq!(best.method, MatchMethod::Description);
        assert_eq!(best.confidence, 0.89);
    }

    #[test]
    fn exact_match_beats_description_and_fuzzy() {
        let fields = vec![
            FieldDescriptor::described("notes", "use this for the subject line subject"),
            FieldDescriptor::named("subjekt"),
            FieldDescriptor::named("subject"),
        ];
        let outcome = FieldMatcher::default()
            .match_multiple_candidates(&names(&["subjects", "subject"]), &fields);
        let best = outcome.best.unwrap();
        assert_eq!(best.field, "subject");
        assert_eq!(best.method, MatchMethod::Exact);
    }

    #[test]
    fn fuzzy_matches_respect_the_threshold() {
        let matcher = FieldMatcher::default();
        let outcome = matcher.match_field("recipient", &names(&["recipent", "amount"]));
        let best = outcome.best.unwrap();
        assert_eq!(best.method, MatchMethod::Fuzzy);
        assert!(best.confidence >= 0.7 && best.confidence < 0.9);

        let strict = FieldMatcher::new(0.95, 2);
        let outcome = strict.match_field("recipient", &names(&["recipent", "amount", "date"]));
        assert!(!outcome.is_match());
        assert_eq!(outcome.alternatives, names(&["recipent", "amount"]));
    }

    #[test]
    fn nothing_to_match_against_is_no_match() {
        let outcome = FieldMatcher::default().match_field("email", &[]);
        assert!(outcome.best.is_none());
        assert!(outcome.alternatives.is_empty());
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("naïve", "naive"), 1);
        assert_eq!(similarity("same", "same"), 1.0);
        assert_eq!(normalize_name("  Due--Date  "), "due_date");
    }
}
