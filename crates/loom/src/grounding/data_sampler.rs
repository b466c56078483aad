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

use crate::models::DataSourceMetadata;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+\-]\d{2}:?\d{2})?)?$")
        .unwrap()
});
static OTHER_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{1,2} (jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]* \d{4}|(mon|tue|wed|thu|fri|sat|sun)[a-z]*, \d{1,2} [a-z]{3} \d{4}.*)$",
    )
    .unwrap()
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
];
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%y",
    "%d/%m/%y",
    "%d %b %Y",
    "%d %B %Y",
];

/// Shape check first, then a calendar check: `2024-02-30` looks like a
/// date but is not one.
fn is_calendar_date(s: &str) -> bool {
    if !ISO_DATE.is_match(s) && !OTHER_DATE.is_match(s) {
        return false;
    }
    if DateTime::parse_from_rfc3339(s).is_ok() || DateTime::parse_from_rfc2822(s).is_ok() {
        return true;
    }
    if DATETIME_FORMATS
        .iter()
        .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || OFFSET_DATETIME_FORMATS
            .iter()
            .any(|f| DateTime::parse_from_str(s, f).is_ok())
        || DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(s, f).is_ok())
    {
        return true;
    }
    // "Mon, 1 Jan 2024" followed by a time in some non-RFC layout.
    let prefix: Vec<&str> = s.split_whitespace().take(4).collect();
    prefix.len() == 4 && NaiveDate::parse_from_str(&prefix.join(" "), "%a, %d %b %Y").is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Email,
    Date,
    Boolean,
    Number,
    String,
    Mixed,
    Unknown,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Email => "email",
            ValueType::Date => "date",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Mixed => "mixed",
            ValueType::Unknown => "unknown",
        }
    }

    /// Accepts the loose type names models tend to produce.
    pub fn parse(name: &str) -> ValueType {
        match name.trim().to_lowercase().as_str() {
            "email" | "email_address" => ValueType::Email,
            "date" | "datetime" | "timestamp" | "time" => ValueType::Date,
            "boolean" | "bool" => ValueType::Boolean,
            "number" | "numeric" | "integer" | "int" | "float" | "decimal" | "currency" => {
                ValueType::Number
            }
            "string" | "text" | "str" => ValueType::String,
            "mixed" => ValueType::Mixed,
            _ => ValueType::Unknown,
        }
    }

    /// Permissive: emails, dates and numbers are also acceptable strings.
    pub fn is_compatible_with(self, other: ValueType) -> bool {
        use ValueType::*;
        if self == other || self == Unknown || other == Unknown {
            return true;
        }
        matches!(
            (self, other),
            (Email, String)
                | (String, Email)
                | (Date, String)
                | (String, Date)
                | (Number, String)
                | (String, Number)
                | (Mixed, String)
                | (String, Mixed)
        )
    }
}

pub fn classify_value(value: &Value) -> Option<ValueType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ValueType::Boolean),
        Value::Number(_) => Some(ValueType::Number),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if EMAIL.is_match(s) {
                Some(ValueType::Email)
            } else if is_calendar_date(s) {
                Some(ValueType::Date)
            } else if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                Some(ValueType::Boolean)
            } else if s.replace(',', "").parse::<f64>().is_ok() {
                Some(ValueType::Number)
            } else {
                Some(ValueType::String)
            }
        }
        Value::Array(_) | Value::Object(_) => Some(ValueType::String),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub field: String,
    pub inferred_type: ValueType,
    pub mixed: bool,
    pub sample_count: usize,
    pub null_count: usize,
    pub unique_count: usize,
    pub patterns: Vec<String>,
    /// Share of non-null samples that agree with `inferred_type`.
    pub confidence: f64,
}

impl FieldAnalysis {
    pub fn has_samples(&self) -> bool {
        self.sample_count > self.null_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub confidence: f64,
    pub type_compatible: bool,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternValidation {
    pub matched: usize,
    pub total: usize,
    pub match_rate: f64,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct DataSampler {
    sample_size: usize,
    min_pattern_match_rate: f64,
}

impl Default for DataSampler {
    fn default() -> Self {
        Self::new(10, 0.8)
    }
}

impl DataSampler {
    pub fn new(sample_size: usize, min_pattern_match_rate: f64) -> Self {
        Self {
            sample_size: sample_size.max(1),
            min_pattern_match_rate,
        }
    }

    pub fn analyze_field(&self, metadata: &DataSourceMetadata, field: &str) -> FieldAnalysis {
        let values = metadata.sample_values(field, self.sample_size);
        analyze_values(field, &values)
    }

    /// Averages match confidence with sample confidence. An incompatible
    /// expected type halves the result. Without samples only the match counts.
    pub fn validate_field_assumption(
        &self,
        match_confidence: f64,
        analysis: &FieldAnalysis,
        expected: Option<ValueType>,
    ) -> FieldValidation {
        let (mut confidence, mut evidence) = if analysis.has_samples() {
            (
                (match_confidence + analysis.confidence) / 2.0,
                format!(
                    "{} of {} samples non-null, inferred {}",
                    analysis.sample_count - analysis.null_count,
                    analysis.sample_count,
                    analysis.inferred_type.as_str()
                ),
            )
        } else {
            (match_confidence, "no sample values available".to_string())
        };

        let type_compatible = match expected {
            Some(expected) if analysis.has_samples() => {
                analysis.inferred_type.is_compatible_with(expected)
            }
            _ => true,
        };
        if !type_compatible {
            confidence /= 2.0;
            if let Some(expected) = expected {
                evidence.push_str(&format!("; expected {}", expected.as_str()));
            }
        }

        FieldValidation {
            confidence: confidence.clamp(0.0, 1.0),
            type_compatible,
            evidence,
        }
    }

    pub fn validate_field_pattern(
        &self,
        metadata: &DataSourceMetadata,
        field: &str,
        pattern: &Regex,
        min_match_rate: Option<f64>,
    ) -> PatternValidation {
        let values: Vec<String> = metadata
            .sample_values(field, self.sample_size)
            .into_iter()
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect();
        let threshold = min_match_rate.unwrap_or(self.min_pattern_match_rate);
        pattern_rate(&values, pattern, threshold)
    }
}

pub fn analyze_values(field: &str, values: &[Value]) -> FieldAnalysis {
    let null_count = values.iter().filter(|v| classify_value(v).is_none()).count();
    let classified: Vec<(ValueType, &Value)> = values
        .iter()
        .filter_map(|v| classify_value(v).map(|t| (t, v)))
        .collect();

    let unique_count = classified
        .iter()
        .map(|(_, v)| v.to_string())
        .collect::<HashSet<_>>()
        .len();

    let types: Vec<ValueType> = classified.iter().map(|(t, _)| *t).collect();
    let (inferred_type, mixed) = infer_type(&types);
    let agreeing = types.iter().filter(|t| **t == inferred_type).count();
    let confidence = if types.is_empty() {
        0.0
    } else if mixed {
        agreeing as f64 / types.len() as f64
    } else {
        1.0
    };

    FieldAnalysis {
        field: field.to_string(),
        inferred_type,
        mixed,
        sample_count: values.len(),
        null_count,
        unique_count,
        patterns: detect_patterns(&classified),
        confidence,
    }
}

fn infer_type(types: &[ValueType]) -> (ValueType, bool) {
    let Some(first) = types.first() else {
        return (ValueType::Unknown, false);
    };
    if types.iter().all(|t| t == first) {
        return (*first, false);
    }
    if types.contains(&ValueType::Email) {
        (ValueType::Email, true)
    } else if types.contains(&ValueType::Date) {
        (ValueType::Date, true)
    } else {
        (ValueType::Mixed, true)
    }
}

fn detect_patterns(classified: &[(ValueType, &Value)]) -> Vec<String> {
    if classified.is_empty() {
        return Vec::new();
    }
    let all = |wanted: ValueType| classified.iter().all(|(t, _)| *t == wanted);
    let mut patterns = Vec::new();
    if all(ValueType::Email) {
        patterns.push("all_emails".to_string());
    }
    if all(ValueType::Date) {
        patterns.push("all_dates".to_string());
        if classified
            .iter()
            .all(|(_, v)| v.as_str().is_some_and(|s| ISO_DATE.is_match(s.trim())))
        {
            patterns.push("iso_date_format".to_string());
        }
    }
    if all(ValueType::Number) {
        patterns.push("all_numeric".to_string());
    }
    patterns
}

fn pattern_rate(values: &[String], pattern: &Regex, threshold: f64) -> PatternValidation {
    let total = values.len();
    let matched = values.iter().filter(|v| pattern.is_match(v)).count();
    let match_rate = if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    };
    PatternValidation {
        matched,
        total,
        match_rate,
        passed: total > 0 && match_rate >= threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleRow;
    use serde_json::json;

    fn metadata_with(field: &str, values: Vec<Value>) -> DataSourceMetadata {
        DataSourceMetadata {
            headers: vec![field.to_string()],
            sample_rows: values.into_iter().map(|v| SampleRow::Array(vec![v])).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_common_shapes() {
        assert_eq!(classify_value(&json!("a@b.io")), Some(ValueType::Email));
        assert_eq!(classify_value(&json!("2024-03-01")), Some(ValueType::Date));
        assert_eq!(classify_value(&json!("03/01/2024")), Some(ValueType::Date));
        assert_eq!(classify_value(&json!("TRUE")), Some(ValueType::Boolean));
        assert_eq!(classify_value(&json!("1,200.50")), Some(ValueType::Number));
        assert_eq!(classify_value(&json!(12)), Some(ValueType::Number));
        assert_eq!(classify_value(&json!("hello")), Some(ValueType::String));
        assert_eq!(classify_value(&json!("")), None);
        assert_eq!(classify_value(&Value::Null), None);
    }

    #[test]
    fn impossible_dates_are_not_dates() {
        for raw in ["2024-13-45", "2024-02-30", "99/99/2024", "2024-00-00"] {
            assert_eq!(classify_value(&json!(raw)), Some(ValueType::String), "{raw}");
        }
        assert_eq!(classify_value(&json!("2024-02-29")), Some(ValueType::Date));
        assert_eq!(classify_value(&json!("2024-03-01T09:30:00Z")), Some(ValueType::Date));
        assert_eq!(classify_value(&json!("2024-03-01 09:30")), Some(ValueType::Date));
        assert_eq!(classify_value(&json!("1 March 2024")), Some(ValueType::Date));
        assert_eq!(
            classify_value(&json!("Fri, 1 Mar 2024 09:30:00 +0000")),
            Some(ValueType::Date)
        );

        let analysis = analyze_values("due", &[json!("2024-13-45"), json!("2024-99-99")]);
        assert_eq!(analysis.inferred_type, ValueType::String);
        assert!(analysis.patterns.is_empty());
    }

    #[test]
    fn unanimous_column_gets_patterns_and_full_confidence() {
        let analysis = analyze_values(
            "due",
            &[json!("2024-01-01"), json!("2024-02-01"), Value::Null, json!("2024-02-01")],
        );
        assert_eq!(analysis.inferred_type, ValueType::Date);
        assert!(!analysis.mixed);
        assert_eq!(analysis.null_count, 1);
        assert_eq!(analysis.unique_count, 2);
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.patterns, vec!["all_dates", "iso_date_format"]);
    }

    #[test]
    fn mixed_column_prefers_email_then_date() {
        let analysis = analyze_values("c", &[json!("x@y.com"), json!("2024-01-01"), json!("n/a")]);
        assert_eq!(analysis.inferred_type, ValueType::Email);
        assert!(analysis.mixed);
        assert!((analysis.confidence - 1.0 / 3.0).abs() < 1e-9);

        let analysis = analyze_values("c", &[json!("2024-01-01"), json!(3)]);
        assert_eq!(analysis.inferred_type, ValueType::Date);

        let analysis = analyze_values("c", &[json!(true), json!(3)]);
        assert_eq!(analysis.inferred_type, ValueType::Mixed);
    }

    #[test]
    fn compatible_types_average_and_mismatches_halve() {
        let sampler = DataSampler::default();
        let analysis = analyze_values("e", &[json!("a@b.com"), json!("c@d.com")]);

        let ok = sampler.validate_field_assumption(0.9, &analysis, Some(ValueType::String));
        assert!(ok.type_compatible);
        assert!((ok.confidence - 0.95).abs() < 1e-9);

        let bad = sampler.validate_field_assumption(0.9, &analysis, Some(ValueType::Number));
        assert!(!bad.type_compatible);
        assert!((bad.confidence - 0.475).abs() < 1e-9);
    }

    #[test]
    fn pattern_rate_uses_threshold() {
        let sampler = DataSampler::default();
        let metadata = metadata_with(
            "invoice",
            vec![json!("INV-001"), json!("INV-002"), json!("INV-003"), json!("INV-004"), json!("misc")],
        );
        let pattern = Regex::new(r"^INV-\d{3}$").unwrap();

        let result = sampler.validate_field_pattern(&metadata, "invoice", &pattern, None);
        assert_eq!((result.matched, result.total), (4, 5));
        assert!(result.passed);

        let strict = sampler.validate_field_pattern(&metadata, "invoice", &pattern, Some(0.9));
        assert!(!strict.passed);

        let empty = sampler.validate_field_pattern(&metadata, "missing", &pattern, None);
        assert!(!empty.passed);
    }
}
