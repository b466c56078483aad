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
use llm_contracts::{Provider, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default = "default_understanding")]
    pub understanding: GenerationSettings,
    #[serde(default = "default_formalization")]
    pub formalization: GenerationSettings,
    #[serde(default)]
    pub compilation: CompilationSettings,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub ambiguity: AmbiguityConfig,
    #[serde(default)]
    pub metadata: MetadataSettings,
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            understanding: default_understanding(),
            formalization: default_formalization(),
            compilation: CompilationSettings::default(),
            grounding: GroundingConfig::default(),
            ambiguity: AmbiguityConfig::default(),
            metadata: MetadataSettings::default(),
            catalog_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub primary: ProviderSettings,
    #[serde(default)]
    pub fallback: Option<ProviderSettings>,
    /// Attempts per phase, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            primary: ProviderSettings::default(),
            fallback: None,
            max_attempts: default_max_attempts(),
            call_timeout_seconds: default_call_timeout_seconds(),
        }
    }
}

impl LlmSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilationSettings {
    #[serde(default = "default_compilation_temperature")]
    pub temperature: f32,
    #[serde(default = "default_compilation_max_tokens")]
    pub max_tokens: u32,
    /// OR-chains with more `includes` clauses than this are collapsed.
    #[serde(default = "default_filter_collapse_threshold")]
    pub filter_collapse_threshold: usize,
}

impl Default for CompilationSettings {
    fn default() -> Self {
        Self {
            temperature: default_compilation_temperature(),
            max_tokens: default_compilation_max_tokens(),
            filter_collapse_threshold: default_filter_collapse_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundingConfig {
    #[serde(default = "default_min_fuzzy_similarity")]
    pub min_fuzzy_similarity: f64,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
    #[serde(default)]
    pub fail_fast: bool,
    /// Skip ratio above which grounding is reported as untrustworthy.
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: f64,
    #[serde(default = "default_behavior_confidence")]
    pub behavior_confidence: f64,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_min_pattern_match_rate")]
    pub min_pattern_match_rate: f64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            min_fuzzy_similarity: default_min_fuzzy_similarity(),
            max_alternatives: default_max_alternatives(),
            fail_fast: false,
            skip_threshold: default_skip_threshold(),
            behavior_confidence: default_behavior_confidence(),
            sample_size: default_sample_size(),
            min_pattern_match_rate: default_min_pattern_match_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmbiguityConfig {
    #[serde(default = "default_looks_good_threshold")]
    pub looks_good_threshold: f64,
    /// Multiplier applied to overall confidence per must-confirm item.
    #[serde(default = "default_must_confirm_penalty")]
    pub must_confirm_penalty: f64,
}

impl Default for AmbiguityConfig {
    fn default() -> Self {
        Self {
            looks_good_threshold: default_looks_good_threshold(),
            must_confirm_penalty: default_must_confirm_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataSettings {
    #[serde(default = "default_metadata_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_metadata_timeout_seconds(),
        }
    }
}

impl MetadataSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl LoomConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        info!("Loading configuration from: {}", shown);
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let config: LoomConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: shown,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `LOOM_LLM_PROVIDER`, `LOOM_LLM_MODEL` and `LOOM_LLM_TIMEOUT_SECONDS`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("LOOM_LLM_PROVIDER") {
            let provider = Provider::from(provider);
            if provider != self.llm.primary.provider && lookup("LOOM_LLM_MODEL").is_none() {
                self.llm.primary.model = ProviderSettings::default_model_for(&provider);
            }
            self.llm.primary.provider = provider;
        }
        if let Some(model) = lookup("LOOM_LLM_MODEL") {
            self.llm.primary.model = model;
        }
        if let Some(raw) = lookup("LOOM_LLM_TIMEOUT_SECONDS") {
            match raw.parse::<u64>() {
                Ok(seconds) => self.llm.call_timeout_seconds = seconds,
                Err(_) => warn!("Ignoring non-numeric LOOM_LLM_TIMEOUT_SECONDS: {}", raw),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.llm.call_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "llm.call_timeout_seconds must be positive".to_string(),
            ));
        }
        let unit_ranges = [
            ("grounding.min_fuzzy_similarity", self.grounding.min_fuzzy_similarity),
            ("grounding.skip_threshold", self.grounding.skip_threshold),
            ("grounding.behavior_confidence", self.grounding.behavior_confidence),
            ("grounding.min_pattern_match_rate", self.grounding.min_pattern_match_rate),
            ("ambiguity.looks_good_threshold", self.ambiguity.looks_good_threshold),
            ("ambiguity.must_confirm_penalty", self.ambiguity.must_confirm_penalty),
        ];
        for (name, value) in unit_ranges {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn default_understanding() -> GenerationSettings {
    GenerationSettings {
        temperature: 0.3,
        max_tokens: 6000,
    }
}
fn default_formalization() -> GenerationSettings {
    GenerationSettings {
        temperature: 0.1,
        max_tokens: 6000,
    }
}
fn default_max_attempts() -> u32 {
    2
}
fn default_call_timeout_seconds() -> u64 {
    90
}
fn default_compilation_temperature() -> f32 {
    0.2
}
fn default_compilation_max_tokens() -> u32 {
    8000
}
fn default_filter_collapse_threshold() -> usize {
    10
}
fn default_min_fuzzy_similarity() -> f64 {
    0.7
}
fn default_max_alternatives() -> usize {
    3
}
fn default_skip_threshold() -> f64 {
    0.5
}
fn default_behavior_confidence() -> f64 {
    0.8
}
fn default_sample_size() -> usize {
    10
}
fn default_min_pattern_match_rate() -> f64 {
    0.8
}
fn default_looks_good_threshold() -> f64 {
    0.8
}
fn default_must_confirm_penalty() -> f64 {
    0.9
}
fn default_metadata_timeout_seconds() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "llm:\n  primary:\n    provider: openai\n    model: gpt-4o\ngrounding:\n  fail_fast: true\n"
        )
        .unwrap();

        let config = LoomConfig::from_path(file.path()).unwrap();
        assert_eq!(config.llm.primary.provider, Provider::OpenAI);
        assert_eq!(config.llm.max_attempts, 2);
        assert!(config.grounding.fail_fast);
        assert_eq!(config.grounding.min_fuzzy_similarity, 0.7);
        assert_eq!(config.formalization.temperature, 0.1);
        assert_eq!(config.compilation.filter_collapse_threshold, 10);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grounding:\n  skip_threshold: 1.5\n").unwrap();
        assert!(matches!(
            LoomConfig::from_path(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            LoomConfig::from_path("/definitely/not/here/loom.yml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn env_overrides_switch_provider_and_model() {
        let vars: HashMap<&str, &str> = [
            ("LOOM_LLM_PROVIDER", "openai"),
            ("LOOM_LLM_TIMEOUT_SECONDS", "30"),
        ]
        .into_iter()
        .collect();
        let mut config = LoomConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.llm.primary.provider, Provider::OpenAI);
        assert_eq!(config.llm.primary.model, "gpt-4o");
        assert_eq!(config.llm.call_timeout_seconds, 30);
    }
}
