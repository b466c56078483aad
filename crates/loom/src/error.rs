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

use llm_contracts::LLMError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Understanding,
    Grounding,
    Formalization,
    Compilation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Understanding => "understanding",
            Phase::Grounding => "grounding",
            Phase::Formalization => "formalization",
            Phase::Compilation => "compilation",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every error that leaves the pipeline names the phase that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[{phase}] invalid input: {message}")]
    InvalidInput { phase: Phase, message: String },

    #[error("[{phase}] provider failure after {attempts} attempt(s): {source}")]
    Provider {
        phase: Phase,
        attempts: u32,
        #[source]
        source: LLMError,
    },

    #[error("[{phase}] malformed model output after {attempts} attempt(s): {message}")]
    MalformedOutput {
        phase: Phase,
        attempts: u32,
        message: String,
    },

    #[error("[{phase}] schema violation: {}", issues.join("; "))]
    SchemaViolation { phase: Phase, issues: Vec<String> },

    #[error("[{phase}] {message}")]
    Blocked { phase: Phase, message: String },

    #[error("[{phase}] compilation failed: {message}")]
    Compilation { phase: Phase, message: String },
}

impl PipelineError {
    pub fn phase(&self) -> Phase {
        match self {
            PipelineError::InvalidInput { phase, .. }
            | PipelineError::Provider { phase, .. }
            | PipelineError::MalformedOutput { phase, .. }
            | PipelineError::SchemaViolation { phase, .. }
            | PipelineError::Blocked { phase, .. }
            | PipelineError::Compilation { phase, .. } => *phase,
        }
    }

    pub fn invalid_input(phase: Phase, message: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            phase,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput { .. } => "invalid_input",
            PipelineError::Provider { .. } => "provider_failure",
            PipelineError::MalformedOutput { .. } => "provider_failure",
            PipelineError::SchemaViolation { .. } => "schema_violation",
            PipelineError::Blocked { .. } => "grounding_degradation",
            PipelineError::Compilation { .. } => "compilation_failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata source unavailable: {0}")]
    Unavailable(String),

    #[error("metadata fetch for {plugin_key} timed out after {seconds}s")]
    Timeout { plugin_key: String, seconds: u64 },

    #[error("metadata for {plugin_key} is malformed: {message}")]
    Malformed { plugin_key: String, message: String },
}

/// Why the rule-based compiler could not map an IR node.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("node {node}: {message}")]
    Unsupported { node: String, message: String },

    #[error("node {node} refers to unknown node {reference}")]
    InvalidReference { node: String, reference: String },

    #[error("node {node} has no action")]
    MissingAction { node: String },
}

impl CompileError {
    pub fn unsupported(node: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            node: node.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_their_phase() {
        let err = PipelineError::SchemaViolation {
            phase: Phase::Formalization,
            issues: vec!["missing goal".into(), "duplicate id".into()],
        };
        assert_eq!(err.phase(), Phase::Formalization);
        assert_eq!(
            err.to_string(),
            "[formalization] schema violation: missing goal; duplicate id"
        );

        let err = PipelineError::Provider {
            phase: Phase::Understanding,
            attempts: 1,
            source: LLMError::RateLimit("quota".into()),
        };
        assert_eq!(err.kind(), "provider_failure");
        assert!(err.to_string().starts_with("[understanding]"));
    }
}
