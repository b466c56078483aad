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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Custom(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Custom(name) => name.as_str(),
        }
    }

    pub fn api_key_env(&self) -> String {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY".to_string(),
            Provider::OpenAI => "OPENAI_API_KEY".to_string(),
            Provider::Custom(name) => format!("{}_API_KEY", name.to_uppercase()),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Provider::Anthropic,
            "openai" | "gpt" => Provider::OpenAI,
            _ => Provider::Custom(s),
        }
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> Self {
        provider.as_str().to_string()
    }
}

impl From<&str> for Provider {
    fn from(s: &str) -> Self {
        Provider::from(s.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout error: no response within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    /// Whether another attempt (possibly with a corrected prompt) can succeed.
    /// Credential, quota and configuration failures cannot.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LLMError::Authentication(_) | LLMError::RateLimit(_) | LLMError::Configuration(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LLMError::Configuration(_) => "configuration",
            LLMError::Provider(_) => "provider",
            LLMError::Authentication(_) => "authentication",
            LLMError::RateLimit(_) => "rate_limit",
            LLMError::Network(_) => "network",
            LLMError::Serialisation(_) => "serialisation",
            LLMError::Validation(_) => "validation",
            LLMError::Timeout { .. } => "timeout",
            LLMError::Internal(_) => "internal",
        }
    }
}

pub type LLMResult<T> = Result<T, LLMError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_rate_limit_are_not_retryable() {
        assert!(!LLMError::Authentication("bad key".into()).is_retryable());
        assert!(!LLMError::RateLimit("slow down".into()).is_retryable());
        assert!(!LLMError::Configuration("missing".into()).is_retryable());
        assert!(LLMError::Timeout { seconds: 5 }.is_retryable());
        assert!(LLMError::Serialisation("eof".into()).is_retryable());
    }

    #[test]
    fn provider_parses_aliases() {
        assert_eq!(Provider::from("Claude"), Provider::Anthropic);
        assert_eq!(Provider::from("openai"), Provider::OpenAI);
        assert_eq!(
            Provider::from("mistral"),
            Provider::Custom("mistral".to_string())
        );
        assert_eq!(Provider::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
    }
}
