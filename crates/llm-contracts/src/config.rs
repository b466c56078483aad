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

use crate::types::Provider;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Overrides the provider's conventional `<PROVIDER>_API_KEY` variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Client-level retries for transport failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key_env: None,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderSettings {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn api_key_variable(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider.api_key_env())
    }

    pub fn default_model_for(provider: &Provider) -> String {
        match provider {
            Provider::Anthropic => default_model(),
            Provider::OpenAI => "gpt-4o".to_string(),
            Provider::Custom(_) => default_model(),
        }
    }
}

fn default_provider() -> Provider {
    Provider::Anthropic
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_fill_defaults_from_partial_yaml() {
        let settings: ProviderSettings = serde_yaml::from_str("provider: openai\n").unwrap();
        assert_eq!(settings.provider, Provider::OpenAI);
        assert_eq!(settings.timeout_seconds, 60);
        assert_eq!(settings.api_key_variable(), "OPENAI_API_KEY");
    }

    #[test]
    fn explicit_key_variable_wins() {
        let settings = ProviderSettings {
            api_key_env: Some("WORK_CLAUDE_KEY".into()),
            ..Default::default()
        };
        assert_eq!(settings.api_key_variable(), "WORK_CLAUDE_KEY");
    }
}
