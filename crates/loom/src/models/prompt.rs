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
use crate::grounding::field_matcher::normalize_name;
use serde::{Deserialize, Serialize};

/// Sectioned form of a user's workflow request, produced upstream.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EnhancedPrompt {
    #[serde(default)]
    pub sections: PromptSections,
    #[serde(default)]
    pub user_context: UserContext,
    #[serde(default)]
    pub specifics: PromptSpecifics,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PromptSections {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<String>,
    #[serde(default)]
    pub actions: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delivery: Vec<String>,
    #[serde(default)]
    pub processing_steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserContext {
    #[serde(default)]
    pub original_request: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clarifications: Vec<Clarification>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clarification {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PromptSpecifics {
    #[serde(default, deserialize_with = "null_as_default")]
    pub services_involved: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub resolved_user_inputs: Vec<ResolvedInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedInput {
    pub key: String,
    pub value: String,
}

impl EnhancedPrompt {
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            user_context: UserContext {
                original_request: original_request.into(),
                clarifications: Vec::new(),
            },
            ..Default::default()
        }
    }

    /// Returns the missing required fields, empty when the prompt is usable.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.user_context.original_request.trim().is_empty() {
            missing.push("user_context.original_request");
        }
        missing
    }

    pub fn resolved_input(&self, key: &str) -> Option<&str> {
        let wanted = normalize_name(key);
        self.specifics
            .resolved_user_inputs
            .iter()
            .find(|input| input.key == key || normalize_name(&input.key) == wanted)
            .map(|input| input.value.as_str())
    }

    /// Every section with content, in prompt order, paired with its label.
    pub fn labelled_sections(&self) -> Vec<(&'static str, &[String])> {
        let mut sections: Vec<(&'static str, &[String])> = Vec::with_capacity(5);
        sections.push(("Data", &self.sections.data));
        if let Some(actions) = &self.sections.actions {
            sections.push(("Actions", actions));
        }
        if let Some(steps) = &self.sections.processing_steps {
            sections.push(("Processing steps", steps));
        }
        if let Some(output) = &self.sections.output {
            sections.push(("Output", output));
        }
        sections.push(("Delivery", &self.sections.delivery));
        sections.retain(|(_, lines)| !lines.is_empty());
        sections
    }
}
