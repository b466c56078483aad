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

use crate::models::EnhancedPrompt;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are a workflow analyst. Read a user's automation request and \
describe what they want before anything is built. Return a single JSON document with: \
goal (one sentence); understanding (summary, data_flow as ordered steps, edge_cases with \
condition and suggested_handling); assumptions; ambiguities; inferences; reasoning_trace.\n\
\n\
Assumptions must be specific and falsifiable against real data. Each has an id (a1, a2, ...), \
a category, a description, a validation_strategy and impact_if_wrong (critical, moderate or low). \
Categories:\n\
- field_name: a field exists under some name. Give synonyms in parameters.candidates.\n\
- data_type: a field holds values of parameters.expected_type (email, date, number, boolean, string).\n\
- value_format: values of parameters.field match the regex in parameters.pattern.\n\
- structure: a source has all of parameters.required_headers.\n\
- behavior: how a service behaves; cannot be checked against data.\n\
parameters.field may name a field or the id of an earlier field_name assumption. Set \
parameters.plugin_key to the service the data comes from when more than one is involved.\n\
\n\
Ambiguities are questions only the user can answer; give options and, when sensible, a \
default_option. Never ask about anything listed under resolved user inputs.";

/// Renders the request for the model. Resolved inputs are repeated verbatim
/// and marked as final so the model does not second-guess them.
pub fn build_user_message(prompt: &EnhancedPrompt) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "## Original request\n{}\n", prompt.user_context.original_request.trim());

    for (label, lines) in prompt.labelled_sections() {
        let _ = writeln!(message, "## {label}");
        for line in lines {
            let _ = writeln!(message, "- {line}");
        }
        message.push('\n');
    }

    if !prompt.user_context.clarifications.is_empty() {
        message.push_str("## Clarifications\n");
        for clarification in &prompt.user_context.clarifications {
            let _ = writeln!(message, "Q: {}\nA: {}", clarification.question, clarification.answer);
        }
        message.push('\n');
    }

    if !prompt.specifics.services_involved.is_empty() {
        let _ = writeln!(
            message,
            "## Services involved\n{}\n",
            prompt.specifics.services_involved.join(", ")
        );
    }

    if !prompt.specifics.resolved_user_inputs.is_empty() {
        message.push_str(
            "## Resolved user inputs (AUTHORITATIVE)\n\
             The user has already provided these values. Use them exactly as written, \
             do not raise ambiguities about them and do not replace them with assumptions.\n",
        );
        for input in &prompt.specifics.resolved_user_inputs {
            let _ = writeln!(message, "- {} = {}", input.key, input.value);
        }
        message.push('\n');
    }

    message.push_str("Produce the semantic plan as JSON.");
    message
}
