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

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Finds the JSON document in a model response. Unlike a lenient extractor
/// there is no fallback: text without a parseable document is an error.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("response was empty".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    for (language, content) in extract_code_blocks(trimmed) {
        if language.as_deref().map_or(true, |l| l.eq_ignore_ascii_case("json")) {
            if let Ok(value) = serde_json::from_str::<Value>(&content) {
                debug!("Extracted JSON from markdown code fence");
                return Ok(value);
            }
        }
    }

    if let Some(candidate) = find_balanced(trimmed, '{', '}') {
        return serde_json::from_str(candidate).map_err(|e| {
            format!("response contained a JSON-like object that failed to parse: {e}")
        });
    }

    Err("response did not contain a JSON object".to_string())
}

/// Extracts and decodes in one step. Missing optional fields take their
/// defaults; wrong types are errors.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| format!("response did not match the expected shape: {e}"))
}

/// First balanced `open`..`close` span, ignoring delimiters inside strings.
fn find_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' && start.is_some() {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                return start.map(|s| &text[s..=i]);
            }
        }
    }
    None
}

fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(fence) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = Some(fence.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        let mut content = Vec::new();
        for inner in lines.by_ref() {
            if inner.trim().starts_with("```") {
                break;
            }
            content.push(inner);
        }
        blocks.push((language, content.join("\n")));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_fenced_and_embedded_json() {
        assert_eq!(extract_json(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 2}\n```\nDone").unwrap(),
            json!({"a": 2})
        );
        assert_eq!(
            extract_json(r#"Plan: {"goal": "use {braces} in text"} trailing"#).unwrap(),
            json!({"goal": "use {braces} in text"})
        );
    }

    #[test]
    fn rejects_text_without_a_document() {
        assert!(extract_json("I cannot help with that").is_err());
        assert!(extract_json("   ").is_err());
        assert!(extract_json(r#"{"goal": "unterminated", }"#).is_err());
    }

    #[test]
    fn decode_reports_shape_errors() {
        #[derive(serde::Deserialize, Debug)]
        struct Shape {
            #[allow(dead_code)]
            goal: String,
        }
        assert!(decode_json::<Shape>(r#"{"goal": 3}"#).is_err());
        assert!(decode_json::<Shape>(r#"{"goal": "ok"}"#).is_ok());
    }
}
