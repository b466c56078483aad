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

//! Builders for JSON schemas accepted by strict structured-output modes:
//! every object closes `additionalProperties` and lists all of its
//! properties as required, with optional values expressed as nullable.

use serde_json::{json, Map, Value};

pub fn object(properties: &[(&str, Value)]) -> Value {
    let mut props = Map::new();
    for (name, schema) in properties {
        props.insert((*name).to_string(), schema.clone());
    }
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false
    })
}

pub fn string() -> Value {
    json!({ "type": "string" })
}

pub fn number() -> Value {
    json!({ "type": "number" })
}

pub fn array(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

pub fn string_enum(values: &[&str]) -> Value {
    json!({ "type": "string", "enum": values })
}

/// Widens a schema's `type` to also admit `null`.
pub fn nullable(mut schema: Value) -> Value {
    if let Some(Value::String(kind)) = schema.get("type").cloned() {
        schema["type"] = json!([kind, "null"]);
    }
    if let Some(Value::Array(values)) = schema.get_mut("enum") {
        values.push(Value::Null);
    }
    schema
}

/// Free-form string map, expressed as a list of key/value pairs because
/// strict modes reject open objects.
pub fn pairs() -> Value {
    array(object(&[("key", string()), ("value", string())]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_closed_and_fully_required() {
        let schema = object(&[("goal", string()), ("note", nullable(string()))]);
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["goal", "note"]));
        assert_eq!(schema["properties"]["note"]["type"], json!(["string", "null"]));
    }

    #[test]
    fn nullable_enums_admit_null() {
        let schema = nullable(string_enum(&["a", "b"]));
        assert_eq!(schema["enum"], json!(["a", "b", null]));
    }
}
