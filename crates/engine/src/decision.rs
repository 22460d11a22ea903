//! Function-decision parsing.
//!
//! The decider is prompted to answer with a JSON document, but models wrap
//! JSON in prose and code fences. The parser extracts the first balanced
//! JSON object from the response, then is strict about the shape of
//! `function_calls`. A hard failure never aborts the turn: it yields an
//! empty call list with the failure kind recorded.

use serde_json::{Map, Value};

/// One function the decider asked for.
#[derive(Debug, Clone)]
pub struct FunctionCallRequest {
    pub name: String,
    pub parameters: Map<String, Value>,
}

/// The parsed decision document.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub function_calls: Vec<FunctionCallRequest>,
    pub thought_process: Option<String>,
    pub confidence_level: Option<String>,
    /// The full decision object as parsed, unknown top-level keys included.
    /// `Null` when no JSON could be recovered.
    pub raw_decision: Value,
    /// Set on hard parse failure; the call list is then empty.
    pub parse_error: Option<&'static str>,
}

/// Parse a decider response. Never fails; failures are data.
pub fn parse_decision(text: &str) -> Decision {
    let Some(candidate) = extract_first_json_object(text) else {
        return failed("no_json_object");
    };

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(_) => return failed("invalid_json"),
    };
    let Value::Object(map) = &value else {
        return failed("invalid_json");
    };

    let function_calls = match map.get("function_calls") {
        // A decision with no call list means "do nothing".
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => {
            let mut calls = Vec::with_capacity(entries.len());
            for entry in entries {
                let Some(obj) = entry.as_object() else {
                    return failed_with("invalid_shape", value.clone());
                };
                let Some(name) = obj.get("name").and_then(Value::as_str) else {
                    return failed_with("invalid_shape", value.clone());
                };
                let parameters = match obj.get("parameters") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(params)) => params.clone(),
                    Some(_) => return failed_with("invalid_shape", value.clone()),
                };
                calls.push(FunctionCallRequest {
                    name: name.to_owned(),
                    parameters,
                });
            }
            calls
        }
        Some(_) => return failed_with("invalid_shape", value.clone()),
    };

    Decision {
        function_calls,
        thought_process: map
            .get("thought_process")
            .and_then(Value::as_str)
            .map(str::to_owned),
        confidence_level: map
            .get("confidence_level")
            .and_then(Value::as_str)
            .map(str::to_owned),
        raw_decision: value,
        parse_error: None,
    }
}

fn failed(kind: &'static str) -> Decision {
    failed_with(kind, Value::Null)
}

fn failed_with(kind: &'static str, raw: Value) -> Decision {
    Decision {
        raw_decision: raw,
        parse_error: Some(kind),
        ..Default::default()
    }
}

/// Find the first balanced `{ ... }` object in `text`, honoring strings and
/// escapes so braces inside quoted values do not confuse the scan.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
