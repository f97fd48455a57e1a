//! Document schema validation
//!
//! Both portable formats are validated against a versioned JSON Schema before
//! any semantic processing. Schema errors are reported as human-readable
//! strings; when the input was supplied as raw text, JSON pointer paths are
//! mapped back to source line numbers.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;

/// Format version this build reads and writes
pub const FORMAT_VERSION: &str = "1.0";

static SPECIFICATION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "version": { "type": "string" },
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "category": { "type": "string" },
                        "layer": { "type": "string" },
                        "abstract": { "type": "boolean" },
                        "isCategory": { "type": "boolean" },
                        "extends": { "type": "array", "items": { "type": "string" } },
                        "interfaces": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name"],
                                "properties": {
                                    "name": { "type": "string", "minLength": 1 },
                                    "direction": { "enum": ["input", "output", "inout"] },
                                    "side": { "enum": ["left", "right"] },
                                    "sidePosition": { "type": "integer" },
                                    "array": {
                                        "type": "array",
                                        "items": { "type": "integer" },
                                        "minItems": 2,
                                        "maxItems": 2
                                    }
                                }
                            }
                        },
                        "properties": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name", "type"],
                                "properties": {
                                    "name": { "type": "string", "minLength": 1 },
                                    "type": {
                                        "enum": [
                                            "constant", "text", "multiline", "number",
                                            "integer", "hex", "select", "bool", "slider",
                                            "list", "button-url", "button-api", "button-graph"
                                        ]
                                    }
                                }
                            }
                        },
                        "interfaceGroups": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name"],
                                "properties": {
                                    "name": { "type": "string", "minLength": 1 },
                                    "direction": { "enum": ["input", "output", "inout"] },
                                    "interfaces": {
                                        "type": "array",
                                        "items": { "type": "string" }
                                    }
                                }
                            }
                        },
                        "defaultInterfaceGroups": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    }
                }
            },
            "graphs": { "type": "array", "items": { "type": "object" } },
            "includeGraphs": { "type": "array", "items": { "type": "object" } },
            "include": { "type": "array", "items": { "type": "string" } },
            "metadata": { "type": "object" }
        }
    })
});

static DATAFLOW_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["graphs"],
        "properties": {
            "version": { "type": "string" },
            "entryGraph": { "type": "string" },
            "metadata": { "type": "object" },
            "graphs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "nodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["id", "name"],
                                "properties": {
                                    "id": { "type": "string", "minLength": 1 },
                                    "name": { "type": "string", "minLength": 1 },
                                    "instanceName": { "type": "string" },
                                    "interfaces": { "type": "array" },
                                    "properties": { "type": "array" },
                                    "enabledInterfaceGroups": { "type": "array" },
                                    "position": {
                                        "type": "object",
                                        "required": ["x", "y"],
                                        "properties": {
                                            "x": { "type": "number" },
                                            "y": { "type": "number" }
                                        }
                                    }
                                }
                            }
                        },
                        "connections": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["id", "from", "to"],
                                "properties": {
                                    "id": { "type": "string", "minLength": 1 },
                                    "from": { "type": "string", "minLength": 1 },
                                    "to": { "type": "string", "minLength": 1 },
                                    "anchors": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["x", "y"],
                                            "properties": {
                                                "x": { "type": "number" },
                                                "y": { "type": "number" }
                                            }
                                        }
                                    }
                                }
                            }
                        },
                        "interfaces": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["id", "name"]
                            }
                        }
                    }
                }
            }
        }
    })
});

/// Validate a specification document value against the embedded schema
pub fn validate_specification(doc: &Value) -> Vec<String> {
    validate_against(&SPECIFICATION_SCHEMA, doc, None)
}

/// Validate a dataflow document value against the embedded schema
pub fn validate_dataflow(doc: &Value) -> Vec<String> {
    validate_against(&DATAFLOW_SCHEMA, doc, None)
}

/// Parse raw text and validate it as a specification document
///
/// Schema errors carry the source line of the offending value.
pub fn validate_specification_text(text: &str) -> Result<Value, Vec<String>> {
    validate_text(&SPECIFICATION_SCHEMA, text)
}

/// Parse raw text and validate it as a dataflow document
pub fn validate_dataflow_text(text: &str) -> Result<Value, Vec<String>> {
    validate_text(&DATAFLOW_SCHEMA, text)
}

/// Warn (never fail) about a missing or mismatched document version
pub fn check_version(version: Option<&str>, document_kind: &str) {
    match version {
        None => log::warn!(
            "{} document carries no version; assuming {}",
            document_kind,
            FORMAT_VERSION
        ),
        Some(v) if v != FORMAT_VERSION => log::warn!(
            "{} document version {} differs from supported {}; loading anyway",
            document_kind,
            v,
            FORMAT_VERSION
        ),
        Some(_) => {}
    }
}

fn validate_text(schema: &Value, text: &str) -> Result<Value, Vec<String>> {
    let doc: Value = match serde_json::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            return Err(vec![format!(
                "malformed JSON at line {}, column {}: {}",
                e.line(),
                e.column(),
                e
            )])
        }
    };
    let errors = validate_against(schema, &doc, Some(text));
    if errors.is_empty() {
        Ok(doc)
    } else {
        Err(errors)
    }
}

fn validate_against(schema: &Value, doc: &Value, source: Option<&str>) -> Vec<String> {
    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(e) => return vec![format!("internal schema error: {}", e)],
    };
    let mut messages = Vec::new();
    if let Err(errors) = compiled.validate(doc) {
        for error in errors {
            let pointer = error.instance_path.to_string();
            let location = source
                .and_then(|text| locate_pointer(text, &pointer))
                .map(|line| format!(" (line {})", line))
                .unwrap_or_default();
            if pointer.is_empty() {
                messages.push(format!("{}{}", error, location));
            } else {
                messages.push(format!("{} at {}{}", error, pointer, location));
            }
        }
    }
    messages
}

/// Container frame for the pointer locator
enum Frame {
    Object {
        current_key: Option<String>,
        awaiting_value: bool,
    },
    Array {
        index: usize,
    },
}

fn frame_path_matches(stack: &[Frame], target: &[String]) -> bool {
    if stack.len() != target.len() {
        return false;
    }
    stack.iter().zip(target).all(|(frame, segment)| match frame {
        Frame::Object { current_key, .. } => current_key.as_deref() == Some(segment.as_str()),
        Frame::Array { index } => index.to_string() == *segment,
    })
}

/// Best-effort mapping of a JSON pointer to a 1-based source line
///
/// Walks the raw text with a minimal tokenizer, tracking the current path of
/// object keys and array indices. Returns the line on which the pointed-to
/// value starts, or None when the pointer cannot be followed.
pub fn locate_pointer(text: &str, pointer: &str) -> Option<usize> {
    if pointer.is_empty() {
        return Some(1);
    }
    let target: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect();

    let mut stack: Vec<Frame> = Vec::new();
    let mut line = 1usize;
    let mut chars = text.chars().peekable();

    let finish_value = |stack: &mut Vec<Frame>| {
        if let Some(Frame::Object { awaiting_value, .. }) = stack.last_mut() {
            *awaiting_value = false;
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '"' => {
                let mut content = String::new();
                let mut escaped = false;
                for sc in chars.by_ref() {
                    if escaped {
                        content.push(sc);
                        escaped = false;
                    } else if sc == '\\' {
                        escaped = true;
                    } else if sc == '"' {
                        break;
                    } else {
                        if sc == '\n' {
                            line += 1;
                        }
                        content.push(sc);
                    }
                }
                let is_key = matches!(
                    stack.last(),
                    Some(Frame::Object {
                        awaiting_value: false,
                        ..
                    })
                );
                if is_key {
                    if let Some(Frame::Object { current_key, .. }) = stack.last_mut() {
                        *current_key = Some(content);
                    }
                } else {
                    // String value
                    if frame_path_matches(&stack, &target) {
                        return Some(line);
                    }
                    finish_value(&mut stack);
                }
            }
            '{' => {
                if frame_path_matches(&stack, &target) {
                    return Some(line);
                }
                stack.push(Frame::Object {
                    current_key: None,
                    awaiting_value: false,
                });
            }
            '[' => {
                if frame_path_matches(&stack, &target) {
                    return Some(line);
                }
                stack.push(Frame::Array { index: 0 });
            }
            '}' | ']' => {
                stack.pop();
                finish_value(&mut stack);
            }
            ':' => {
                if let Some(Frame::Object { awaiting_value, .. }) = stack.last_mut() {
                    *awaiting_value = true;
                }
            }
            ',' => {
                if let Some(Frame::Array { index }) = stack.last_mut() {
                    *index += 1;
                }
            }
            c if c.is_whitespace() => {}
            _ => {
                // Bare literal (number, true, false, null)
                if frame_path_matches(&stack, &target) {
                    return Some(line);
                }
                while let Some(&next) = chars.peek() {
                    if next == ',' || next == '}' || next == ']' || next.is_whitespace() {
                        break;
                    }
                    chars.next();
                }
                finish_value(&mut stack);
            }
        }
    }
    None
}
