//! Tool-call payload parsing for models without native tool calling.
//!
//! The body of a `<tool_call>` block (or an engine-specific marker) is one
//! of:
//!
//! 1. **JSON**: `{"name": "get_weather", "arguments": {"city": "Paris"}}`,
//!    with `parameters` accepted for `arguments` and string-encoded argument
//!    objects decoded. A JSON array holds several calls.
//! 2. **Call expressions**: `get_weather("Paris", units="metric")`, possibly
//!    several wrapped in `[...]` and separated by commas.
//!
//! Positional arguments are mapped onto the tool's declared parameters in
//! schema order; keyword arguments override. Arguments of unknown tools are
//! keyed `arg0`, `arg1`, ….

use crate::tools::Tool;
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fmt::Write;

/// Maximum length for synthetic tool call ids.
const SYNTHETIC_TOOL_CALL_ID_MAX_LEN: usize = 40;

/// A tool call recovered from text
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Generate a synthetic tool-call id (max 40 chars).
pub fn new_synthetic_tool_call_id(prefix: &str) -> String {
    let mut id = String::new();
    let _ = write!(&mut id, "{prefix}_{}", uuid::Uuid::new_v4().simple());
    id.truncate(SYNTHETIC_TOOL_CALL_ID_MAX_LEN);
    id
}

/// Parse every tool call in a payload
pub fn parse_tool_calls(payload: &str, tools: &[Tool]) -> Result<Vec<ParsedToolCall>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(Error::parse("empty tool call"));
    }

    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        if let Some(calls) = calls_from_json(value) {
            return Ok(calls);
        }
    }

    let inner = payload
        .strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .unwrap_or(payload);

    let mut calls = Vec::new();
    for expr in split_top_level(inner, ',') {
        let expr = expr.trim();
        if expr.is_empty() {
            continue;
        }
        calls.push(parse_call_expr(expr, tools)?);
    }

    if calls.is_empty() {
        return Err(Error::parse(format!("no tool call found in {:?}", payload)));
    }
    Ok(calls)
}

fn calls_from_json(value: Value) -> Option<Vec<ParsedToolCall>> {
    match value {
        Value::Array(items) => {
            let calls: Option<Vec<_>> = items.into_iter().map(call_from_json).collect();
            calls.filter(|c| !c.is_empty())
        }
        other => call_from_json(other).map(|call| vec![call]),
    }
}

fn call_from_json(value: Value) -> Option<ParsedToolCall> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    // OpenAI-style {"function": {...}} wrappers
    if let Some(Value::Object(function)) = obj.remove("function") {
        obj = function;
    }
    let name = obj.get("name")?.as_str()?.to_string();
    let arguments = obj
        .remove("arguments")
        .or_else(|| obj.remove("parameters"))
        .unwrap_or_else(|| Value::Object(Map::new()));

    let input = match arguments {
        Value::String(encoded) => serde_json::from_str::<Value>(&encoded)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())),
        Value::Object(map) => Value::Object(map),
        Value::Null => Value::Object(Map::new()),
        _ => return None,
    };

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| new_synthetic_tool_call_id("toolu"));

    Some(ParsedToolCall { id, name, input })
}

fn parse_call_expr(expr: &str, tools: &[Tool]) -> Result<ParsedToolCall> {
    let open = expr
        .find('(')
        .ok_or_else(|| Error::parse(format!("not a call expression: {:?}", expr)))?;
    if !expr.ends_with(')') {
        return Err(Error::parse(format!("unterminated call expression: {:?}", expr)));
    }

    let name = expr[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::parse(format!("invalid tool name: {:?}", name)));
    }

    let params = tools
        .iter()
        .find(|t| t.name() == name)
        .map(Tool::parameter_names)
        .unwrap_or_default();

    let mut positional = Vec::new();
    let mut keywords = Vec::new();
    for arg in split_top_level(&expr[open + 1..expr.len() - 1], ',') {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        match split_keyword(arg) {
            Some((key, value)) => keywords.push((key.to_string(), decode_value(value))),
            None => positional.push(decode_value(arg)),
        }
    }

    let mut input = Map::new();
    for (index, value) in positional.into_iter().enumerate() {
        let key = params
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("arg{}", index));
        input.insert(key, value);
    }
    for (key, value) in keywords {
        input.insert(key, value);
    }

    Ok(ParsedToolCall {
        id: new_synthetic_tool_call_id("toolu"),
        name: name.to_string(),
        input: Value::Object(input),
    })
}

/// Split on `sep` outside quotes and brackets
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// `key=value` with a bare identifier key
fn split_keyword(arg: &str) -> Option<(&str, &str)> {
    let eq = arg.find('=')?;
    let key = arg[..eq].trim();
    let is_ident = !key.is_empty()
        && key
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_alphanumeric() || c == '_');
    // `a==b` or a quoted string containing '=' are not keywords
    if !is_ident || arg[eq + 1..].starts_with('=') {
        return None;
    }
    Some((key, arg[eq + 1..].trim()))
}

fn decode_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    match raw {
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        "None" => return Value::Null,
        _ => {}
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::String(unescape_single_quoted(&raw[1..raw.len() - 1]));
    }
    Value::String(raw.to_string())
}

fn unescape_single_quoted(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
