//! Configuration templating.
//!
//! String values in a node's configuration may reference execution state
//! with `{{ namespace.path }}`. A string consisting of exactly one
//! placeholder takes the referenced value with its JSON type; placeholders
//! inside longer strings are rendered as text. Object keys are left as is.

use crate::error::TemplateError;
use crate::state::ExecutionState;
use serde_json::Value as JsonValue;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Resolves every placeholder in `raw` against `state`.
///
/// # Errors
///
/// `UnresolvedVariable` for a reference absent from state,
/// `MalformedTemplate` for an unterminated or empty placeholder.
pub fn resolve_config(raw: &JsonValue, state: &ExecutionState) -> Result<JsonValue, TemplateError> {
    match raw {
        JsonValue::String(s) => resolve_string(s, state),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve_config(item, state))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_config(v, state)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(JsonValue::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, state: &ExecutionState) -> Result<JsonValue, TemplateError> {
    if !s.contains(OPEN) {
        return Ok(JsonValue::String(s.to_string()));
    }

    if let Some(reference) = whole_placeholder(s) {
        return lookup(reference, s, state).cloned();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| malformed(s))?;
        let value = lookup(&after_open[..end], s, state)?;
        match value {
            JsonValue::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);

    Ok(JsonValue::String(out))
}

/// Returns the inner reference if `s` is exactly one placeholder.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner)
}

fn lookup<'a>(
    reference: &str,
    template: &str,
    state: &'a ExecutionState,
) -> Result<&'a JsonValue, TemplateError> {
    let reference = reference.trim();
    if reference.is_empty() || reference.split('.').any(str::is_empty) {
        return Err(malformed(template));
    }
    state
        .lookup(reference)
        .ok_or_else(|| TemplateError::UnresolvedVariable {
            reference: reference.to_string(),
        })
}

fn malformed(template: &str) -> TemplateError {
    TemplateError::MalformedTemplate {
        template: template.to_string(),
    }
}
