//! Best-effort field extraction from loosely-typed event payloads.
//!
//! Event `data` objects come from several producers and are not always
//! consistent about types (numbers sent as strings, counts sent as maps).
//! Every accessor here returns `None` (or an empty default) for a missing
//! or mistyped field instead of failing the whole payload.

use serde_json::Value;

/// First present key among `keys`.
fn lookup<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys
        .iter()
        .find_map(|k| data.get(*k).filter(|v| !v.is_null()))
}

/// A string field. Numbers are stringified so numeric ids still key correctly.
pub fn string(data: &Value, keys: &[&str]) -> Option<String> {
    match lookup(data, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A float field; accepts numbers and numeric strings.
pub fn float(data: &Value, keys: &[&str]) -> Option<f64> {
    let v = match lookup(data, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }?;
    v.is_finite().then_some(v)
}

/// A non-negative integer field; floats are truncated, negatives rejected.
pub fn count(data: &Value, keys: &[&str]) -> Option<u32> {
    let v = float(data, keys)?;
    (v >= 0.0).then(|| v.min(u32::MAX as f64) as u32)
}

/// A boolean field; accepts `true`/`false`, `1`/`0` and their string forms.
pub fn flag(data: &Value, keys: &[&str]) -> Option<bool> {
    match lookup(data, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A list of messages. A single string becomes a one-element list; objects
/// contribute their `message` field.
pub fn messages(data: &Value, keys: &[&str]) -> Vec<String> {
    message_list(data, keys).unwrap_or_default()
}

/// Like [`messages`], but `None` when no key is present at all, so an
/// absent list can be told apart from an empty one.
pub fn message_list(data: &Value, keys: &[&str]) -> Option<Vec<String>> {
    Some(match lookup(data, keys)? {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => string(item, &["message", "detail", "warning"]),
                _ => None,
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    })
}

/// Sum of a count field that may be a plain number, a `{category: n}` map,
/// or a list of numbers. Non-numeric members are skipped.
pub fn summed_count(data: &Value, keys: &[&str]) -> Option<u32> {
    match lookup(data, keys)? {
        Value::Object(map) => Some(sum_positive(map.values())),
        Value::Array(items) => Some(sum_positive(items.iter())),
        _ => count(data, keys),
    }
}

fn sum_positive<'a>(values: impl Iterator<Item = &'a Value>) -> u32 {
    values
        .filter_map(Value::as_f64)
        .filter(|v| *v > 0.0)
        .map(|v| v as u32)
        .fold(0u32, u32::saturating_add)
}
