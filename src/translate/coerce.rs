//! Lenient field extraction over raw JSON with path-tracked coercions.
//!
//! Converters must be total for any payload accepted by a detector: a
//! malformed sub-field coerces to a safe default and records a
//! [`FieldIssue`](super::canonical::FieldIssue) instead of failing. Strict
//! mode turns the first recorded issue into a `ConversionError` upstream.

use super::canonical::ConversionNotes;
use serde_json::Value;

/// A string field; non-string non-null values coerce to `None` with an issue.
pub fn opt_str(obj: &Value, key: &str, path: &str, notes: &mut ConversionNotes) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            notes.issue(
                join(path, key),
                format!("expected string, got {}", type_name(other)),
            );
            None
        }
    }
}

/// A string field with a default for missing or malformed values.
pub fn str_or(
    obj: &Value,
    key: &str,
    default: &str,
    path: &str,
    notes: &mut ConversionNotes,
) -> String {
    opt_str(obj, key, path, notes).unwrap_or_else(|| default.to_string())
}

pub fn opt_bool(obj: &Value, key: &str, path: &str, notes: &mut ConversionNotes) -> Option<bool> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            notes.issue(
                join(path, key),
                format!("expected boolean, got {}", type_name(other)),
            );
            None
        }
    }
}

pub fn opt_f64(obj: &Value, key: &str, path: &str, notes: &mut ConversionNotes) -> Option<f64> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(n) => Some(n),
            None => {
                notes.issue(
                    join(path, key),
                    format!("expected number, got {}", type_name(v)),
                );
                None
            }
        },
    }
}

pub fn opt_u64(obj: &Value, key: &str, path: &str, notes: &mut ConversionNotes) -> Option<u64> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(n) => Some(n),
            None => {
                notes.issue(
                    join(path, key),
                    format!("expected unsigned integer, got {}", type_name(v)),
                );
                None
            }
        },
    }
}

/// An array field; missing yields empty, malformed yields empty with an issue.
pub fn arr_or_empty<'a>(
    obj: &'a Value,
    key: &str,
    path: &str,
    notes: &mut ConversionNotes,
) -> &'a [Value] {
    match obj.get(key) {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(other) => {
            notes.issue(
                join(path, key),
                format!("expected array, got {}", type_name(other)),
            );
            &[]
        }
    }
}

/// A list of strings, dropping (and noting) non-string entries. Accepts a
/// bare string as a one-element list, which both providers allow for `stop`.
pub fn string_list(obj: &Value, key: &str, path: &str, notes: &mut ConversionNotes) -> Vec<String> {
    match obj.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| match v {
                Value::String(s) => Some(s.clone()),
                other => {
                    notes.issue(
                        format!("{}[{i}]", join(path, key)),
                        format!("expected string, got {}", type_name(other)),
                    );
                    None
                }
            })
            .collect(),
        Some(other) => {
            notes.issue(
                join(path, key),
                format!("expected string or array, got {}", type_name(other)),
            );
            Vec::new()
        }
    }
}

pub fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_field_coerces_and_notes_path() {
        let obj = json!({"temperature": "hot"});
        let mut notes = ConversionNotes::default();

        assert_eq!(opt_f64(&obj, "temperature", "", &mut notes), None);
        assert_eq!(notes.issues.len(), 1);
        assert_eq!(notes.issues[0].path, "temperature");
        assert!(notes.issues[0].message.contains("string"));
    }

    #[test]
    fn test_missing_field_is_not_an_issue() {
        let obj = json!({});
        let mut notes = ConversionNotes::default();

        assert_eq!(opt_str(&obj, "model", "", &mut notes), None);
        assert!(notes.issues.is_empty());
    }

    #[test]
    fn test_stop_accepts_bare_string() {
        let obj = json!({"stop": "END"});
        let mut notes = ConversionNotes::default();

        assert_eq!(string_list(&obj, "stop", "", &mut notes), vec!["END"]);
        assert!(notes.issues.is_empty());
    }

    #[test]
    fn test_nested_paths() {
        let obj = json!({"messages": [1, "ok"]});
        let mut notes = ConversionNotes::default();

        let got = string_list(&obj, "messages", "request", &mut notes);
        assert_eq!(got, vec!["ok"]);
        assert_eq!(notes.issues[0].path, "request.messages[0]");
    }
}
