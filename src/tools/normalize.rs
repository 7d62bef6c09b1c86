//! Argument normalization applied once before dispatch
//!
//! Orchestrators do not always send arguments in the declared shape. Two
//! rewrites are applied, in order:
//!
//! 1. Unwrap: a mapping whose only key is a wrapper key (`kwargs`) holding a
//!    serialized mapping is replaced by that mapping, repeatedly, until no
//!    wrapper remains. A top-level serialized mapping string is parsed too.
//! 2. Rename: a recognized alias key is renamed to its canonical key when the
//!    canonical key is absent. When both are present the alias is left alone.
//!
//! The transform is idempotent: normalizing an already normalized mapping
//! returns it unchanged.

use serde_json::{Map, Value};

use crate::error::{CalbotError, Result};

/// Keys that wrap the real argument mapping
pub const WRAPPER_KEYS: &[&str] = &["kwargs"];

/// (alias, canonical) key pairs
pub const ALIASES: &[(&str, &str)] = &[
    ("email", "user_email"),
    ("startDateTime", "start_time"),
    ("endDateTime", "end_time"),
    ("timeZone", "time_zone"),
    ("body", "content"),
];

const MAX_UNWRAP_DEPTH: usize = 8;

/// Normalize raw tool-call arguments into a flat mapping.
///
/// `raw` may be a JSON object, a string holding a serialized JSON object, or
/// null (no arguments).
pub fn normalize_arguments(raw: &Value) -> Result<Map<String, Value>> {
    let mut args = into_mapping(raw)?;

    let mut depth = 0;
    while let Some(inner) = wrapped_mapping(&args)? {
        depth += 1;
        if depth > MAX_UNWRAP_DEPTH {
            return Err(CalbotError::InvalidArguments(format!(
                "Arguments nested more than {} levels deep",
                MAX_UNWRAP_DEPTH
            )));
        }
        args = inner;
    }

    for (alias, canonical) in ALIASES {
        if args.contains_key(*alias) && !args.contains_key(*canonical) {
            if let Some(value) = args.remove(*alias) {
                args.insert((*canonical).to_string(), value);
            }
        }
    }

    Ok(args)
}

fn into_mapping(raw: &Value) -> Result<Map<String, Value>> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s)? {
            Value::Object(map) => Ok(map),
            other => Err(CalbotError::InvalidArguments(format!(
                "Expected an argument mapping, got {}",
                type_name(&other)
            ))),
        },
        other => Err(CalbotError::InvalidArguments(format!(
            "Expected an argument mapping, got {}",
            type_name(other)
        ))),
    }
}

/// Return the inner mapping when `args` is a single wrapper field.
fn wrapped_mapping(args: &Map<String, Value>) -> Result<Option<Map<String, Value>>> {
    if args.len() != 1 {
        return Ok(None);
    }
    let Some((key, value)) = args.iter().next() else {
        return Ok(None);
    };
    if !WRAPPER_KEYS.contains(&key.as_str()) {
        return Ok(None);
    }
    match value {
        Value::String(_) | Value::Object(_) => into_mapping(value).map(Some),
        _ => Ok(None),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
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

    fn norm(v: Value) -> Map<String, Value> {
        normalize_arguments(&v).unwrap()
    }

    #[test]
    fn test_plain_mapping_unchanged() {
        let out = norm(json!({"user_email": "a@x.com", "start_time": "2025-07-24T15:00:00"}));
        assert_eq!(out["user_email"], "a@x.com");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_serialized_top_level() {
        let out = norm(json!(r#"{"user_email":"a@x.com"}"#));
        assert_eq!(out["user_email"], "a@x.com");
    }

    #[test]
    fn test_null_and_empty_string() {
        assert!(norm(Value::Null).is_empty());
        assert!(norm(json!("")).is_empty());
    }

    #[test]
    fn test_unwrap_kwargs_string() {
        let out = norm(json!({"kwargs": r#"{"email":"a@x.com","start_time":"s","end_time":"e"}"#}));
        assert!(!out.contains_key("kwargs"));
        assert_eq!(out["user_email"], "a@x.com");
        assert_eq!(out["start_time"], "s");
    }

    #[test]
    fn test_unwrap_kwargs_object() {
        let out = norm(json!({"kwargs": {"user_email": "a@x.com"}}));
        assert_eq!(out["user_email"], "a@x.com");
    }

    #[test]
    fn test_unwrap_nested_wrappers_fully() {
        let inner = json!({"user_email": "a@x.com"}).to_string();
        let middle = json!({"kwargs": inner}).to_string();
        let out = norm(json!({"kwargs": middle}));
        assert_eq!(out["user_email"], "a@x.com");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_wrapper_with_siblings_not_unwrapped() {
        let out = norm(json!({"kwargs": "{}", "user_email": "a@x.com"}));
        assert!(out.contains_key("kwargs"));
    }

    #[test]
    fn test_wrapper_with_non_mapping_payload_fails() {
        let err = normalize_arguments(&json!({"kwargs": "[1,2]"})).unwrap_err();
        assert!(matches!(err, CalbotError::InvalidArguments(_)));
    }

    #[test]
    fn test_rename_aliases() {
        let out = norm(json!({
            "email": "a@x.com",
            "startDateTime": "s",
            "endDateTime": "e",
            "timeZone": "UTC",
            "body": "hello"
        }));
        assert_eq!(out["user_email"], "a@x.com");
        assert_eq!(out["start_time"], "s");
        assert_eq!(out["end_time"], "e");
        assert_eq!(out["time_zone"], "UTC");
        assert_eq!(out["content"], "hello");
        assert!(!out.contains_key("email"));
    }

    #[test]
    fn test_alias_left_when_canonical_present() {
        let out = norm(json!({"email": "alias@x.com", "user_email": "canonical@x.com"}));
        assert_eq!(out["user_email"], "canonical@x.com");
        assert_eq!(out["email"], "alias@x.com");
    }

    #[test]
    fn test_idempotent() {
        let inputs = vec![
            json!({"kwargs": r#"{"email":"a@x.com"}"#}),
            json!({"email": "a@x.com", "user_email": "b@x.com"}),
            json!({"kwargs": {"kwargs": {"timeZone": "UTC"}}}),
            json!(r#"{"startDateTime":"s"}"#),
            json!({"user_email": "a@x.com"}),
        ];
        for input in inputs {
            let once = norm(input);
            let twice = normalize_arguments(&Value::Object(once.clone())).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(normalize_arguments(&json!([1, 2])).is_err());
        assert!(normalize_arguments(&json!(42)).is_err());
        assert!(normalize_arguments(&json!("\"just a string\"")).is_err());
        assert!(normalize_arguments(&json!("not json")).is_err());
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut value = json!({"user_email": "a@x.com"});
        for _ in 0..(MAX_UNWRAP_DEPTH + 1) {
            value = json!({"kwargs": value.to_string()});
        }
        assert!(normalize_arguments(&value).is_err());
    }
}
