// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub args_json: String,
}

/// Trait that every built-in and user-defined tool must implement.
///
/// The tool boundary is a single JSON string in each direction: `invoke`
/// receives the argument object serialized as JSON and returns a JSON object
/// with `success: true, …` or `success: false, error: <string>`.  A tool
/// catches its own failures — it never panics or errors upward.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are encoded in the returned JSON.
    async fn invoke(&self, args_json: &str) -> String;
}

// ─── Result helpers ──────────────────────────────────────────────────────────

/// Build a success result.  `fields` must be a JSON object; its entries are
/// merged next to `success: true`.
pub fn ok_result(fields: Value) -> String {
    let mut obj = json!({ "success": true });
    if let (Some(dst), Some(src)) = (obj.as_object_mut(), fields.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    obj.to_string()
}

/// Build a failure result with an error message.
pub fn err_result(error: impl Into<String>) -> String {
    json!({ "success": false, "error": error.into() }).to_string()
}

/// Parse the incoming argument string into a JSON object.
/// An empty string stands for the empty object.
pub fn parse_args(args_json: &str) -> Result<Value, String> {
    let trimmed = args_json.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}

/// Fetch a required string field from parsed arguments.
pub fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required string field '{field}'"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_result_merges_fields_next_to_success() {
        let out = ok_result(json!({ "stdout": "hi", "exitCode": 0 }));
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["stdout"], "hi");
        assert_eq!(v["exitCode"], 0);
    }

    #[test]
    fn err_result_carries_message() {
        let v: Value = serde_json::from_str(&err_result("boom")).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "boom");
    }

    #[test]
    fn parse_args_accepts_object() {
        let v = parse_args(r#"{"path": "a.txt"}"#).unwrap();
        assert_eq!(v["path"], "a.txt");
    }

    #[test]
    fn parse_args_treats_empty_as_empty_object() {
        let v = parse_args("  ").unwrap();
        assert!(v.as_object().unwrap().is_empty());
    }

    #[test]
    fn parse_args_rejects_non_object() {
        assert!(parse_args("[1,2]").is_err());
        assert!(parse_args("42").is_err());
    }

    #[test]
    fn parse_args_rejects_broken_json() {
        let err = parse_args("{oops").unwrap_err();
        assert!(err.contains("invalid JSON"));
    }

    #[test]
    fn required_str_reports_missing_field() {
        let args = parse_args(r#"{"other": 1}"#).unwrap();
        let err = required_str(&args, "path").unwrap_err();
        assert!(err.contains("path"));
    }
}
