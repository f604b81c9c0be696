// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::safety::{is_binary, is_ignored, validate_relative};
use crate::tool::{err_result, ok_result, parse_args, required_str, Tool};

/// Hard byte ceiling for file reads returned to the model.
const READ_LIMIT: usize = 200_000;

/// Maximum entries a recursive listing returns.
const LIST_LIMIT: usize = 500;

/// Built-in tool for file-system operations inside the working directory.
///
/// Safety policy: paths must be relative and must not contain `..`; entries
/// on the ignore list (dependency dirs, build outputs, lockfiles, env files)
/// are refused; binary files are refused for reads.
pub struct FileManagerTool {
    /// User-configured additions to the built-in ignore set.
    extra_ignored: Vec<String>,
}

impl FileManagerTool {
    pub fn new(extra_ignored: Vec<String>) -> Self {
        Self { extra_ignored }
    }

    fn check_path(&self, path: &str) -> Result<(), String> {
        validate_relative(path)?;
        if is_ignored(path, &self.extra_ignored) {
            return Err(format!("path is on the ignore list: {path}"));
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> String {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => return err_result(format!("read error: {e}")),
        };
        if is_binary(&bytes) {
            return err_result(format!("refusing to read binary file: {path}"));
        }
        let text = String::from_utf8_lossy(&bytes);
        let truncated = text.len() > READ_LIMIT;
        let content = if truncated {
            let mut end = READ_LIMIT;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        } else {
            text.to_string()
        };
        ok_result(json!({ "content": content, "truncated": truncated }))
    }

    async fn write(&self, path: &str, content: &str, append: bool) -> String {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await
            {
                Ok(mut f) => f.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(path, content).await
        };
        match result {
            Ok(()) => ok_result(json!({ "path": path, "bytesWritten": content.len() })),
            Err(e) => err_result(format!("write error: {e}")),
        }
    }

    fn list(&self, path: &str) -> String {
        let mut entries = Vec::new();
        let mut capped = false;
        // filter_entry prunes ignored directories instead of walking into them.
        let walker = WalkDir::new(path)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !is_ignored(&e.path().to_string_lossy(), &self.extra_ignored)
            });
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => return err_result(format!("list error: {e}")),
            };
            let rel = entry.path().to_string_lossy().to_string();
            if entries.len() >= LIST_LIMIT {
                capped = true;
                break;
            }
            if entry.file_type().is_dir() {
                entries.push(format!("{rel}/"));
            } else {
                entries.push(rel);
            }
        }
        ok_result(json!({ "entries": entries, "truncated": capped }))
    }

    async fn delete(&self, path: &str) -> String {
        match tokio::fs::remove_file(path).await {
            Ok(()) => ok_result(json!({ "deleted": path })),
            Err(e) => err_result(format!("delete error: {e}")),
        }
    }
}

impl Default for FileManagerTool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Tool for FileManagerTool {
    fn name(&self) -> &str {
        "file_manager"
    }

    fn description(&self) -> &str {
        "Read, write, append, list, or delete files under the working directory.\n\
         Paths must be relative; '..' and absolute paths are rejected.\n\
         Dependency directories, build outputs, lockfiles, and .env files are ignored.\n\
         Binary files cannot be read."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list", "delete"],
                    "description": "File system operation"
                },
                "path": {
                    "type": "string",
                    "description": "Relative file or directory path"
                },
                "content": {
                    "type": "string",
                    "description": "Text content (required for write/append)"
                }
            },
            "required": ["operation", "path"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args_json: &str) -> String {
        let args = match parse_args(args_json) {
            Ok(a) => a,
            Err(e) => return err_result(e),
        };
        let op = match required_str(&args, "operation") {
            Ok(o) => o.to_string(),
            Err(e) => return err_result(e),
        };
        let path = match required_str(&args, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return err_result(e),
        };
        if let Err(e) = self.check_path(&path) {
            return err_result(e);
        }

        debug!(op = %op, path = %path, "file_manager tool");

        match op.as_str() {
            "read" => self.read(&path).await,
            "write" | "append" => {
                let content = match required_str(&args, "content") {
                    Ok(c) => c.to_string(),
                    Err(_) => {
                        return err_result(
                            "write/append requires a 'content' field but it is missing. \
                             This usually means the JSON was truncated because the content \
                             was too large to fit in a single generation.",
                        )
                    }
                };
                self.write(&path, &content, op == "append").await
            }
            "list" => self.list(&path),
            "delete" => self.delete(&path).await,
            other => err_result(format!("unknown operation: {other}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(out: &str) -> Value {
        serde_json::from_str(out).unwrap()
    }

    async fn run(tool: &FileManagerTool, args: Value) -> Value {
        parse(&tool.invoke(&args.to_string()).await)
    }

    /// Run the tool inside a scratch dir so relative paths resolve there.
    /// Tests share one process; serialize cwd changes.
    fn scratch() -> (std::sync::MutexGuard<'static, ()>, tempfile::TempDir) {
        static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        let guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::TempDir::new().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        (guard, dir)
    }

    // ── Round-trip ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (_g, _dir) = scratch();
        let t = FileManagerTool::default();
        let w = run(&t, json!({"operation":"write","path":"notes.txt","content":"hello fs"})).await;
        assert_eq!(w["success"], true, "{w}");
        let r = run(&t, json!({"operation":"read","path":"notes.txt"})).await;
        assert_eq!(r["success"], true);
        assert_eq!(r["content"], "hello fs");
    }

    #[tokio::test]
    async fn append_extends_existing_content() {
        let (_g, _dir) = scratch();
        let t = FileManagerTool::default();
        run(&t, json!({"operation":"write","path":"log.txt","content":"one\n"})).await;
        run(&t, json!({"operation":"append","path":"log.txt","content":"two\n"})).await;
        let r = run(&t, json!({"operation":"read","path":"log.txt"})).await;
        let content = r["content"].as_str().unwrap();
        assert!(content.contains("one") && content.contains("two"));
    }

    #[tokio::test]
    async fn write_creates_nested_directories() {
        let (_g, _dir) = scratch();
        let t = FileManagerTool::default();
        let w = run(&t, json!({"operation":"write","path":"a/b/c.txt","content":"nested"})).await;
        assert_eq!(w["success"], true, "{w}");
        let r = run(&t, json!({"operation":"read","path":"a/b/c.txt"})).await;
        assert_eq!(r["content"], "nested");
    }

    // ── Safety policy ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn absolute_path_is_rejected() {
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"read","path":"/etc/passwd"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("absolute"));
    }

    #[tokio::test]
    async fn parent_escape_is_rejected() {
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"read","path":"../outside.txt"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("escapes"));
    }

    #[tokio::test]
    async fn ignored_paths_are_refused() {
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"read","path":"node_modules/pkg/index.js"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("ignore list"));
    }

    #[tokio::test]
    async fn binary_file_read_is_refused() {
        let (_g, _dir) = scratch();
        std::fs::write("blob.bin", [0u8, 159, 146, 150, 0, 1, 2]).unwrap();
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"read","path":"blob.bin"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("binary"));
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_skips_ignored_directories() {
        let (_g, _dir) = scratch();
        std::fs::create_dir_all("src").unwrap();
        std::fs::create_dir_all("node_modules/dep").unwrap();
        std::fs::write("src/lib.rs", "pub fn x() {}").unwrap();
        std::fs::write("node_modules/dep/index.js", "x").unwrap();
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"list","path":"."})).await;
        let entries: Vec<String> = r["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(entries.iter().any(|e| e.contains("src")));
        assert!(!entries.iter().any(|e| e.contains("node_modules")));
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_file_read_is_error() {
        let (_g, _dir) = scratch();
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"read","path":"nope.txt"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("read error"));
    }

    #[tokio::test]
    async fn write_without_content_is_error() {
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"write","path":"x.txt"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("content"));
    }

    #[tokio::test]
    async fn unknown_operation_is_error() {
        let t = FileManagerTool::default();
        let r = run(&t, json!({"operation":"chmod","path":"x.txt"})).await;
        assert_eq!(r["success"], false);
        assert!(r["error"].as_str().unwrap().contains("unknown operation"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_error() {
        let t = FileManagerTool::default();
        let v = parse(&t.invoke("{broken").await);
        assert_eq!(v["success"], false);
    }

    #[tokio::test]
    async fn delete_then_read_fails() {
        let (_g, _dir) = scratch();
        let t = FileManagerTool::default();
        run(&t, json!({"operation":"write","path":"gone.txt","content":"x"})).await;
        let d = run(&t, json!({"operation":"delete","path":"gone.txt"})).await;
        assert_eq!(d["success"], true);
        let r = run(&t, json!({"operation":"read","path":"gone.txt"})).await;
        assert_eq!(r["success"], false);
    }

    // ── Schema ────────────────────────────────────────────────────────────────

    #[test]
    fn schema_requires_operation_and_path() {
        let t = FileManagerTool::default();
        let schema = t.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        let names: Vec<&str> = required.iter().map(|v| v.as_str().unwrap()).collect();
        assert!(names.contains(&"operation"));
        assert!(names.contains(&"path"));
    }
}
