// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::safety::find_destructive;
use crate::tool::{err_result, ok_result, parse_args, required_str, Tool};

/// Maximum source size accepted for execution.
const MAX_SOURCE_BYTES: usize = 50 * 1024;

/// Timeout bounds in milliseconds.
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Languages with a launcher.  The set is closed; anything else is refused.
const LANGUAGES: &[(&str, &str, &str)] = &[
    // (language, interpreter, file extension)
    ("python", "python3", "py"),
    ("javascript", "node", "js"),
    ("bash", "bash", "sh"),
    ("sh", "sh", "sh"),
];

/// Built-in tool that executes a source snippet in a fixed language set.
///
/// Snippets run from files inside an isolated scratch directory that is
/// removed when the tool is dropped.  Destructive shell fragments and known
/// sandbox-escape shapes are refused before anything touches disk.
pub struct CodeRunnerTool {
    scratch: tempfile::TempDir,
    counter: AtomicU32,
}

impl CodeRunnerTool {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            scratch: tempfile::TempDir::with_prefix("bytecraft-exec-")?,
            counter: AtomicU32::new(0),
        })
    }

    fn launcher(language: &str) -> Option<(&'static str, &'static str)> {
        LANGUAGES
            .iter()
            .find(|(l, _, _)| *l == language)
            .map(|(_, interp, ext)| (*interp, *ext))
    }
}

#[async_trait]
impl Tool for CodeRunnerTool {
    fn name(&self) -> &str {
        "code_runner"
    }

    fn description(&self) -> &str {
        "Execute a source code snippet and return stdout, stderr, and exit code.\n\
         Supported languages: python, javascript, bash, sh.\n\
         Source is limited to 50 KB; the timeout is clamped to 1-300 seconds.\n\
         Destructive commands and sandbox-escape patterns are refused."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "enum": ["python", "javascript", "bash", "sh"],
                    "description": "Source language"
                },
                "code": {
                    "type": "string",
                    "description": "Source code to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Execution timeout in milliseconds (1000-300000)"
                }
            },
            "required": ["language", "code"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args_json: &str) -> String {
        let args = match parse_args(args_json) {
            Ok(a) => a,
            Err(e) => return err_result(e),
        };
        let language = match required_str(&args, "language") {
            Ok(l) => l.to_string(),
            Err(e) => return err_result(e),
        };
        let code = match required_str(&args, "code") {
            Ok(c) => c.to_string(),
            Err(e) => return err_result(e),
        };

        let (interpreter, ext) = match Self::launcher(&language) {
            Some(l) => l,
            None => return err_result(format!("unsupported language: {language}")),
        };
        if code.len() > MAX_SOURCE_BYTES {
            return err_result(format!(
                "source too large: {} bytes (limit {MAX_SOURCE_BYTES})",
                code.len()
            ));
        }
        if let Some(pattern) = find_destructive(&code) {
            return err_result(format!("refusing to run code containing '{pattern}'"));
        }
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let file = self
            .scratch
            .path()
            .join(format!("snippet_{}_{n}.{ext}", std::process::id()));
        if let Err(e) = tokio::fs::write(&file, &code).await {
            return err_result(format!("scratch write error: {e}"));
        }

        debug!(language = %language, timeout_ms, "code_runner tool");

        let mut cmd = Command::new(interpreter);
        cmd.arg(&file);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // Detach from the controlling terminal so snippets cannot write
        // escape sequences to the caller's tty.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let started = Instant::now();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            cmd.output(),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let _ = tokio::fs::remove_file(&file).await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let code = output.status.code().unwrap_or(-1);
                if output.status.success() {
                    ok_result(json!({
                        "stdout": stdout,
                        "stderr": stderr,
                        "exitCode": code,
                        "executionTime": elapsed_ms,
                    }))
                } else {
                    json!({
                        "success": false,
                        "error": format!("exited with code {code}"),
                        "stdout": stdout,
                        "stderr": stderr,
                        "exitCode": code,
                        "executionTime": elapsed_ms,
                    })
                    .to_string()
                }
            }
            Ok(Err(e)) => err_result(format!("spawn error: {e}")),
            Err(_) => err_result("timeout"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
