// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::safety::find_destructive;
use crate::tool::{err_result, ok_result, parse_args, required_str, Tool};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Number of lines kept from the head and tail of oversized output.
/// Errors and summaries almost always appear at the end of build/test output,
/// so the tail is at least as important as the head.
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

struct BackgroundProcess {
    command: String,
    child: Child,
    started: Instant,
}

/// Built-in tool that runs shell commands: foreground with a timeout, or
/// background processes tracked by a generated id in a bounded map.
///
/// Background processes are owned by the tool, not the engine; they live
/// independently of the agent loop's turn boundaries.
pub struct CommandTool {
    default_timeout_secs: u64,
    max_background: usize,
    procs: Mutex<HashMap<String, BackgroundProcess>>,
    next_id: AtomicU32,
}

impl CommandTool {
    pub fn new(default_timeout_secs: u64, max_background: usize) -> Self {
        Self {
            default_timeout_secs,
            max_background,
            procs: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn from_config(cfg: &craft_config::ToolsConfig) -> Self {
        Self::new(cfg.command_timeout_secs, cfg.max_background_processes)
    }

    fn build_command(command: &str, workdir: Option<&str>) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        // Isolate the subprocess from the caller's terminal: a null stdin
        // makes isatty(0) fail, and setsid() removes the controlling tty so
        // the child cannot open /dev/tty and emit escape sequences.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }
        cmd
    }

    async fn run_foreground(&self, command: &str, workdir: Option<&str>, timeout_secs: u64) -> String {
        let mut cmd = Self::build_command(command, workdir);
        let started = Instant::now();
        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                let stdout = head_tail_truncate(&String::from_utf8_lossy(&output.stdout));
                let stderr = head_tail_truncate(&String::from_utf8_lossy(&output.stderr));
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

    fn spawn_background(&self, command: &str, workdir: Option<&str>) -> String {
        let mut procs = self.procs.lock().unwrap();
        // Reap finished children before enforcing the bound.
        procs.retain(|_, p| matches!(p.child.try_wait(), Ok(None)));
        if procs.len() >= self.max_background {
            return err_result(format!(
                "too many background processes (limit {})",
                self.max_background
            ));
        }

        let mut cmd = Self::build_command(command, workdir);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return err_result(format!("spawn error: {e}")),
        };
        let id = format!("bg_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let pid = child.id();
        procs.insert(
            id.clone(),
            BackgroundProcess {
                command: command.to_string(),
                child,
                started: Instant::now(),
            },
        );
        ok_result(json!({ "id": id, "pid": pid }))
    }

    fn list_background(&self) -> String {
        let mut procs = self.procs.lock().unwrap();
        let mut entries = Vec::new();
        for (id, p) in procs.iter_mut() {
            let running = matches!(p.child.try_wait(), Ok(None));
            entries.push(json!({
                "id": id,
                "command": p.command,
                "running": running,
                "elapsedSecs": p.started.elapsed().as_secs(),
            }));
        }
        entries.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        ok_result(json!({ "processes": entries }))
    }

    async fn kill_background(&self, id: &str) -> String {
        let proc = self.procs.lock().unwrap().remove(id);
        match proc {
            Some(mut p) => {
                let _ = p.child.kill().await;
                ok_result(json!({ "killed": id }))
            }
            None => err_result(format!("no such background process: {id}")),
        }
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        "command"
    }

    fn description(&self) -> &str {
        "Execute shell commands.\n\
         action=run: run in the foreground and return stdout/stderr/exitCode.\n\
         action=spawn: start a background process and return its id.\n\
         action=list: list tracked background processes.\n\
         action=kill: terminate a background process by id.\n\
         Foreground output is capped at ~20 KB, keeping the first and last 100 lines.\n\
         Prefer non-interactive commands; avoid commands that require a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["run", "spawn", "list", "kill"],
                    "description": "What to do"
                },
                "command": {
                    "type": "string",
                    "description": "Shell command (required for run/spawn)"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Foreground timeout in seconds (optional)"
                },
                "id": {
                    "type": "string",
                    "description": "Background process id (required for kill)"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args_json: &str) -> String {
        let args = match parse_args(args_json) {
            Ok(a) => a,
            Err(e) => return err_result(e),
        };
        let action = match required_str(&args, "action") {
            Ok(a) => a.to_string(),
            Err(e) => return err_result(e),
        };

        debug!(action = %action, "command tool");

        match action.as_str() {
            "run" | "spawn" => {
                let command = match required_str(&args, "command") {
                    Ok(c) => c.to_string(),
                    Err(e) => return err_result(e),
                };
                if let Some(pattern) = find_destructive(&command) {
                    return err_result(format!("refusing to run command containing '{pattern}'"));
                }
                let workdir = args.get("workdir").and_then(|v| v.as_str());
                if action == "run" {
                    let timeout = args
                        .get("timeout_secs")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(self.default_timeout_secs);
                    self.run_foreground(&command, workdir, timeout).await
                } else {
                    self.spawn_background(&command, workdir)
                }
            }
            "list" => self.list_background(),
            "kill" => match required_str(&args, "id") {
                Ok(id) => self.kill_background(id).await,
                Err(e) => err_result(e),
            },
            other => err_result(format!("unknown action: {other}")),
        }
    }
}

/// Truncate `s` to fit within `OUTPUT_LIMIT_BYTES`.
///
/// When truncation is needed the first `HEAD_LINES` and last `TAIL_LINES` are
/// kept verbatim, with an omission marker in the middle showing how many
/// lines and bytes were dropped.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        // Few but very long lines: fall back to byte-level head + tail.
        let mut head_end = OUTPUT_LIMIT_BYTES / 2;
        while !s.is_char_boundary(head_end) {
            head_end -= 1;
        }
        let mut tail_start = s.len() - OUTPUT_LIMIT_BYTES / 2;
        while !s.is_char_boundary(tail_start) {
            tail_start += 1;
        }
        let omitted = tail_start - head_end;
        return format!(
            "{}\n...[{} bytes omitted]...\n{}",
            &s[..head_end],
            omitted,
            &s[tail_start..]
        );
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());

    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
