// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use craft_store::TurnRecord;
use tracing::warn;

use crate::estimate::TokenEstimator;

/// Prefix carried by every synthetic summary turn so downstream detection
/// (rebuild strategy selection, UIs) is a plain `starts_with` check.
pub const SUMMARY_MARKER: &str = "[对话摘要]";

/// Fixed instruction wrapped around the transcript.  Demands structured
/// Chinese bullet output so summaries stay compact and information-dense.
const SUMMARIZE_PROMPT: &str = "\
你是一个对话压缩助手。请将下面的对话历史压缩成一份结构化的中文摘要，要求：
- 使用分条列点的形式；
- 完整保留技术细节：文件名、函数名、命令、错误信息、代码片段；
- 记录已经做出的每个决定及其原因；
- 单独列出尚未解决的问题和未完成的任务；
- 不要添加原对话中不存在的信息。

对话历史：";

/// Injected summarization capability.  The engine adapts its model provider
/// to this trait; tests supply canned implementations.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Result of one compression attempt.
#[derive(Debug)]
pub struct Compression {
    pub compressed: bool,
    /// The synthetic assistant turn standing in for the consumed range.
    /// `None` when compression did not fire or failed.
    pub summary: Option<TurnRecord>,
    pub original_tokens: usize,
    pub summary_tokens: usize,
}

impl Compression {
    fn skipped(original_tokens: usize) -> Self {
        Self {
            compressed: false,
            summary: None,
            original_tokens,
            summary_tokens: 0,
        }
    }
}

/// Compress a turn range into a single summary turn.
///
/// Fires when `force` is set or `current_tokens` reaches
/// `threshold × token_limit`.  On any summarizer failure (error or empty
/// reply) the result is `compressed: false` and the caller falls back to
/// truncation.  The consumed range remains in the store — the summary turn
/// only stands in for it at prompt time.
pub async fn compress(
    turns: &[TurnRecord],
    summarizer: &dyn Summarizer,
    estimator: &TokenEstimator,
    token_limit: usize,
    current_tokens: usize,
    threshold: f32,
    force: bool,
) -> Compression {
    let trigger = (token_limit as f32 * threshold) as usize;
    if turns.is_empty() || (!force && current_tokens < trigger) {
        return Compression::skipped(current_tokens);
    }

    let prompt = format!("{SUMMARIZE_PROMPT}\n\n{}", transcript(turns));
    let reply = match summarizer.summarize(&prompt).await {
        Ok(r) => r,
        Err(e) => {
            warn!("summarizer call failed, falling back to truncation: {e}");
            return Compression::skipped(current_tokens);
        }
    };
    let reply = reply.trim();
    if reply.is_empty() {
        warn!("summarizer returned an empty reply, falling back to truncation");
        return Compression::skipped(current_tokens);
    }

    let session_id = turns[0].session_id.clone();
    let cwd = turns[0].cwd.clone();
    let summary =
        TurnRecord::assistant(&session_id, format!("{SUMMARY_MARKER} {reply}"), &cwd).internal();
    let summary_tokens = estimator.estimate_turns(std::slice::from_ref(&summary));

    Compression {
        compressed: true,
        summary: Some(summary),
        original_tokens: current_tokens,
        summary_tokens,
    }
}

/// Serialise turns into a time-ordered transcript for the summarizer prompt.
fn transcript(turns: &[TurnRecord]) -> String {
    turns
        .iter()
        .map(|t| {
            format!(
                "[{}] {}: {}",
                t.timestamp.format("%H:%M:%S"),
                t.role().as_str(),
                t.content()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
