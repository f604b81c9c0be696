// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use craft_config::ContextConfig;
use craft_model::{Message, MessageContent, Role};
use craft_store::TurnRecord;
use tracing::warn;

use crate::{
    curate::{curate, CurationStats},
    estimate::{total_bytes, total_lines, TokenEstimator},
    sensitive::SensitiveFilter,
    summarize::{compress, Summarizer, SUMMARY_MARKER},
    truncate::{enforce_limits, truncate},
};

/// Fraction of the token limit under which a rebuild replays full history.
const REBUILD_FULL_HISTORY_FRACTION: f32 = 0.7;

/// A summary older than this many turns no longer anchors a summary-based
/// rebuild on its own.
const REBUILD_SUMMARY_MIN_AGE: usize = 5;

/// Full history replay is refused once this many turns follow the last summary.
const REBUILD_FULL_HISTORY_MAX_AGE: usize = 20;

/// Optional collaborators for one `optimize` call.
#[derive(Default)]
pub struct OptimizeOptions<'a> {
    pub summarizer: Option<&'a dyn Summarizer>,
    pub token_limit: Option<usize>,
}

/// Statistics reported alongside the optimized message list.
#[derive(Debug, Clone, Default)]
pub struct OptimizeStats {
    pub original_turns: usize,
    pub curated_turns: usize,
    pub final_messages: usize,
    pub filtered: bool,
    pub curated: bool,
    pub compressed: bool,
    pub dropped_rounds: usize,
    /// Pre-truncation size of the assembled message list.
    pub estimated_tokens: usize,
    pub estimated_bytes: usize,
    pub estimated_lines: usize,
    pub truncation_reasons: Vec<String>,
    /// Set when the degraded fallback path produced the result.
    pub fallback: bool,
}

#[derive(Debug)]
pub struct Optimized {
    pub messages: Vec<Message>,
    pub stats: OptimizeStats,
}

/// How to reconstruct the model context when loading an existing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStrategy {
    Auto,
    FullHistory,
    SummaryBased,
    SlidingWindow,
    Hybrid,
}

#[derive(Debug)]
pub struct Rebuilt {
    pub messages: Vec<Message>,
    /// The concrete strategy that produced the messages (never `Auto`).
    pub chosen: RebuildStrategy,
}

/// The multi-stage context pipeline: curation → optional summarization →
/// truncation → redaction ordering per the engine contract.
pub struct ContextPipeline {
    cfg: ContextConfig,
    estimator: TokenEstimator,
    filter: SensitiveFilter,
}

impl ContextPipeline {
    pub fn new(cfg: ContextConfig) -> Self {
        let estimator = TokenEstimator::new(cfg.token_estimation_mode);
        Self {
            cfg,
            estimator,
            filter: SensitiveFilter::default(),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.cfg
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Transform session history + system prompt + the new user message into
    /// a bounded, ordered message list for the model.
    ///
    /// The returned list always ends with the current user message and, when
    /// a system prompt is supplied, starts with exactly one system message.
    /// Every configured limit (messages, tokens, bytes, lines) holds on the
    /// result.  Any internal failure degrades to a minimal recent-history
    /// fallback rather than an error.
    pub async fn optimize(
        &self,
        turns: &[TurnRecord],
        system_prompt: Option<&str>,
        current_user: &str,
        opts: OptimizeOptions<'_>,
    ) -> Optimized {
        match self
            .optimize_inner(turns, system_prompt, current_user, opts)
            .await
        {
            Ok(done) => done,
            Err(e) => {
                warn!("context pipeline failed, using fallback: {e}");
                self.fallback(turns, current_user)
            }
        }
    }

    async fn optimize_inner(
        &self,
        turns: &[TurnRecord],
        system_prompt: Option<&str>,
        current_user: &str,
        opts: OptimizeOptions<'_>,
    ) -> anyhow::Result<Optimized> {
        self.validate_config()?;

        let mut stats = OptimizeStats {
            original_turns: turns.len(),
            ..Default::default()
        };

        // Stage 1: sensitive redaction (a projection; stored turns keep the
        // original content).
        let turns: Vec<TurnRecord> = if self.cfg.enable_sensitive_filtering {
            stats.filtered = true;
            self.filter.filter(turns)
        } else {
            turns.to_vec()
        };

        // Stage 2: curation.
        let (turns, curation): (Vec<TurnRecord>, CurationStats) = if self.cfg.enable_curation {
            stats.curated = true;
            curate(&turns)
        } else {
            let n = turns.len();
            (
                turns,
                CurationStats {
                    original_turns: n,
                    kept_turns: n,
                    ..Default::default()
                },
            )
        };
        stats.curated_turns = curation.kept_turns;
        stats.dropped_rounds = curation.dropped_rounds;

        // Stage 3: summarization compression.
        let turns = match (opts.summarizer, opts.token_limit) {
            (Some(summarizer), Some(limit)) if limit > 0 => {
                let current = self.estimator.estimate_turns(&turns);
                let outcome = compress(
                    &turns,
                    summarizer,
                    &self.estimator,
                    limit,
                    current,
                    self.cfg.compression_threshold,
                    false,
                )
                .await;
                match outcome.summary {
                    Some(summary) if outcome.compressed => {
                        stats.compressed = true;
                        vec![summary]
                    }
                    _ => turns,
                }
            }
            _ => turns,
        };

        // Stage 4: assemble the message list.
        let mut messages: Vec<Message> = Vec::with_capacity(turns.len() + 2);
        if let Some(prompt) = system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(turns.iter().map(turn_to_message));
        messages.push(Message::user(current_user));

        stats.estimated_tokens = self.estimator.estimate_messages(&messages);
        stats.estimated_bytes = total_bytes(&messages);
        stats.estimated_lines = total_lines(&messages);

        // Stage 5: strategy truncation.
        let (messages, report) = truncate(messages, &self.cfg, &self.estimator);
        stats.truncation_reasons = report.reasons;

        // Stage 6: restore the list shape — exactly one intended system
        // message up front, the current user message last.
        let mut messages: Vec<Message> =
            messages.into_iter().filter(|m| m.role != Role::System).collect();
        if messages.last().and_then(|m| m.as_text()) != Some(current_user) {
            messages.push(Message::user(current_user));
        }
        if let Some(prompt) = system_prompt {
            messages.insert(0, Message::system(prompt));
        }

        // Final hard-cap pass so byte/line limits hold as well.
        let (messages, extra_reasons) = enforce_limits(messages, &self.cfg, &self.estimator);
        stats.truncation_reasons.extend(extra_reasons);

        stats.final_messages = messages.len();
        Ok(Optimized { messages, stats })
    }

    /// Degraded result used when a pipeline stage fails: the most recent
    /// turns as messages — system-role turns stripped — plus the current
    /// user message.  No system prompt is attached.
    fn fallback(&self, turns: &[TurnRecord], current_user: &str) -> Optimized {
        let keep = self.cfg.min_recent_messages.min(turns.len());
        let mut messages: Vec<Message> = turns[turns.len() - keep..]
            .iter()
            .map(turn_to_message)
            .filter(|m| m.role != Role::System)
            .collect();
        messages.push(Message::user(current_user));
        let stats = OptimizeStats {
            original_turns: turns.len(),
            final_messages: messages.len(),
            fallback: true,
            ..Default::default()
        };
        Optimized { messages, stats }
    }

    fn validate_config(&self) -> anyhow::Result<()> {
        let t = self.cfg.compression_threshold;
        if !(t > 0.0 && t <= 1.0) {
            anyhow::bail!("compression_threshold {t} outside (0, 1]");
        }
        if self.cfg.max_messages == 0 || self.cfg.max_tokens == 0 {
            anyhow::bail!("message and token limits must be positive");
        }
        Ok(())
    }

    // ── Session rebuild ───────────────────────────────────────────────────────

    /// Reconstruct the model context for a loaded session.
    ///
    /// `Auto` picks: full history when the session is small and no stale
    /// summary exists; summary-based when a summary anchors recent history;
    /// hybrid when a summarizer can compress a long session; sliding window
    /// otherwise.
    pub async fn rebuild(
        &self,
        turns: &[TurnRecord],
        token_limit: usize,
        summarizer: Option<&dyn Summarizer>,
        strategy: RebuildStrategy,
    ) -> Rebuilt {
        let estimated = self.estimator.estimate_turns(turns);
        let last_summary = turns
            .iter()
            .rposition(|t| t.content().starts_with(SUMMARY_MARKER));
        let since_summary = last_summary.map(|i| turns.len() - 1 - i);

        let chosen = match strategy {
            RebuildStrategy::Auto => {
                let small =
                    (estimated as f32) < REBUILD_FULL_HISTORY_FRACTION * token_limit as f32;
                if small && since_summary.map_or(true, |n| n < REBUILD_FULL_HISTORY_MAX_AGE) {
                    RebuildStrategy::FullHistory
                } else if since_summary.is_some_and(|n| n > REBUILD_SUMMARY_MIN_AGE) {
                    RebuildStrategy::SummaryBased
                } else if summarizer.is_some() && !small {
                    RebuildStrategy::Hybrid
                } else {
                    RebuildStrategy::SlidingWindow
                }
            }
            explicit => explicit,
        };

        let messages = match chosen {
            RebuildStrategy::FullHistory => turns.iter().map(turn_to_message).collect(),
            RebuildStrategy::SummaryBased => {
                let start = last_summary.unwrap_or(0);
                turns[start..].iter().map(turn_to_message).collect()
            }
            RebuildStrategy::Hybrid => {
                match self.hybrid_rebuild(turns, token_limit, summarizer).await {
                    Some(msgs) => msgs,
                    None => {
                        // Summarizer unavailable or failed: degrade to the
                        // deterministic window.
                        return Rebuilt {
                            messages: self.sliding_window(turns, token_limit),
                            chosen: RebuildStrategy::SlidingWindow,
                        };
                    }
                }
            }
            RebuildStrategy::SlidingWindow | RebuildStrategy::Auto => {
                self.sliding_window(turns, token_limit)
            }
        };

        Rebuilt { messages, chosen }
    }

    /// Most recent turns that fit the token budget and message cap, oldest
    /// first.
    fn sliding_window(&self, turns: &[TurnRecord], token_limit: usize) -> Vec<Message> {
        let mut picked: Vec<Message> = Vec::new();
        let mut tokens = 0usize;
        for t in turns.iter().rev() {
            let msg = turn_to_message(t);
            let cost = self.estimator.estimate_message(&msg);
            if !picked.is_empty()
                && (tokens + cost > token_limit || picked.len() >= self.cfg.max_messages)
            {
                break;
            }
            tokens += cost;
            picked.push(msg);
        }
        picked.reverse();
        picked
    }

    /// Compress everything but the recent tail into one summary message.
    async fn hybrid_rebuild(
        &self,
        turns: &[TurnRecord],
        token_limit: usize,
        summarizer: Option<&dyn Summarizer>,
    ) -> Option<Vec<Message>> {
        let summarizer = summarizer?;
        let keep = self.cfg.min_recent_messages.min(turns.len());
        let (old, recent) = turns.split_at(turns.len() - keep);
        if old.is_empty() {
            return Some(recent.iter().map(turn_to_message).collect());
        }
        let current = self.estimator.estimate_turns(old);
        let outcome = compress(
            old,
            summarizer,
            &self.estimator,
            token_limit,
            current,
            self.cfg.compression_threshold,
            true,
        )
        .await;
        let summary = outcome.summary?;
        let mut messages = vec![turn_to_message(&summary)];
        messages.extend(recent.iter().map(turn_to_message));
        Some(messages)
    }
}

/// Derive the runtime message for a stored turn.
///
/// Tool-call turns keep their pairing: the call turn's uuid doubles as the
/// call id, and the result turn points back at it through `parentUuid`.
pub fn turn_to_message(t: &TurnRecord) -> Message {
    match (&t.tool_use, t.role()) {
        (Some(tu), Role::Assistant) => {
            Message::tool_call(t.uuid.as_str(), tu.name.as_str(), tu.args.to_string())
        }
        (Some(_), Role::Tool) => Message::tool_result(
            t.parent_uuid.as_deref().unwrap_or(&t.uuid),
            t.content(),
        ),
        _ => Message {
            role: t.role(),
            content: MessageContent::Text(t.content().to_string()),
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use craft_config::TruncationStrategy;

    struct CannedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for CannedSummarizer {
        async fn summarize(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn user(text: &str) -> TurnRecord {
        TurnRecord::user("s", text, "/w")
    }
    fn assistant(text: &str) -> TurnRecord {
        TurnRecord::assistant("s", text, "/w")
    }

    fn pipeline() -> ContextPipeline {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = false;
        ContextPipeline::new(cfg)
    }

    fn pipeline_with(cfg: ContextConfig) -> ContextPipeline {
        ContextPipeline::new(cfg)
    }

    // ── Basic shape ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_history_yields_system_plus_user() {
        let p = {
            let mut cfg = ContextConfig::default();
            cfg.max_messages = 10;
            cfg.truncation_strategy = TruncationStrategy::SmartSlidingWindow;
            cfg.enable_curation = false;
            cfg.enable_sensitive_filtering = false;
            pipeline_with(cfg)
        };
        let out = p
            .optimize(&[], Some("You are helpful."), "Hello", OptimizeOptions::default())
            .await;
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, Role::System);
        assert_eq!(out.messages[0].as_text(), Some("You are helpful."));
        assert_eq!(out.messages[1].role, Role::User);
        assert_eq!(out.messages[1].as_text(), Some("Hello"));
    }

    #[tokio::test]
    async fn without_system_prompt_list_has_no_system() {
        let p = pipeline();
        let out = p.optimize(&[], None, "Hi", OptimizeOptions::default()).await;
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn list_always_ends_with_current_user_message() {
        let p = pipeline();
        let turns = vec![user("a"), assistant("a longer valid reply")];
        let out = p
            .optimize(&turns, Some("sys"), "the current question", OptimizeOptions::default())
            .await;
        assert_eq!(
            out.messages.last().unwrap().as_text(),
            Some("the current question")
        );
        assert_eq!(out.messages[0].role, Role::System);
    }

    // ── Curation stage ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn curation_removes_failed_round_from_prompt() {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = true;
        cfg.enable_sensitive_filtering = false;
        let p = pipeline_with(cfg);
        let turns = vec![
            user("hi"),
            assistant("hello!"),
            user("do X"),
            assistant("❌ ERROR: failed"),
            user("explain JS"),
            assistant("JS is a dynamic scripting language."),
        ];
        let out = p
            .optimize(&turns, Some("sys"), "thanks", OptimizeOptions::default())
            .await;
        let texts: Vec<String> = out.messages.iter().map(|m| m.content_text()).collect();
        assert_eq!(out.stats.dropped_rounds, 1);
        assert_eq!(out.stats.curated_turns, 4);
        assert!(!texts.iter().any(|t| t.contains("do X")));
        assert!(texts.iter().any(|t| t.contains("explain JS")));
        assert_eq!(out.messages.len(), 6); // sys + 4 survivors + current
    }

    // ── Sensitive stage ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn redaction_applies_to_model_projection() {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = true;
        let p = pipeline_with(cfg);
        let turns = vec![user("my api_key: sk-1234567890 and more")];
        let out = p.optimize(&turns, None, "ok", OptimizeOptions::default()).await;
        let text = out.messages[0].content_text();
        assert!(text.contains("[FILTERED]"));
        assert!(!text.contains("sk-1234567890"));
        // The stored turn is untouched.
        assert!(turns[0].content().contains("sk-1234567890"));
    }

    // ── Compression stage ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn over_threshold_history_is_replaced_by_summary() {
        let p = pipeline();
        let turns: Vec<TurnRecord> = (0..30)
            .map(|i| user(&format!("message with plenty of words number {i}")))
            .collect();
        let s = CannedSummarizer("- 历史已压缩");
        let out = p
            .optimize(
                &turns,
                Some("sys"),
                "next",
                OptimizeOptions {
                    summarizer: Some(&s),
                    token_limit: Some(10), // guaranteed over threshold
                },
            )
            .await;
        assert!(out.stats.compressed);
        let texts: Vec<String> = out.messages.iter().map(|m| m.content_text()).collect();
        assert!(texts.iter().any(|t| t.starts_with(SUMMARY_MARKER)));
        // system + summary + current user
        assert_eq!(out.messages.len(), 3);
    }

    #[tokio::test]
    async fn under_threshold_history_is_not_compressed() {
        let p = pipeline();
        let turns = vec![user("short")];
        let s = CannedSummarizer("unused");
        let out = p
            .optimize(
                &turns,
                None,
                "next",
                OptimizeOptions {
                    summarizer: Some(&s),
                    token_limit: Some(1_000_000),
                },
            )
            .await;
        assert!(!out.stats.compressed);
    }

    // ── Limit invariants ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn all_configured_limits_hold_on_output() {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = false;
        cfg.max_messages = 6;
        cfg.max_tokens = 200;
        cfg.max_bytes = 2_000;
        cfg.max_lines = 50;
        cfg.min_recent_messages = 2;
        let p = pipeline_with(cfg.clone());
        let turns: Vec<TurnRecord> = (0..40)
            .map(|i| user(&format!("historical message number {i} with some padding text")))
            .collect();
        let out = p
            .optimize(&turns, Some("sys"), "current", OptimizeOptions::default())
            .await;
        assert!(out.messages.len() <= cfg.max_messages);
        assert!(p.estimator().estimate_messages(&out.messages) <= cfg.max_tokens);
        assert!(total_bytes(&out.messages) <= cfg.max_bytes);
        assert!(total_lines(&out.messages) <= cfg.max_lines);
        assert_eq!(out.messages.last().unwrap().as_text(), Some("current"));
    }

    #[tokio::test]
    async fn oversized_single_user_message_still_yields_nonempty_list() {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = false;
        cfg.max_bytes = 100;
        let p = pipeline_with(cfg);
        let huge = "x".repeat(10_000);
        let out = p.optimize(&[], Some("sys"), &huge, OptimizeOptions::default()).await;
        assert!(!out.messages.is_empty());
        assert_eq!(out.messages.last().unwrap().as_text(), Some(huge.as_str()));
    }

    #[tokio::test]
    async fn stray_system_turns_are_dropped_from_output() {
        let p = pipeline();
        let mut sys_turn = user("ignore");
        sys_turn.message.role = Role::System;
        sys_turn.kind = "system".into();
        sys_turn.message.content = "old embedded system prompt".into();
        let turns = vec![sys_turn, user("question"), assistant("a valid answer here")];
        let out = p
            .optimize(&turns, Some("the real prompt"), "now", OptimizeOptions::default())
            .await;
        let systems: Vec<_> = out
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].as_text(), Some("the real prompt"));
        assert_eq!(out.messages[0].role, Role::System);
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stats_report_counts_and_fired_stages() {
        let mut cfg = ContextConfig::default();
        cfg.enable_curation = true;
        cfg.enable_sensitive_filtering = true;
        let p = pipeline_with(cfg);
        let turns = vec![user("hello there"), assistant("hi, how can I help?")];
        let out = p.optimize(&turns, Some("s"), "q", OptimizeOptions::default()).await;
        assert!(out.stats.filtered);
        assert!(out.stats.curated);
        assert!(!out.stats.compressed);
        assert_eq!(out.stats.original_turns, 2);
        assert_eq!(out.stats.final_messages, out.messages.len());
        assert!(out.stats.estimated_tokens > 0);
        assert!(out.stats.estimated_bytes > 0);
    }

    // ── Fallback ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_config_degrades_to_fallback() {
        let mut cfg = ContextConfig::default();
        cfg.compression_threshold = 0.0; // outside (0, 1]
        cfg.min_recent_messages = 2;
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = false;
        let p = pipeline_with(cfg);
        let turns = vec![user("one"), user("two"), user("three")];
        let out = p.optimize(&turns, Some("sys"), "current", OptimizeOptions::default()).await;
        assert!(out.stats.fallback);
        // last 2 turns + current, no system
        assert_eq!(out.messages.len(), 3);
        assert!(out.messages.iter().all(|m| m.role != Role::System));
        assert_eq!(out.messages.last().unwrap().as_text(), Some("current"));
    }

    #[tokio::test]
    async fn fallback_strips_system_turns_from_the_kept_window() {
        let mut cfg = ContextConfig::default();
        cfg.compression_threshold = 0.0; // force the fallback path
        cfg.min_recent_messages = 3;
        cfg.enable_curation = false;
        cfg.enable_sensitive_filtering = false;
        let p = pipeline_with(cfg);

        // A stray system-role turn inside the recent window, as a log written
        // by another tool could contain.
        let mut sys_turn = user("placeholder");
        sys_turn.message.role = Role::System;
        sys_turn.kind = "system".into();
        sys_turn.message.content = "stray system prompt".into();
        let turns = vec![user("one"), sys_turn, user("two")];

        let out = p
            .optimize(&turns, Some("sys"), "current", OptimizeOptions::default())
            .await;
        assert!(out.stats.fallback);
        assert!(
            out.messages.iter().all(|m| m.role != Role::System),
            "fallback output must carry no system messages"
        );
        let texts: Vec<String> = out.messages.iter().map(|m| m.content_text()).collect();
        assert!(!texts.iter().any(|t| t.contains("stray system prompt")));
        assert_eq!(out.messages.len(), 3); // one, two, current
        assert_eq!(out.messages.last().unwrap().as_text(), Some("current"));
    }

    // ── Tool turn conversion ──────────────────────────────────────────────────

    #[test]
    fn tool_turns_convert_with_pairing() {
        let call = TurnRecord::tool_call("s", "command", serde_json::json!({"a": 1}), "/w");
        let result = TurnRecord::tool_result(
            "s",
            "command",
            serde_json::json!({"a": 1}),
            Ok(r#"{"success":true}"#.into()),
            "/w",
        )
        .with_parent(&call.uuid);

        let call_msg = turn_to_message(&call);
        let result_msg = turn_to_message(&result);
        match (&call_msg.content, &result_msg.content) {
            (
                MessageContent::ToolCall { tool_call_id: call_id, function },
                MessageContent::ToolResult { tool_call_id: result_id, .. },
            ) => {
                assert_eq!(call_id, result_id, "result must pair with its call");
                assert_eq!(function.name, "command");
            }
            other => panic!("unexpected conversion: {other:?}"),
        }
    }

    // ── Rebuild ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rebuild_auto_picks_full_history_for_small_sessions() {
        let p = pipeline();
        let turns = vec![user("a"), assistant("a fine reply")];
        let r = p.rebuild(&turns, 100_000, None, RebuildStrategy::Auto).await;
        assert_eq!(r.chosen, RebuildStrategy::FullHistory);
        assert_eq!(r.messages.len(), 2);
    }

    #[tokio::test]
    async fn rebuild_auto_picks_summary_based_when_summary_anchors_history() {
        let p = pipeline();
        let mut turns = vec![assistant(&format!("{SUMMARY_MARKER} 早前的摘要"))];
        for i in 0..10 {
            // Long turns push the estimate over the full-history threshold.
            turns.push(user(&format!("{} {i}", "long padding text ".repeat(50))));
        }
        let r = p.rebuild(&turns, 100, None, RebuildStrategy::Auto).await;
        assert_eq!(r.chosen, RebuildStrategy::SummaryBased);
        assert!(r.messages[0].content_text().starts_with(SUMMARY_MARKER));
    }

    #[tokio::test]
    async fn rebuild_auto_picks_hybrid_for_long_sessions_with_summarizer() {
        let p = pipeline();
        let turns: Vec<TurnRecord> = (0..30)
            .map(|i| user(&format!("{} {i}", "long padding text ".repeat(30))))
            .collect();
        let s = CannedSummarizer("- 压缩");
        let r = p.rebuild(&turns, 100, Some(&s), RebuildStrategy::Auto).await;
        assert_eq!(r.chosen, RebuildStrategy::Hybrid);
        assert!(r.messages[0].content_text().starts_with(SUMMARY_MARKER));
        assert!(r.messages.len() > 1, "recent tail must follow the summary");
    }

    #[tokio::test]
    async fn rebuild_auto_falls_back_to_sliding_window() {
        let p = pipeline();
        let turns: Vec<TurnRecord> = (0..30)
            .map(|i| user(&format!("{} {i}", "long padding text ".repeat(30))))
            .collect();
        let r = p.rebuild(&turns, 100, None, RebuildStrategy::Auto).await;
        assert_eq!(r.chosen, RebuildStrategy::SlidingWindow);
        assert!(!r.messages.is_empty());
        // Window keeps the newest turns.
        assert!(r
            .messages
            .last()
            .unwrap()
            .content_text()
            .contains("29"));
    }

    #[tokio::test]
    async fn rebuild_explicit_full_history_replays_everything() {
        let p = pipeline();
        let turns: Vec<TurnRecord> = (0..7).map(|i| user(&format!("t{i}"))).collect();
        let r = p.rebuild(&turns, 10, None, RebuildStrategy::FullHistory).await;
        assert_eq!(r.messages.len(), 7);
    }
}
