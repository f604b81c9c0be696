// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use craft_config::{ContextConfig, SystemMessageHandling, TruncationStrategy};
use craft_model::{Message, Role};

use crate::estimate::{total_bytes, total_lines, TokenEstimator};

/// Separator used by the smart_merge system-message policy.
const SMART_MERGE_SEPARATOR: &str = "\n\n---\n\n";

/// Keywords that raise a message's importance score.
const IMPORTANCE_KEYWORDS: &[&str] = &[
    "error", "bug", "fix", "important", "warning", "config", "setup",
];

/// What one truncation pass did, for the pipeline's stats report.
#[derive(Debug, Clone, Default)]
pub struct TruncationReport {
    pub input_messages: usize,
    pub output_messages: usize,
    pub reasons: Vec<String>,
}

impl TruncationReport {
    fn note(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }
}

/// Apply the configured strategy.  All strategies are deterministic given
/// identical inputs and configuration, and emit messages in original order.
pub fn truncate(
    messages: Vec<Message>,
    cfg: &ContextConfig,
    est: &TokenEstimator,
) -> (Vec<Message>, TruncationReport) {
    let mut report = TruncationReport {
        input_messages: messages.len(),
        ..Default::default()
    };
    let out = match cfg.truncation_strategy {
        TruncationStrategy::SimpleSlidingWindow => {
            simple_sliding_window(messages, cfg, &mut report)
        }
        TruncationStrategy::SmartSlidingWindow => {
            smart_sliding_window(messages, cfg, est, &mut report)
        }
        TruncationStrategy::ImportanceBased => importance_based(messages, cfg, est, &mut report),
    };
    report.output_messages = out.len();
    (out, report)
}

// ─── simple_sliding_window ────────────────────────────────────────────────────

/// Keep all system messages plus the last K non-system messages, where K is
/// the message budget left after systems, never below `min_recent_messages`.
/// Token/byte/line limits are not re-checked.
fn simple_sliding_window(
    messages: Vec<Message>,
    cfg: &ContextConfig,
    report: &mut TruncationReport,
) -> Vec<Message> {
    let system_count = messages.iter().filter(|m| m.role == Role::System).count();
    let non_system_count = messages.len() - system_count;
    let budget = cfg.max_messages.saturating_sub(system_count);
    let k = budget.max(cfg.min_recent_messages).min(non_system_count);

    if non_system_count > k {
        report.note(format!(
            "simple window dropped {} oldest messages",
            non_system_count - k
        ));
    }

    let mut to_skip = non_system_count - k;
    messages
        .into_iter()
        .filter(|m| {
            if m.role == Role::System {
                true
            } else if to_skip > 0 {
                to_skip -= 1;
                false
            } else {
                true
            }
        })
        .collect()
}

// ─── smart_sliding_window ─────────────────────────────────────────────────────

/// Apply the system-message policy, fill the remaining message budget with
/// the most recent non-system messages, then shed the oldest ones until the
/// token limit fits — never going below `min_recent_messages`.
fn smart_sliding_window(
    messages: Vec<Message>,
    cfg: &ContextConfig,
    est: &TokenEstimator,
    report: &mut TruncationReport,
) -> Vec<Message> {
    let (systems, non_system): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    let systems = apply_system_handling(systems, cfg.system_message_handling);

    let budget = cfg.max_messages.saturating_sub(systems.len());
    let k = budget.min(non_system.len());
    if non_system.len() > k {
        report.note(format!(
            "smart window dropped {} oldest messages over message cap",
            non_system.len() - k
        ));
    }
    let mut recent: Vec<Message> = non_system[non_system.len() - k..].to_vec();

    // Token gate: shed oldest until the estimate fits or the floor is reached.
    let mut dropped_for_tokens = 0usize;
    loop {
        let mut all: Vec<Message> = systems.clone();
        all.extend(recent.iter().cloned());
        if est.estimate_messages(&all) <= cfg.max_tokens || recent.len() <= cfg.min_recent_messages
        {
            if dropped_for_tokens > 0 {
                report.note(format!(
                    "smart window dropped {dropped_for_tokens} messages over token cap"
                ));
            }
            return all;
        }
        recent.remove(0);
        dropped_for_tokens += 1;
    }
}

/// Reduce multiple system messages according to policy.
fn apply_system_handling(systems: Vec<Message>, policy: SystemMessageHandling) -> Vec<Message> {
    if systems.len() <= 1 {
        return systems;
    }
    match policy {
        SystemMessageHandling::AlwaysKeep => systems,
        SystemMessageHandling::LatestOnly => vec![systems.into_iter().next_back().unwrap()],
        SystemMessageHandling::SmartMerge => {
            let merged = systems
                .iter()
                .map(|m| m.content_text())
                .collect::<Vec<_>>()
                .join(SMART_MERGE_SEPARATOR);
            vec![Message::system(merged)]
        }
    }
}

// ─── importance_based ─────────────────────────────────────────────────────────

/// Score every message in [0, 1] and greedily keep the highest-scoring ones
/// within the message and token caps.  Ties prefer the newer message.
fn importance_based(
    messages: Vec<Message>,
    cfg: &ContextConfig,
    est: &TokenEstimator,
    report: &mut TruncationReport,
) -> Vec<Message> {
    let total = messages.len();
    let mut ranked: Vec<(usize, f64)> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (i, score_message(m, i, total)))
        .collect();
    // Descending score; newer (higher index) first on equal score.
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.0.cmp(&a.0))
    });

    let mut selected: Vec<usize> = Vec::new();
    let mut tokens = 0usize;
    for (idx, _score) in ranked {
        if selected.len() + 1 > cfg.max_messages {
            report.note("importance selection stopped at message cap".to_string());
            break;
        }
        let cost = est.estimate_message(&messages[idx]);
        if tokens + cost > cfg.max_tokens {
            report.note("importance selection stopped at token cap".to_string());
            break;
        }
        tokens += cost;
        selected.push(idx);
    }
    selected.sort_unstable();

    if selected.len() < total {
        report.note(format!(
            "importance selection kept {} of {total} messages",
            selected.len()
        ));
    }
    let mut keep = selected.into_iter().peekable();
    messages
        .into_iter()
        .enumerate()
        .filter_map(|(i, m)| {
            if keep.peek() == Some(&i) {
                keep.next();
                Some(m)
            } else {
                None
            }
        })
        .collect()
}

/// Importance score in [0, 1]: base 0.5 (system messages pin to 1.0),
/// keyword bonus up to +0.3, recency bonus up to +0.3, length bonus ±0.1.
fn score_message(msg: &Message, index: usize, total: usize) -> f64 {
    if msg.role == Role::System {
        return 1.0;
    }
    let text = msg.content_text();
    let lowered = text.to_lowercase();

    let mut score = 0.5;

    let keyword_hits = IMPORTANCE_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(**k))
        .count();
    score += (keyword_hits as f64 * 0.1).min(0.3);

    if total > 0 {
        score += 0.3 * (index as f64 / total as f64);
    }

    let len = text.chars().count();
    if (100..=500).contains(&len) {
        score += 0.1;
    } else if len > 1000 {
        score -= 0.1;
    }

    score.clamp(0.0, 1.0)
}

// ─── Hard-cap enforcement (shared final pass) ─────────────────────────────────

/// Drop the oldest non-system messages (never the final message) until the
/// list satisfies every configured cap.  Used by the pipeline after the
/// strategy pass so byte/line limits hold for every returned list.
pub fn enforce_limits(
    mut messages: Vec<Message>,
    cfg: &ContextConfig,
    est: &TokenEstimator,
) -> (Vec<Message>, Vec<String>) {
    let mut reasons = Vec::new();
    let mut dropped = 0usize;
    loop {
        let over = messages.len() > cfg.max_messages
            || est.estimate_messages(&messages) > cfg.max_tokens
            || total_bytes(&messages) > cfg.max_bytes
            || total_lines(&messages) > cfg.max_lines;
        if !over {
            break;
        }
        // Oldest droppable message: not system, not the final message.
        let victim = messages
            .iter()
            .enumerate()
            .find(|(i, m)| m.role != Role::System && *i + 1 != messages.len())
            .map(|(i, _)| i);
        match victim {
            Some(i) => {
                messages.remove(i);
                dropped += 1;
            }
            // Only system messages and the final message remain; the mandatory
            // tail is never dropped even when it alone exceeds a cap.
            None => break,
        }
    }
    if dropped > 0 {
        reasons.push(format!("hard caps dropped {dropped} additional messages"));
    }
    (messages, reasons)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
