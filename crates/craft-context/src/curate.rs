// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use craft_model::Role;
use craft_store::TurnRecord;
use tracing::debug;

/// Minimum trimmed content length for a valid assistant response.
const MIN_RESPONSE_CHARS: usize = 5;

/// Fraction of token positions one repeated token may occupy before the
/// response is classified as pathological repetition.
const REPETITION_RATIO: f64 = 0.3;

/// Minimum whitespace-separated token count before the repetition check runs.
const REPETITION_MIN_TOKENS: usize = 10;

/// Failure markers (matched case-insensitively) that mark an assistant
/// response as a failed generation.
const FAILURE_MARKERS: &[&str] = &[
    "[error]",
    "failed",
    "❌",
    "错误",
    "失败",
    "无法完成",
    "error:",
    "exception:",
    "failed to",
    "unable to",
    "cannot process",
];

/// In-progress markers: the backend streamed a placeholder instead of a
/// finished response.
const IN_PROGRESS_MARKERS: &[&str] = &[
    "processing...",
    "thinking...",
    "loading...",
    "正在处理",
    "请稍等",
    "正在生成",
];

/// Structured reason an assistant response was classified invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidResponse {
    TooShort,
    FailureMarker(String),
    InProgressMarker(String),
    MalformedJson,
    Repetition,
}

impl std::fmt::Display for InvalidResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidResponse::TooShort => write!(f, "empty or too short"),
            InvalidResponse::FailureMarker(m) => write!(f, "failure marker: {m}"),
            InvalidResponse::InProgressMarker(m) => write!(f, "in-progress marker: {m}"),
            InvalidResponse::MalformedJson => write!(f, "malformed JSON body"),
            InvalidResponse::Repetition => write!(f, "pathological repetition"),
        }
    }
}

/// Classify one assistant response.  `Ok(())` means the response is usable.
pub fn validate_response(content: &str) -> Result<(), InvalidResponse> {
    let trimmed = content.trim();
    if trimmed.chars().count() < MIN_RESPONSE_CHARS {
        return Err(InvalidResponse::TooShort);
    }

    let lowered = trimmed.to_lowercase();
    for marker in FAILURE_MARKERS {
        if lowered.contains(marker) {
            return Err(InvalidResponse::FailureMarker((*marker).to_string()));
        }
    }
    for marker in IN_PROGRESS_MARKERS {
        if lowered.contains(marker) {
            return Err(InvalidResponse::InProgressMarker((*marker).to_string()));
        }
    }

    // A response that opens as JSON must parse as JSON.
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
    {
        return Err(InvalidResponse::MalformedJson);
    }

    // Pathological repetition: one token >2 chars occupying >30% of positions.
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() >= REPETITION_MIN_TOKENS {
        let mut counts = std::collections::HashMap::new();
        for t in &tokens {
            if t.chars().count() > 2 {
                *counts.entry(*t).or_insert(0usize) += 1;
            }
        }
        let limit = (tokens.len() as f64 * REPETITION_RATIO) as usize;
        if counts.values().any(|&c| c > limit) {
            return Err(InvalidResponse::Repetition);
        }
    }

    Ok(())
}

/// Statistics from one curation pass.
#[derive(Debug, Clone, Default)]
pub struct CurationStats {
    pub original_turns: usize,
    pub kept_turns: usize,
    pub dropped_rounds: usize,
    /// One reason string per dropped round, for logging.
    pub reasons: Vec<String>,
}

/// Drop failed rounds from a turn sequence.
///
/// A round is a user turn plus the assistant turns that follow it before the
/// next user turn.  The round is dropped — including its user turn — when it
/// contains at least one assistant turn and **every** assistant turn in it is
/// invalid.  System and tool turns pass through unchanged, and a trailing
/// user turn with no response yet is always kept.
///
/// Curation is idempotent: a curated sequence passes through unchanged.
pub fn curate(turns: &[TurnRecord]) -> (Vec<TurnRecord>, CurationStats) {
    let mut stats = CurationStats {
        original_turns: turns.len(),
        ..Default::default()
    };
    let mut kept: Vec<TurnRecord> = Vec::with_capacity(turns.len());

    let mut i = 0;
    while i < turns.len() {
        let turn = &turns[i];
        if turn.role() != Role::User {
            // Leading assistant/system/tool turns outside any round.
            kept.push(turn.clone());
            i += 1;
            continue;
        }

        // Collect the round: everything up to (not including) the next user turn.
        let mut j = i + 1;
        while j < turns.len() && turns[j].role() != Role::User {
            j += 1;
        }
        let round = &turns[i..j];
        let assistant_verdicts: Vec<Result<(), InvalidResponse>> = round
            .iter()
            .filter(|t| t.role() == Role::Assistant)
            .map(|t| validate_response(t.content()))
            .collect();

        let drop_round =
            !assistant_verdicts.is_empty() && assistant_verdicts.iter().all(|v| v.is_err());

        if drop_round {
            stats.dropped_rounds += 1;
            let reason = assistant_verdicts
                .iter()
                .filter_map(|v| v.as_ref().err())
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            debug!(reason = %reason, "curating failed round");
            stats.reasons.push(reason);
            // User and assistant turns go; system/tool turns pass through.
            for t in round {
                if !matches!(t.role(), Role::User | Role::Assistant) {
                    kept.push(t.clone());
                }
            }
        } else {
            kept.extend(round.iter().cloned());
        }
        i = j;
    }

    stats.kept_turns = kept.len();
    (kept, stats)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
