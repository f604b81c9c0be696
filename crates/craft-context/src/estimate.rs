// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use craft_config::TokenEstimationMode;
use craft_model::Message;
use craft_store::TurnRecord;

/// Language-aware token estimator.
///
/// Token counts are estimates, never exact.  The estimator never fails: any
/// content is reduced to a flat string before counting.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    mode: TokenEstimationMode,
}

/// Per-message framing overhead (role tag + separators) in enhanced mode.
const FRAMING_TOKENS: usize = 4;

impl TokenEstimator {
    pub fn new(mode: TokenEstimationMode) -> Self {
        Self { mode }
    }

    /// Estimate tokens for a raw text fragment, without message framing.
    pub fn estimate_text(&self, text: &str) -> usize {
        match self.mode {
            TokenEstimationMode::Simple => {
                let chars = text.chars().count();
                chars.div_ceil(3)
            }
            // Precise tokenization is deferred to a future BPE integration;
            // it currently behaves exactly like enhanced.
            TokenEstimationMode::Enhanced | TokenEstimationMode::Precise => {
                let mut cjk = 0usize;
                let mut latin = 0usize;
                let mut other = 0usize;
                for c in text.chars() {
                    if is_cjk(c) {
                        cjk += 1;
                    } else if c.is_ascii_alphabetic() {
                        latin += 1;
                    } else {
                        other += 1;
                    }
                }
                ceil_div_ratio(cjk, 1.5) + ceil_div_ratio(latin, 0.75) + other.div_ceil(2)
            }
        }
    }

    /// Estimate tokens for one message, including framing in enhanced mode.
    pub fn estimate_message(&self, msg: &Message) -> usize {
        let content = self.estimate_text(&msg.content_text());
        match self.mode {
            TokenEstimationMode::Simple => content,
            TokenEstimationMode::Enhanced | TokenEstimationMode::Precise => {
                FRAMING_TOKENS + content
            }
        }
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Estimate tokens for stored turns; the turn content string stands in for
    /// the message it will become.
    pub fn estimate_turns(&self, turns: &[TurnRecord]) -> usize {
        turns
            .iter()
            .map(|t| match self.mode {
                TokenEstimationMode::Simple => self.estimate_text(t.content()),
                _ => FRAMING_TOKENS + self.estimate_text(t.content()),
            })
            .sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(TokenEstimationMode::Enhanced)
    }
}

fn ceil_div_ratio(count: usize, per_token: f64) -> usize {
    (count as f64 / per_token).ceil() as usize
}

/// CJK detection for the enhanced estimator: unified ideographs (plus
/// extension A and compatibility blocks), kana, and hangul syllables.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF  // CJK unified ideographs
        | 0xF900..=0xFAFF  // CJK compatibility ideographs
        | 0x3040..=0x30FF  // hiragana + katakana
        | 0xAC00..=0xD7AF  // hangul syllables
    )
}

// ─── Size helpers used by the pipeline's hard caps ───────────────────────────

/// Total UTF-8 bytes of all message content.
pub fn total_bytes(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content_text().len()).sum()
}

/// Total newline-separated lines across all message content.
pub fn total_lines(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.content_text().lines().count().max(1))
        .sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
