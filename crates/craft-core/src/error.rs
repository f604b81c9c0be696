// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use craft_store::StoreError;

/// Engine error taxonomy.
///
/// Propagation policy: `Store` failures abort the current round before any
/// further model call; `Model` failures stop the loop (turns already written
/// remain); tool failures never reach this type — they travel back to the
/// model as ordinary structured results; `Limit` stops the loop with a
/// terminal error turn.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("model error: {0}")]
    Model(String),
    #[error("tool dispatch error: {0}")]
    Tool(String),
    #[error("recursion cap of {0} model-tool cycles exceeded")]
    Limit(u32),
    #[error("validation error: {0}")]
    Validation(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
