// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::store::{SessionStore, StoreError};

/// Length at or above which an input is treated as a full session id.
const FULL_ID_LEN: usize = 32;

/// Minimum input length for fuzzy title matching.
const TITLE_MATCH_MIN: usize = 3;

/// Resolve user input to a full session id.
///
/// - Inputs of 32+ characters are treated as full ids and verified.
/// - Shorter inputs are matched (1) as an id prefix, then (2) as a
///   case-insensitive title substring when longer than 2 characters.
/// - The first match in updated-at descending order wins; `None` otherwise.
pub fn resolve(store: &SessionStore, input: &str) -> Result<Option<String>, StoreError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    if input.len() >= FULL_ID_LEN {
        return Ok(if store.session_exists(input) {
            Some(input.to_string())
        } else {
            None
        });
    }

    let entries = store.list_sessions()?;

    if let Some(hit) = entries.iter().find(|e| e.id.starts_with(input)) {
        return Ok(Some(hit.id.clone()));
    }

    if input.len() >= TITLE_MATCH_MIN {
        let needle = input.to_lowercase();
        if let Some(hit) = entries
            .iter()
            .find(|e| e.meta.title.to_lowercase().contains(&needle))
        {
            return Ok(Some(hit.id.clone()));
        }
    }

    Ok(None)
}

/// Select the session to attach to at startup:
/// (1) the last-session pointer when it still exists, (2) the most recently
/// updated session, (3) `None` — the caller creates a fresh one.
pub fn startup_session(store: &SessionStore) -> Result<Option<String>, StoreError> {
    if let Some(last) = store.last_session() {
        if store.session_exists(&last) {
            return Ok(Some(last));
        }
    }
    Ok(store.list_sessions()?.first().map(|e| e.id.clone()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
