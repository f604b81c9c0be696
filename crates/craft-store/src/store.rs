// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use craft_model::Role;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::turn::TurnRecord;

/// Maximum characters of the first user message kept as the session title.
pub const TITLE_MAX_CHARS: usize = 50;

const INDEX_FILE: &str = "index.json";
const LAST_SESSION_FILE: &str = "lastsession";
const SESSION_EXT: &str = "jsonl";

/// Typed session-store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt session log {path} at line {line}: {source}")]
    Corrupt {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
    #[error("unknown session: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-session metadata kept in the index for fast listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub message_count: usize,
}

/// One row of `list_sessions()`: the metadata plus its owning id.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: String,
    pub meta: SessionMeta,
}

/// Durable per-session append log plus metadata index.
///
/// Layout under the state directory:
/// ```text
/// .bytecraft/
///   sessions/<id>.jsonl    one JSON line per turn, append-only
///   index.json             id → {title, created, updated, messageCount}
///   lastsession            one session id, plain text
/// ```
///
/// A single engine instance owns its active session; cross-process use is
/// not supported.  Within the process, appends to one session are serialized
/// by a per-session lock.
pub struct SessionStore {
    sessions_dir: PathBuf,
    index_path: PathBuf,
    last_path: PathBuf,
    /// Per-session append locks, created on first use.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let sessions_dir = state_dir.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(Self {
            sessions_dir,
            index_path: state_dir.join(INDEX_FILE),
            last_path: state_dir.join(LAST_SESSION_FILE),
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.{SESSION_EXT}"))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(id.to_string()).or_default().clone()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Create a new empty session and register it in the index.
    pub fn create_session(&self) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        File::create(self.session_path(&id))?;
        let now = Utc::now();
        self.update_index(|index| {
            index.insert(
                id.clone(),
                SessionMeta {
                    title: String::new(),
                    created: now,
                    updated: now,
                    message_count: 0,
                },
            );
        })?;
        debug!(session = %id, "created session");
        Ok(id)
    }

    /// Append one turn.  Atomic per turn: the line is written and flushed
    /// before the index is touched; an index failure is tolerated (the next
    /// listing falls back to scanning the logs).
    pub fn append_turn(&self, id: &str, turn: &TurnRecord) -> Result<(), StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().unwrap();

        let path = self.session_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let line = serde_json::to_string(turn)?;
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        // Best-effort durability; an fsync failure must not lose the append.
        let _ = file.sync_data();

        if let Err(e) = self.update_index(|index| {
            let entry = index.entry(id.to_string()).or_insert_with(|| SessionMeta {
                title: String::new(),
                created: turn.timestamp,
                updated: turn.timestamp,
                message_count: 0,
            });
            entry.message_count += 1;
            entry.updated = Utc::now();
        }) {
            warn!(session = %id, error = %e, "index update failed; listing will rescan");
        }
        Ok(())
    }

    /// Load the ordered turn sequence of a session.
    ///
    /// A corrupted **final** line (e.g. a crash mid-append) is skipped with a
    /// warning; corruption anywhere else is an error.
    pub fn load_turns(&self, id: &str) -> Result<Vec<TurnRecord>, StoreError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let mut turns = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<TurnRecord>(line) {
                Ok(t) => turns.push(t),
                Err(e) if i + 1 == lines.len() => {
                    warn!(session = %id, line = i + 1, "skipping corrupt trailing line: {e}");
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path: path.display().to_string(),
                        line: i + 1,
                        source: e,
                    });
                }
            }
        }
        Ok(turns)
    }

    /// Delete a session log and its index entry.  Missing sessions are a no-op.
    pub fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let path = self.session_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.update_index(|index| {
            index.remove(id);
        })?;
        self.locks.lock().unwrap().remove(id);
        Ok(())
    }

    /// Set the session title, truncated to [`TITLE_MAX_CHARS`].
    pub fn update_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let title = truncate_title(title);
        self.update_index(|index| {
            if let Some(meta) = index.get_mut(id) {
                meta.title = title.clone();
            }
        })
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    /// List sessions ordered by updated-at descending.  Falls back to a full
    /// log scan when the index is missing or unreadable.
    pub fn list_sessions(&self) -> Result<Vec<SessionEntry>, StoreError> {
        let index = match self.load_index() {
            Ok(Some(index)) => index,
            Ok(None) | Err(_) => {
                warn!("session index missing or stale; rebuilding from logs");
                self.rebuild_index()?
            }
        };
        let mut entries: Vec<SessionEntry> = index
            .into_iter()
            .map(|(id, meta)| SessionEntry { id, meta })
            .collect();
        entries.sort_by(|a, b| b.meta.updated.cmp(&a.meta.updated));
        Ok(entries)
    }

    /// Reconstruct the metadata index by scanning every session log, then
    /// persist it.  Used at recovery time and when the index drifts.
    pub fn rebuild_index(&self) -> Result<HashMap<String, SessionMeta>, StoreError> {
        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|x| x == SESSION_EXT) != Some(true) {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let turns = match self.load_turns(&id) {
                Ok(t) => t,
                Err(e) => {
                    warn!(session = %id, "skipping unreadable log during rebuild: {e}");
                    continue;
                }
            };
            let title = turns
                .iter()
                .find(|t| t.role() == Role::User && !t.content().trim().is_empty())
                .map(|t| truncate_title(t.content()))
                .unwrap_or_default();
            let created = turns.first().map(|t| t.timestamp).unwrap_or_else(Utc::now);
            let updated = turns.last().map(|t| t.timestamp).unwrap_or(created);
            index.insert(
                id,
                SessionMeta {
                    title,
                    created,
                    updated,
                    message_count: turns.len(),
                },
            );
        }
        self.save_index(&index)?;
        Ok(index)
    }

    // ── Last-session pointer ──────────────────────────────────────────────────

    pub fn set_last_session(&self, id: &str) -> Result<(), StoreError> {
        std::fs::write(&self.last_path, id)?;
        Ok(())
    }

    /// The most recently active session id, if recorded.  The pointer may be
    /// stale (e.g. the session was deleted); callers verify existence.
    pub fn last_session(&self) -> Option<String> {
        let id = std::fs::read_to_string(&self.last_path).ok()?;
        let id = id.trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// True when a log file exists for `id`.
    pub fn session_exists(&self, id: &str) -> bool {
        self.session_path(id).exists()
    }

    // ── Index persistence ─────────────────────────────────────────────────────

    fn load_index(&self) -> Result<Option<HashMap<String, SessionMeta>>, StoreError> {
        if !self.index_path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.index_path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save_index(&self, index: &HashMap<String, SessionMeta>) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(index)?;
        std::fs::write(&self.index_path, text)?;
        Ok(())
    }

    fn update_index<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut HashMap<String, SessionMeta>),
    {
        let mut index = match self.load_index() {
            Ok(Some(index)) => index,
            // Missing or unreadable index: rebuild from logs so the mutation
            // applies on top of accurate state.
            Ok(None) | Err(_) => self.rebuild_index()?,
        };
        mutate(&mut index);
        self.save_index(&index)
    }
}

fn truncate_title(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= TITLE_MAX_CHARS {
        return s.to_string();
    }
    s.chars().take(TITLE_MAX_CHARS).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
