// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use craft_model::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Origin of a turn: typed by a person or produced by the engine.
pub const USER_TYPE_HUMAN: &str = "external";
pub const USER_TYPE_AGENT: &str = "agent";

/// The message payload carried by a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

/// Metadata attached to tool-call and tool-result turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUse {
    pub name: String,
    /// Parsed JSON argument object as sent to the tool.
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One saved turn in a session log.  Immutable once appended.
///
/// Serialized as a single JSON line; fields this version does not know about
/// are preserved on read through the flattened `extra` map so that logs
/// written by newer versions round-trip losslessly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Wire name for the turn kind; mirrors the message role.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: TurnMessage,
    /// Tool-call metadata, present only on tool-call and tool-result turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUse>,
    /// Engine-written turns (e.g. curated summaries) are flagged so the UI
    /// can hide them; user-visible turns carry `false`.
    pub is_sidechain: bool,
    pub user_type: String,
    /// Working directory at creation time.
    pub cwd: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TurnRecord {
    fn base(session_id: &str, role: Role, content: String, user_type: &str, cwd: &str) -> Self {
        Self {
            uuid: Uuid::new_v4().simple().to_string(),
            parent_uuid: None,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            kind: role.as_str().to_string(),
            message: TurnMessage { role, content },
            tool_use: None,
            is_sidechain: false,
            user_type: user_type.to_string(),
            cwd: cwd.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extra: serde_json::Map::new(),
        }
    }

    /// A turn typed by the user.
    pub fn user(session_id: &str, content: impl Into<String>, cwd: &str) -> Self {
        Self::base(session_id, Role::User, content.into(), USER_TYPE_HUMAN, cwd)
    }

    /// A plain assistant text turn.
    pub fn assistant(session_id: &str, content: impl Into<String>, cwd: &str) -> Self {
        Self::base(
            session_id,
            Role::Assistant,
            content.into(),
            USER_TYPE_AGENT,
            cwd,
        )
    }

    /// An assistant turn requesting a tool invocation.  The structured payload
    /// is serialized into the content string so the log stays greppable.
    pub fn tool_call(session_id: &str, name: &str, args: Value, cwd: &str) -> Self {
        let payload = serde_json::json!({ "tool": name, "args": args });
        let mut turn = Self::base(
            session_id,
            Role::Assistant,
            payload.to_string(),
            USER_TYPE_AGENT,
            cwd,
        );
        turn.tool_use = Some(ToolUse {
            name: name.to_string(),
            args,
            result: None,
            error: None,
        });
        turn
    }

    /// A tool-result turn.  `result` holds the JSON string the tool returned;
    /// `error` is set instead when the dispatcher could not produce one.
    pub fn tool_result(
        session_id: &str,
        name: &str,
        args: Value,
        result: Result<String, String>,
        cwd: &str,
    ) -> Self {
        let content = match &result {
            Ok(r) => r.clone(),
            Err(e) => serde_json::json!({ "success": false, "error": e }).to_string(),
        };
        let mut turn = Self::base(session_id, Role::Tool, content, USER_TYPE_AGENT, cwd);
        turn.tool_use = Some(ToolUse {
            name: name.to_string(),
            args,
            result: result.as_ref().ok().cloned(),
            error: result.err(),
        });
        turn
    }

    /// Link this turn to its predecessor in the round.
    pub fn with_parent(mut self, parent_uuid: &str) -> Self {
        self.parent_uuid = Some(parent_uuid.to_string());
        self
    }

    /// Mark this turn as engine-written (not user-visible history).
    pub fn internal(mut self) -> Self {
        self.is_sidechain = true;
        self
    }

    pub fn role(&self) -> Role {
        self.message.role
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_turn_has_32_char_uuid_and_human_origin() {
        let t = TurnRecord::user("sess", "hello", "/tmp");
        assert_eq!(t.uuid.len(), 32);
        assert_eq!(t.user_type, USER_TYPE_HUMAN);
        assert_eq!(t.role(), Role::User);
        assert!(!t.is_sidechain);
    }

    #[test]
    fn assistant_turn_is_agent_origin() {
        let t = TurnRecord::assistant("sess", "reply", "/tmp");
        assert_eq!(t.user_type, USER_TYPE_AGENT);
        assert_eq!(t.kind, "assistant");
    }

    #[test]
    fn tool_call_turn_carries_name_and_args() {
        let t = TurnRecord::tool_call("sess", "command", json!({"action":"run"}), "/tmp");
        let tu = t.tool_use.as_ref().unwrap();
        assert_eq!(tu.name, "command");
        assert_eq!(tu.args["action"], "run");
        assert!(t.content().contains("command"));
    }

    #[test]
    fn tool_result_turn_records_success_payload() {
        let t = TurnRecord::tool_result(
            "sess",
            "command",
            json!({}),
            Ok(r#"{"success":true}"#.into()),
            "/tmp",
        );
        assert_eq!(t.role(), Role::Tool);
        let tu = t.tool_use.as_ref().unwrap();
        assert!(tu.result.is_some());
        assert!(tu.error.is_none());
    }

    #[test]
    fn tool_result_turn_records_dispatch_error() {
        let t = TurnRecord::tool_result("sess", "nope", json!({}), Err("unknown tool".into()), "/tmp");
        let tu = t.tool_use.as_ref().unwrap();
        assert_eq!(tu.error.as_deref(), Some("unknown tool"));
        assert!(t.content().contains("\"success\":false"));
    }

    #[test]
    fn internal_flag_sets_sidechain() {
        let t = TurnRecord::assistant("sess", "[summary]", "/tmp").internal();
        assert!(t.is_sidechain);
    }

    #[test]
    fn with_parent_links_turns() {
        let a = TurnRecord::user("sess", "hi", "/tmp");
        let b = TurnRecord::assistant("sess", "yo", "/tmp").with_parent(&a.uuid);
        assert_eq!(b.parent_uuid.as_deref(), Some(a.uuid.as_str()));
    }

    // ── Wire format ───────────────────────────────────────────────────────────

    #[test]
    fn serialises_with_camel_case_wire_names() {
        let t = TurnRecord::user("sess-1", "hello", "/work");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["type"], "user");
        assert_eq!(json["isSidechain"], false);
        assert_eq!(json["userType"], "external");
        assert_eq!(json["message"]["role"], "user");
        assert_eq!(json["message"]["content"], "hello");
        assert!(json.get("cwd").is_some());
        assert!(json.get("version").is_some());
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let mut v = serde_json::to_value(TurnRecord::user("s", "x", "/tmp")).unwrap();
        v["futureField"] = json!({"nested": true});
        let parsed: TurnRecord = serde_json::from_value(v).unwrap();
        assert!(parsed.extra.contains_key("futureField"));
        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["futureField"]["nested"], true);
    }

    #[test]
    fn round_trip_preserves_equality() {
        let t = TurnRecord::tool_call("s", "file_manager", json!({"operation":"list"}), "/w");
        let line = serde_json::to_string(&t).unwrap();
        let back: TurnRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, t);
    }
}
