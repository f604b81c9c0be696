// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use crate::error::EngineError;

/// Streaming callbacks invoked synchronously from the agent loop.
///
/// Consumers (UI, test harness) implement the methods they care about; the
/// defaults are no-ops.  Implementations wanting async fan-out wrap the sink
/// themselves.  Token emissions are best-effort and may be coalesced.
pub trait EventSink: Send + Sync {
    fn on_token(&self, _delta: &str) {}
    fn on_tool_call(&self, _name: &str, _args: &serde_json::Value) {}
    fn on_tool_result(&self, _name: &str, _result: &str) {}
    fn on_complete(&self, _final_text: &str) {}
    fn on_error(&self, _err: &EngineError) {}
}

/// Sink that discards every event.
pub struct NullSink;

impl EventSink for NullSink {}

/// One recorded sink event, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Token(String),
    ToolCall { name: String, args: serde_json::Value },
    ToolResult { name: String, result: String },
    Complete(String),
    Error(String),
}

/// Sink that records every event in order.  Test helper.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Concatenation of all token deltas, in emission order.
    pub fn streamed_text(&self) -> String {
        self.events()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Error(_)))
            .count()
    }
}

impl EventSink for CollectingSink {
    fn on_token(&self, delta: &str) {
        self.events.lock().unwrap().push(SinkEvent::Token(delta.into()));
    }
    fn on_tool_call(&self, name: &str, args: &serde_json::Value) {
        self.events.lock().unwrap().push(SinkEvent::ToolCall {
            name: name.into(),
            args: args.clone(),
        });
    }
    fn on_tool_result(&self, name: &str, result: &str) {
        self.events.lock().unwrap().push(SinkEvent::ToolResult {
            name: name.into(),
            result: result.into(),
        });
    }
    fn on_complete(&self, final_text: &str) {
        self.events.lock().unwrap().push(SinkEvent::Complete(final_text.into()));
    }
    fn on_error(&self, err: &EngineError) {
        self.events.lock().unwrap().push(SinkEvent::Error(err.to_string()));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_all_events() {
        let sink = NullSink;
        sink.on_token("x");
        sink.on_complete("done");
        sink.on_error(&EngineError::Model("m".into()));
    }

    #[test]
    fn collecting_sink_records_in_order() {
        let sink = CollectingSink::new();
        sink.on_token("he");
        sink.on_token("llo");
        sink.on_complete("hello");
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(sink.streamed_text(), "hello");
        assert!(matches!(events.last(), Some(SinkEvent::Complete(t)) if t == "hello"));
    }

    #[test]
    fn error_count_counts_only_errors() {
        let sink = CollectingSink::new();
        sink.on_token("t");
        sink.on_error(&EngineError::Limit(25));
        assert_eq!(sink.error_count(), 1);
    }
}
