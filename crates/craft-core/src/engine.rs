// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use craft_config::AgentConfig;
use craft_context::{ContextPipeline, OptimizeOptions, RebuildStrategy, Summarizer};
use craft_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, Role, ToolSchema};
use craft_store::{resolver, SessionStore, TurnRecord};
use craft_tools::{ToolCall, ToolRegistry};

use crate::error::EngineError;
use crate::events::EventSink;

/// Default system prompt used when the configuration supplies none.
const DEFAULT_SYSTEM_PROMPT: &str = "\
You are ByteCraft, an AI coding assistant running in a terminal. \
You help with software engineering tasks: reading and editing files, running \
commands, executing code, and answering questions about the project. \
Use the provided tools when an action is needed; answer directly when not. \
Be concise and concrete.";

/// The core engine.  Owns the active session and drives the model ↔ tool loop.
pub struct Engine {
    store: SessionStore,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    pipeline: ContextPipeline,
    config: AgentConfig,
    session_id: Option<String>,
    cwd: String,
}

impl Engine {
    pub fn new(
        store: SessionStore,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        pipeline: ContextPipeline,
        config: AgentConfig,
    ) -> Self {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string());
        Self {
            store,
            model,
            tools,
            pipeline,
            config,
            session_id: None,
            cwd,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Replace the model provider for subsequent completions.  The active
    /// session is preserved.
    pub fn set_model(&mut self, model: Arc<dyn ModelProvider>) {
        self.model = model;
    }

    // ── Session management ────────────────────────────────────────────────────

    /// Attach to an existing session by full id.
    pub fn attach_session(&mut self, id: &str) -> Result<(), EngineError> {
        if !self.store.session_exists(id) {
            return Err(EngineError::Validation(format!("unknown session: {id}")));
        }
        self.session_id = Some(id.to_string());
        Ok(())
    }

    /// Start a fresh session and make it active.
    pub fn new_session(&mut self) -> Result<String, EngineError> {
        let id = self.store.create_session()?;
        self.session_id = Some(id.clone());
        Ok(id)
    }

    /// Attach at startup: last-session pointer, then most recent session,
    /// then a fresh one.
    pub fn attach_startup_session(&mut self) -> Result<String, EngineError> {
        if let Some(id) = resolver::startup_session(&self.store)? {
            self.session_id = Some(id.clone());
            return Ok(id);
        }
        self.new_session()
    }

    /// Resolve a short id / title fragment and attach to the result.
    pub fn load_session(&mut self, input: &str) -> Result<Option<String>, EngineError> {
        match resolver::resolve(&self.store, input)? {
            Some(id) => {
                self.session_id = Some(id.clone());
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    // ── The agent loop ────────────────────────────────────────────────────────

    /// Process one user message: persist it, prepare the model context, and
    /// alternate model and tool invocations until the model stops requesting
    /// tools or the recursion cap is reached.
    ///
    /// Durability: the user turn is written before the first model call; each
    /// tool invocation writes a call turn and a result turn as it happens;
    /// the final assistant turn is written before `on_complete` fires.
    pub async fn handle_message(
        &mut self,
        user_input: &str,
        sink: &dyn EventSink,
    ) -> Result<(), EngineError> {
        let session_id = match self.session_id.clone() {
            Some(id) => id,
            None => self.new_session()?,
        };

        let history = match self.store.load_turns(&session_id) {
            Ok(h) => h,
            Err(e) => return self.fail(sink, e.into()),
        };
        let first_user_message = !history.iter().any(|t| t.role() == Role::User);

        // (1) The user turn lands before the first model call.
        let user_turn = TurnRecord::user(&session_id, user_input, &self.cwd);
        if let Err(e) = self.store.append_turn(&session_id, &user_turn) {
            return self.fail(sink, e.into());
        }
        if first_user_message {
            if let Err(e) = self.store.update_title(&session_id, user_input) {
                warn!("title update failed: {e}");
            }
        }
        if let Err(e) = self.store.set_last_session(&session_id) {
            warn!("last-session update failed: {e}");
        }

        // Prepare the bounded message list.
        let summarizer = ProviderSummarizer(Arc::clone(&self.model));
        let optimized = self
            .pipeline
            .optimize(
                &history,
                Some(&self.system_prompt()),
                user_input,
                OptimizeOptions {
                    summarizer: Some(&summarizer),
                    token_limit: Some(self.pipeline.config().max_tokens),
                },
            )
            .await;
        let mut messages = optimized.messages;

        let mut parent_uuid = user_turn.uuid.clone();
        let mut cycles = 0u32;

        // State machine: S_AGENT (model call) ↔ S_TOOLS (dispatch) → S_END.
        loop {
            // S_AGENT
            let (text, tool_calls) = match self.stream_one_turn(&messages, sink).await {
                Ok(t) => t,
                Err(e) => return self.fail(sink, EngineError::Model(e.to_string())),
            };

            if tool_calls.is_empty() {
                // S_END: persist the final assistant turn, then complete.
                let turn = TurnRecord::assistant(&session_id, &text, &self.cwd)
                    .with_parent(&parent_uuid);
                if let Err(e) = self.store.append_turn(&session_id, &turn) {
                    return self.fail(sink, e.into());
                }
                sink.on_complete(&text);
                return Ok(());
            }

            cycles += 1;
            if cycles > self.config.max_rounds {
                let err = EngineError::Limit(self.config.max_rounds);
                let notice = format!(
                    "[ERROR] aborted: the model kept requesting tools past the \
                     {} cycle cap without producing a final answer",
                    self.config.max_rounds
                );
                let turn = TurnRecord::assistant(&session_id, notice, &self.cwd)
                    .with_parent(&parent_uuid)
                    .internal();
                if let Err(e) = self.store.append_turn(&session_id, &turn) {
                    warn!("failed to persist limit-error turn: {e}");
                }
                sink.on_error(&err);
                return Err(err);
            }

            // Any text emitted alongside tool calls is part of the round.
            if !text.is_empty() {
                let turn = TurnRecord::assistant(&session_id, &text, &self.cwd)
                    .with_parent(&parent_uuid);
                if let Err(e) = self.store.append_turn(&session_id, &turn) {
                    return self.fail(sink, e.into());
                }
                parent_uuid = turn.uuid;
            }

            // S_TOOLS: dispatch sequentially to keep turn ordering
            // deterministic and the log linear.
            for tc in tool_calls {
                let args: serde_json::Value =
                    serde_json::from_str(&tc.args_json).unwrap_or_else(|_| serde_json::json!({}));

                let call_turn =
                    TurnRecord::tool_call(&session_id, &tc.name, args.clone(), &self.cwd)
                        .with_parent(&parent_uuid);
                if let Err(e) = self.store.append_turn(&session_id, &call_turn) {
                    return self.fail(sink, e.into());
                }
                sink.on_tool_call(&tc.name, &args);

                // Tool failures are not fatal: the dispatcher always returns
                // a structured JSON result the model can react to.
                let result = self.tools.invoke(&tc.name, &tc.args_json).await;
                sink.on_tool_result(&tc.name, &result);

                let result_turn = TurnRecord::tool_result(
                    &session_id,
                    &tc.name,
                    args,
                    Ok(result.clone()),
                    &self.cwd,
                )
                .with_parent(&call_turn.uuid);
                if let Err(e) = self.store.append_turn(&session_id, &result_turn) {
                    return self.fail(sink, e.into());
                }
                parent_uuid = result_turn.uuid.clone();

                messages.push(Message::tool_call(
                    tc.id.as_str(),
                    tc.name.as_str(),
                    tc.args_json.as_str(),
                ));
                messages.push(Message::tool_result(tc.id.as_str(), result.as_str()));
            }
            // Back to S_AGENT.
        }
    }

    /// Rebuild the model-facing context of the active session, for display
    /// or for a fresh process attaching to stored history.
    pub async fn rebuild_context(&self, strategy: RebuildStrategy) -> Result<Vec<Message>, EngineError> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| EngineError::Validation("no active session".into()))?;
        let turns = self.store.load_turns(id)?;
        let summarizer = ProviderSummarizer(Arc::clone(&self.model));
        let rebuilt = self
            .pipeline
            .rebuild(
                &turns,
                self.pipeline.config().max_tokens,
                Some(&summarizer),
                strategy,
            )
            .await;
        Ok(rebuilt.messages)
    }

    fn fail(&self, sink: &dyn EventSink, err: EngineError) -> Result<(), EngineError> {
        sink.on_error(&err);
        Err(err)
    }

    /// Call the model once, streaming tokens to the sink and accumulating
    /// tool-call deltas.  Returns (full_text, tool_calls).
    async fn stream_one_turn(
        &self,
        messages: &[Message],
        sink: &dyn EventSink,
    ) -> anyhow::Result<(String, Vec<ToolCall>)> {
        let tools: Vec<ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let req = CompletionRequest {
            messages: messages.to_vec(),
            tools,
            stream: true,
        };

        let mut stream = self.model.complete(req).await?;

        let mut full_text = String::new();
        // Keyed by the parallel-tool-call index from the provider; chunks for
        // one call may arrive across many deltas.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    sink.on_token(&delta);
                    full_text.push_str(&delta);
                }
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => {
                    warn!("model stream error: {e}");
                }
                _ => {}
            }
        }

        // Flush accumulated tool calls ordered by index.  Calls with an empty
        // name cannot be dispatched and are dropped; an empty id gets a
        // synthetic fallback so the round can still complete.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            let id = if ptc.id.is_empty() {
                format!("tc_synthetic_{i}")
            } else {
                ptc.id
            };
            let args_json = if ptc.args_buf.trim().is_empty() {
                "{}".to_string()
            } else {
                ptc.args_buf
            };
            tool_calls.push(ToolCall {
                id,
                name: ptc.name,
                args_json,
            });
        }

        Ok((full_text, tool_calls))
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Adapter exposing the engine's model provider as the pipeline's
/// summarization capability: one tool-free completion, text collected.
pub struct ProviderSummarizer(pub Arc<dyn ModelProvider>);

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, prompt: &str) -> anyhow::Result<String> {
        let req = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            stream: true,
        };
        let mut stream = self.0.complete(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
