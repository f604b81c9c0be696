// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" (any OpenAI-compatible endpoint) | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies, Ollama, or LiteLLM.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o-mini".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

fn default_max_rounds() -> u32 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of model↔tool cycles per user message before the loop
    /// aborts with a limit error.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Custom system prompt override.  When unset, a built-in default is used.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            system_prompt: None,
        }
    }
}

// ─── Context pipeline configuration ──────────────────────────────────────────

/// Policy for multiple system messages entering truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SystemMessageHandling {
    #[default]
    AlwaysKeep,
    LatestOnly,
    SmartMerge,
}

/// Strategy used to fit a message list into the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    SimpleSlidingWindow,
    #[default]
    SmartSlidingWindow,
    ImportanceBased,
}

/// How message sizes are estimated.  `Precise` is reserved for a future BPE
/// integration and currently behaves like `Enhanced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenEstimationMode {
    Simple,
    #[default]
    Enhanced,
    Precise,
}

fn default_max_messages() -> usize {
    50
}
fn default_max_context_tokens() -> usize {
    16_000
}
fn default_max_bytes() -> usize {
    256 * 1024
}
fn default_max_lines() -> usize {
    2_000
}
fn default_min_recent() -> usize {
    5
}
fn default_compression_threshold() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard cap on message count after truncation.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Hard cap on estimated tokens after truncation.
    #[serde(default = "default_max_context_tokens")]
    pub max_tokens: usize,
    /// Hard cap on UTF-8 byte total including system prompt and current message.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Hard cap on total newline-separated lines.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Floor guaranteeing the most recent N non-system messages survive
    /// truncation when possible.
    #[serde(default = "default_min_recent")]
    pub min_recent_messages: usize,
    #[serde(default)]
    pub system_message_handling: SystemMessageHandling,
    #[serde(default)]
    pub truncation_strategy: TruncationStrategy,
    #[serde(default)]
    pub token_estimation_mode: TokenEstimationMode,
    #[serde(default = "default_true")]
    pub enable_sensitive_filtering: bool,
    #[serde(default = "default_true")]
    pub enable_curation: bool,
    /// Fraction of `max_tokens` that triggers summarization when a summarizer
    /// is available.  Must lie in (0, 1].
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_tokens: default_max_context_tokens(),
            max_bytes: default_max_bytes(),
            max_lines: default_max_lines(),
            min_recent_messages: default_min_recent(),
            system_message_handling: SystemMessageHandling::default(),
            truncation_strategy: TruncationStrategy::default(),
            token_estimation_mode: TokenEstimationMode::default(),
            enable_sensitive_filtering: true,
            enable_curation: true,
            compression_threshold: default_compression_threshold(),
        }
    }
}

// ─── Tool configuration ──────────────────────────────────────────────────────

fn default_command_timeout_secs() -> u64 {
    30
}
fn default_max_background() -> usize {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default timeout for foreground commands.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Upper bound on concurrently tracked background processes.
    #[serde(default = "default_max_background")]
    pub max_background_processes: usize,
    /// Extra path components ignored by the file manager, merged with the
    /// built-in set (node_modules, .git, build outputs, lockfiles, env files).
    #[serde(default)]
    pub ignored_paths: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            max_background_processes: default_max_background(),
            ignored_paths: Vec::new(),
        }
    }
}

// ─── Store configuration ─────────────────────────────────────────────────────

fn default_state_dir() -> String {
    ".bytecraft".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// State directory rooted at the process working directory.  Holds the
    /// session logs, the metadata index, and the last-session file.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
