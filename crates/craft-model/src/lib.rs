// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod mock;
pub mod openai_compat;
mod provider;
mod types;

pub use mock::{FailingProvider, MockProvider, ScriptedMockProvider};
pub use openai_compat::{AuthStyle, OpenAICompatProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, FunctionCall, Message, MessageContent, ResponseEvent, Role, ToolSchema,
};
