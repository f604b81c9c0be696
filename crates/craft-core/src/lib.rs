// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod engine;
mod error;
mod events;

pub use engine::{Engine, ProviderSummarizer};
pub use error::EngineError;
pub use events::{CollectingSink, EventSink, NullSink, SinkEvent};
