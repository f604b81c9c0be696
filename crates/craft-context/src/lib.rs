// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod curate;
pub mod estimate;
pub mod pipeline;
pub mod sensitive;
pub mod summarize;
pub mod truncate;

pub use curate::{curate, validate_response, CurationStats, InvalidResponse};
pub use estimate::{total_bytes, total_lines, TokenEstimator};
pub use pipeline::{
    turn_to_message, ContextPipeline, OptimizeOptions, OptimizeStats, Optimized, Rebuilt,
    RebuildStrategy,
};
pub use sensitive::{SensitiveFilter, DEFAULT_PATTERNS, FILTERED};
pub use summarize::{compress, Compression, Summarizer, SUMMARY_MARKER};
pub use truncate::{enforce_limits, truncate, TruncationReport};
