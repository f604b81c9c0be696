// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod safety;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{err_result, ok_result, parse_args, required_str, Tool, ToolCall};

pub use builtin::code_runner::CodeRunnerTool;
pub use builtin::command::CommandTool;
pub use builtin::file_manager::FileManagerTool;
