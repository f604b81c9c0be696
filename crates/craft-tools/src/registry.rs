// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{err_result, Tool};

/// A tool schema – mirrors craft_model::ToolSchema but keeps the tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// The dispatcher contract: `invoke` always returns a JSON string.  Unknown
/// names and non-JSON tool output are converted into structured failures so
/// the model always receives something it can parse.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Route a call to the named tool and return its JSON result string.
    pub async fn invoke(&self, name: &str, args_json: &str) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                // The error string is a fixed contract; the offending name
                // travels in its own field.
                return serde_json::json!({
                    "success": false,
                    "error": "unknown tool",
                    "tool": name,
                })
                .to_string();
            }
        };
        let out = tool.invoke(args_json).await;
        if serde_json::from_str::<serde_json::Value>(&out).is_err() {
            return err_result("non-json tool output");
        }
        out
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
