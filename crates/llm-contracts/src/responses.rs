// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a generator handed back: plain text, or a structured tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOutput {
    Text { text: String },
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

impl GenerationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        GenerationOutput::Text { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        GenerationOutput::ToolCall(ToolCall {
            name: name.into(),
            arguments,
        })
    }

    /// Flattens a tool call into its JSON arguments so callers that decode
    /// structured text can treat both shapes the same way.
    pub fn into_text(self) -> String {
        match self {
            GenerationOutput::Text { text } => text,
            GenerationOutput::ToolCall(call) => call.arguments.to_string(),
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            GenerationOutput::ToolCall(call) => Some(call),
            GenerationOutput::Text { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_flattens_to_arguments() {
        let output = GenerationOutput::tool_call("submit_chart_spec", json!({"type": "pie"}));
        assert_eq!(output.as_tool_call().map(|c| c.name.as_str()), Some("submit_chart_spec"));
        assert_eq!(output.into_text(), r#"{"type":"pie"}"#);
    }
}
