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

use llm_contracts::{
    decode_structured_response, generate_structured, DecodeError, GenerationRequest,
    ScriptedGenerator, StructuredError, TextGenerator, ToolSpec, REPAIR_TASK,
};
use serde_json::{json, Value};

#[test]
fn test_decode_object_in_prose() {
    let text = r#"Here's some text {"key": "value", "number": 42} and more text"#;
    let result: Value = decode_structured_response(text).unwrap();
    assert_eq!(result, json!({"key": "value", "number": 42}));
}

#[test]
fn test_decode_array_in_prose() {
    let text = r#"Some text [1, 2, "test"] more text"#;
    let result: Value = decode_structured_response(text).unwrap();
    assert_eq!(result, json!([1, 2, "test"]));
}

#[test]
fn test_decode_untagged_fence() {
    let text = "```\n{\"sql\": \"SELECT 1\"}\n```";
    let result: Value = decode_structured_response(text).unwrap();
    assert_eq!(result["sql"], "SELECT 1");
}

#[test]
fn test_decode_ignores_non_json_fences() {
    let text = "```python\nprint({'a': 1})\n```";
    let err = decode_structured_response::<Value>(text).unwrap_err();
    assert!(matches!(err, DecodeError::Malformed { .. } | DecodeError::NoStructure { .. }));
}

#[test]
fn test_plain_text_has_no_structure() {
    let err = decode_structured_response::<Value>("This is just plain text.").unwrap_err();
    assert_eq!(
        err,
        DecodeError::NoStructure {
            excerpt: "This is just plain text.".to_string()
        }
    );
}

#[tokio::test]
async fn test_tool_call_replies_decode_directly() {
    let tool = ToolSpec {
        name: "submit_chart_spec".to_string(),
        description: "Submit the chart".to_string(),
        input_schema: json!({"type": "object"}),
    };
    let generator =
        ScriptedGenerator::new().on_tool_call("TASK: chart", "submit_chart_spec", json!({"type": "pie"}));
    let request = GenerationRequest::new("TASK: chart").with_tool(tool);

    let out = generate_structured::<Value, _>(&generator, &request, 3).await.unwrap();
    assert_eq!(out.attempts, 1);
    assert_eq!(out.value, json!({"type": "pie"}));
    assert_eq!(generator.calls()[0].tools.len(), 1);
}

#[tokio::test]
async fn test_repair_prompt_keeps_tools_and_system_prompt() {
    let generator = ScriptedGenerator::new()
        .on("TASK: chart", "{broken")
        .on(REPAIR_TASK, "{\"type\": \"bar\"}");
    let request = GenerationRequest::new("TASK: chart")
        .with_system_prompt("JSON only")
        .with_max_tokens(512);

    let out = generate_structured::<Value, _>(&generator, &request, 3).await.unwrap();
    assert_eq!(out.attempts, 2);

    let calls = generator.calls();
    assert!(calls[1].prompt.starts_with(REPAIR_TASK));
    assert_eq!(calls[1].system_prompt.as_deref(), Some("JSON only"));
    assert_eq!(calls[1].generation_config.max_tokens, Some(512));
    assert_ne!(calls[0].id, calls[1].id);
}

#[tokio::test]
async fn test_single_attempt_limit() {
    let generator = ScriptedGenerator::new().on("TASK: chart", "nope");
    let request = GenerationRequest::new("TASK: chart");
    let err = generate_structured::<Value, _>(&generator, &request, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StructuredError::Decode(DecodeError::Exhausted { attempts: 1, .. })
    ));
    assert_eq!(generator.model_name(), "scripted");
}
