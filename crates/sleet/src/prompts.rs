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

//! Prompt text for every generator call the pipeline makes. Each prompt
//! opens with a task marker line.

use estel::{ChartType, FieldAnalysis, Row};
use llm_contracts::ToolSpec;
use serde_json::{json, Value};
use stele::AttemptRecord;

use crate::context::GenerationContext;
use crate::error::StageError;
use crate::stages::StageName;
use crate::state::PipelineState;

pub const SQL_TASK: &str = "TASK: sql_generation";
pub const CHART_SPEC_TASK: &str = "TASK: chart_spec";
pub const ERROR_ANALYSIS_TASK: &str = "TASK: error_analysis";

pub const SQL_SYSTEM_PROMPT: &str =
    "You write a single read-only SQLite SELECT statement. Reply with the SQL only.";
pub const CHART_SYSTEM_PROMPT: &str =
    "You design VChart chart specifications. Reply with one JSON object and nothing else.";
pub const ANALYSIS_SYSTEM_PROMPT: &str =
    "You diagnose failures in a chart generation pipeline. Reply with JSON only.";

pub const CHART_TOOL_NAME: &str = "submit_chart_spec";

pub fn sql_prompt(state: &PipelineState, dimension: &str, measure: &str, max_groups: usize) -> String {
    let fields = state
        .field_analysis
        .as_ref()
        .map(field_lines)
        .unwrap_or_default();
    let hints = state
        .data_processing_hints
        .as_ref()
        .map(|h| format!("\nProcessing hints from an earlier failure: {h}\n"))
        .unwrap_or_default();

    format!(
        "{SQL_TASK}\n\n\
         User request: {intent}\n\
         Table: \"{table}\"\n\
         Available columns:\n{fields}\n\
         Dimension column: \"{dimension}\"\n\
         Measure column: \"{measure}\"\n{hints}\n\
         Write one query that:\n\
         - selects \"{dimension}\" and SUM(\"{measure}\") AS \"{measure}\"\n\
         - filters out rows where either column IS NULL\n\
         - groups by \"{dimension}\"\n\
         - orders by the aggregate descending\n\
         - returns at most {max_groups} rows (LIMIT {max_groups})\n\
         Use only the columns listed above.",
        intent = state.user_intent,
        table = state.dataset.table_name,
    )
}

pub fn chart_prompt(
    state: &PipelineState,
    chart_type: ChartType,
    base: &Value,
    rows: &[Row],
    dimension: &str,
    measure: &str,
) -> String {
    let knowledge = chart_type.knowledge();
    let (category_key, value_key) = chart_type.field_keys();
    let rules = knowledge
        .rules
        .iter()
        .map(|r| format!("- {r}"))
        .collect::<Vec<_>>()
        .join("\n");
    let preview: Vec<&Row> = rows.iter().take(5).collect();

    format!(
        "{CHART_SPEC_TASK}\n\n\
         User request: {intent}\n\
         Chart type: {chart_type} ({description})\n\
         Rows: {count}, first rows: {preview}\n\n\
         Start from this specification:\n{base}\n\n\
         Requirements:\n\
         - \"type\" is \"{chart_type}\"\n\
         - \"{category_key}\" is \"{dimension}\" and \"{value_key}\" is \"{measure}\"\n\
         - keep \"data\" as [{{\"id\": \"id0\", \"values\": []}}]; rows are filled in later\n\
         - plain JSON values only, no functions or callbacks\n\
         {rules}\n\n\
         Return the complete specification as a JSON object.",
        intent = state.user_intent,
        description = knowledge.description,
        count = rows.len(),
        preview = serde_json::to_string(&preview).unwrap_or_default(),
        base = serde_json::to_string_pretty(base).unwrap_or_default(),
    )
}

pub fn chart_tool() -> ToolSpec {
    ToolSpec {
        name: CHART_TOOL_NAME.to_string(),
        description: "Submit the finished chart specification".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "type": {"type": "string", "enum": ["pie", "bar", "line"]},
                "data": {"type": "array"},
                "categoryField": {"type": "string"},
                "valueField": {"type": "string"},
                "xField": {"type": "string"},
                "yField": {"type": "string"},
                "title": {"type": "object"}
            },
            "required": ["type"]
        }),
    }
}

pub fn error_analysis_prompt(
    stage: StageName,
    error: &StageError,
    state: &PipelineState,
    attempt: u32,
    prior_attempts: &[AttemptRecord],
    ctx: &GenerationContext,
) -> String {
    let priors: Vec<Value> = prior_attempts
        .iter()
        .map(|r| {
            json!({
                "attempt": r.attempt_number,
                "success": r.was_successful,
                "error": r.error_message,
                "correction": r.correction_applied,
            })
        })
        .collect();
    let known_fields = state
        .field_analysis
        .as_ref()
        .map(|a| a.fields.iter().map(|f| f.name().to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    format!(
        "{ERROR_ANALYSIS_TASK}\n\n\
         Stage: {stage}\n\
         Attempt: {attempt}\n\
         Error kind: {kind}\n\
         Error: {error}\n\
         Failed SQL: {sql}\n\
         Known fields: {known_fields:?}\n\
         State: {snapshot}\n\
         Prior attempts: {priors}\n\
         Request metadata: {metadata}\n\n\
         Respond with JSON:\n\
         {{\"error_type\": \"...\", \"root_cause\": \"...\",\n \
         \"suggested_corrections\": {{\"field_mapping\": {{\"dimension\": \"...\", \"measure\": \"...\"}},\n \
         \"sql_query\": \"...\", \"chart_config\": {{}}, \"data_processing\": {{}}}},\n \
         \"correction_strategy\": \"...\", \"confidence\": 0.0, \"retry_recommended\": true}}\n\
         Omit corrections you are not sure about. Only use known fields.",
        kind = error.kind(),
        sql = error.failed_sql().unwrap_or("none"),
        snapshot = state.sanitized_snapshot(),
        priors = Value::Array(priors),
        metadata = Value::Object(ctx.metadata.clone()),
    )
}

fn field_lines(analysis: &FieldAnalysis) -> String {
    analysis
        .fields
        .iter()
        .map(|f| format!("- \"{}\" ({}, {}, {})", f.name(), f.profile.declared_type, f.role, f.semantic_type))
        .collect::<Vec<_>>()
        .join("\n")
}
