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

use std::sync::Arc;

use estel::Row;
use llm_contracts::{ScriptedGenerator, REPAIR_TASK};
use serde_json::json;
use sleet::prompts::{CHART_SPEC_TASK, ERROR_ANALYSIS_TASK, SQL_TASK};
use sleet::{ChartPipeline, ChartRequest, ChartResponse, PipelineConfig, PipelineDeps};
use stele::{AttemptLedger, AttemptRecord, MemoryLedger, QueryPool, QueryPoolConfig, SqliteStore};

const BAD_SQL: &str = "SELECT regon, SUM(amount) AS amount FROM sales GROUP BY regon";
const REGION_SQL: &str = "SELECT region, SUM(amount) AS amount FROM sales GROUP BY region";
const CHART_JSON: &str = r#"{"type": "bar", "title": {"text": "Sales"}}"#;

fn store_rows() -> (Vec<String>, Vec<Row>) {
    let regions = ["north", "south", "east", "west"];
    let rows = (0..24)
        .map(|i| {
            let mut row = Row::new();
            row.insert("store".into(), json!(format!("s{}", i % 6)));
            row.insert("region".into(), json!(regions[i % 4]));
            row.insert("amount".into(), json!(10.0 + i as f64));
            row
        })
        .collect();
    (vec!["store".into(), "region".into(), "amount".into()], rows)
}

async fn run_with_analysis(
    generator: Arc<ScriptedGenerator>,
    ledger: Arc<MemoryLedger>,
    generation_id: &str,
) -> ChartResponse {
    let (columns, rows) = store_rows();
    let store = SqliteStore::in_memory().await.unwrap();
    store.import_rows("ds", "sales", &columns, &rows).await.unwrap();
    let pool = QueryPool::new(Arc::new(store), QueryPoolConfig::default()).unwrap();

    let mut config = PipelineConfig::default();
    config.classifier.ai_enabled = false;
    assert!(config.ai_error_analysis);

    let pipeline = ChartPipeline::new(
        PipelineDeps {
            generator,
            pool,
            ledger: Some(ledger),
        },
        config,
    )
    .unwrap();
    pipeline
        .run(ChartRequest::new("total amount by region", "ds", "sales").with_generation_id(generation_id))
        .await
        .unwrap()
}

async fn failed_sql_attempt(ledger: &MemoryLedger, generation_id: &str) -> AttemptRecord {
    let records = ledger
        .recent_attempts(generation_id, "sql_generation", 5)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].was_successful);
    records[1].clone()
}

#[tokio::test]
async fn test_ai_suggested_query_is_applied() {
    let ledger = Arc::new(MemoryLedger::new());
    let diagnosis = json!({
        "error_type": "unknown_column",
        "root_cause": "misspelled column",
        "suggested_corrections": {"sql_query": REGION_SQL},
        "correction_strategy": "fix_column_name",
        "confidence": 0.9
    });
    let generator = Arc::new(
        ScriptedGenerator::new()
            .on(SQL_TASK, BAD_SQL)
            .on(ERROR_ANALYSIS_TASK, diagnosis.to_string())
            .on(CHART_SPEC_TASK, CHART_JSON),
    );

    let response = run_with_analysis(generator.clone(), ledger.clone(), "gen-ai").await;

    assert_eq!(response.sql_query, REGION_SQL);
    assert_eq!(response.field_mapping.dimension, "region");
    assert_eq!(response.query_results.len(), 4);
    assert_eq!(response.attempt_counts.get("sql_generation"), Some(&2));
    // the suggested query ran without a second generation
    assert_eq!(generator.calls_matching(SQL_TASK), 1);
    assert_eq!(generator.remaining(), 0);

    let analysis_prompt = generator
        .calls()
        .into_iter()
        .find(|c| c.prompt.starts_with(ERROR_ANALYSIS_TASK))
        .unwrap()
        .prompt;
    assert!(analysis_prompt.contains("Stage: sql_generation"));
    assert!(analysis_prompt.contains("no such column: regon"));
    assert!(analysis_prompt.contains(BAD_SQL));
    // the failed attempt is already in the ledger when the analysis runs
    assert!(analysis_prompt.contains("\"success\":false"));

    let failed = failed_sql_attempt(&ledger, "gen-ai").await;
    let correction = failed.correction_applied.unwrap();
    assert_eq!(correction["source"], "ai");
    assert_eq!(correction["strategy"], "fix_column_name");
    assert_eq!(correction["root_cause"], "misspelled column");
    assert_eq!(correction["changes"][0], "sql_query replaced");
}

#[tokio::test]
async fn test_malformed_diagnosis_is_repaired() {
    let ledger = Arc::new(MemoryLedger::new());
    let generator = Arc::new(
        ScriptedGenerator::new()
            .on(SQL_TASK, BAD_SQL)
            .on(ERROR_ANALYSIS_TASK, "The column regon does not exist, use store.")
            .on(
                REPAIR_TASK,
                r#"{"suggested_corrections": {"field_mapping": {"dimension": "store", "measure": "amount"}}}"#,
            )
            .on(SQL_TASK, "SELECT store, SUM(amount) AS amount FROM sales GROUP BY store")
            .on(CHART_SPEC_TASK, CHART_JSON),
    );

    let response = run_with_analysis(generator.clone(), ledger.clone(), "gen-repair").await;

    assert_eq!(response.field_mapping.dimension, "store");
    assert_eq!(response.query_results.len(), 6);
    assert_eq!(generator.calls_matching(REPAIR_TASK), 1);
    assert_eq!(generator.remaining(), 0);

    let correction = failed_sql_attempt(&ledger, "gen-repair")
        .await
        .correction_applied
        .unwrap();
    assert_eq!(correction["source"], "ai");
    assert_eq!(correction["strategy"], "ai_suggested");
}

#[tokio::test]
async fn test_unusable_diagnosis_falls_back_to_heuristics() {
    let ledger = Arc::new(MemoryLedger::new());
    // unrepairable reply: the repair request has no scripted answer
    let generator = Arc::new(
        ScriptedGenerator::new()
            .on(SQL_TASK, BAD_SQL)
            .on(ERROR_ANALYSIS_TASK, "I am not sure what went wrong.")
            .on(SQL_TASK, "SELECT store, SUM(amount) AS amount FROM sales GROUP BY store")
            .on(CHART_SPEC_TASK, CHART_JSON),
    );

    let response = run_with_analysis(generator.clone(), ledger.clone(), "gen-garbled").await;

    assert_eq!(response.field_mapping.dimension, "store");
    assert_eq!(generator.calls_matching(REPAIR_TASK), 1);
    let correction = failed_sql_attempt(&ledger, "gen-garbled")
        .await
        .correction_applied
        .unwrap();
    assert_eq!(correction["source"], "heuristic");
    assert_eq!(correction["strategy"], "reset_field_mapping");
}

#[tokio::test]
async fn test_chart_config_does_not_mask_a_query_failure() {
    let ledger = Arc::new(MemoryLedger::new());
    let diagnosis = json!({"suggested_corrections": {"chart_config": {"innerRadius": 0.5}}});
    let generator = Arc::new(
        ScriptedGenerator::new()
            .on(SQL_TASK, BAD_SQL)
            .on(ERROR_ANALYSIS_TASK, diagnosis.to_string())
            .on(SQL_TASK, "SELECT store, SUM(amount) AS amount FROM sales GROUP BY store")
            .on(CHART_SPEC_TASK, CHART_JSON),
    );

    let response = run_with_analysis(generator, ledger.clone(), "gen-chart-config").await;

    assert_eq!(response.field_mapping.dimension, "store");
    assert_eq!(response.field_mapping.measure, "amount");
    assert!(response.chart_spec.get("innerRadius").is_none());
    let correction = failed_sql_attempt(&ledger, "gen-chart-config")
        .await
        .correction_applied
        .unwrap();
    assert_eq!(correction["source"], "heuristic");
    assert_eq!(correction["strategy"], "reset_field_mapping");
}

#[tokio::test]
async fn test_hints_ride_along_with_heuristic_correction() {
    let ledger = Arc::new(MemoryLedger::new());
    let diagnosis = json!({"suggested_corrections": {"data_processing": {"exclude_nulls": true}}});
    let generator = Arc::new(
        ScriptedGenerator::new()
            .on(SQL_TASK, BAD_SQL)
            .on(ERROR_ANALYSIS_TASK, diagnosis.to_string())
            .on(SQL_TASK, "SELECT store, SUM(amount) AS amount FROM sales GROUP BY store")
            .on(CHART_SPEC_TASK, CHART_JSON),
    );

    let response = run_with_analysis(generator.clone(), ledger.clone(), "gen-hints").await;

    assert_eq!(response.field_mapping.dimension, "store");
    let retry_prompt = generator
        .calls()
        .into_iter()
        .filter(|c| c.prompt.starts_with(SQL_TASK))
        .nth(1)
        .unwrap()
        .prompt;
    assert!(retry_prompt.contains("exclude_nulls"));

    let correction = failed_sql_attempt(&ledger, "gen-hints")
        .await
        .correction_applied
        .unwrap();
    assert_eq!(correction["strategy"], "reset_field_mapping");
    let changes = correction["changes"].as_array().unwrap();
    assert!(changes.iter().any(|c| c == "data_processing hints"));
}
