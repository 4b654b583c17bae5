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

use std::collections::BTreeMap;

use estel::{ChartType, DataQuality, FieldAnalysis, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ValidationError;
use crate::stages::StageName;

const SNAPSHOT_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset_id: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub dimension: Option<String>,
    pub measure: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_fields: Vec<String>,
}

impl FieldMapping {
    pub fn new(dimension: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            dimension: Some(dimension.into()),
            measure: Some(measure.into()),
            extra_fields: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.dimension.is_some() && self.measure.is_some()
    }

    /// Both fields, or the validation error naming the first one missing.
    pub fn require(&self) -> Result<(&str, &str), ValidationError> {
        let dimension = self
            .dimension
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or(ValidationError::MissingDimension)?;
        let measure = self
            .measure
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or(ValidationError::MissingMeasure)?;
        Ok((dimension, measure))
    }
}

/// Everything known about one generation. Stages take a state by value and
/// return the next one; a failed attempt leaves its input untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub generation_id: String,
    pub user_intent: String,
    pub dataset: DatasetRef,
    pub field_analysis: Option<FieldAnalysis>,
    pub field_mapping: Option<FieldMapping>,
    pub chart_type: ChartType,
    pub sql_query: Option<String>,
    pub query_results: Option<Vec<Row>>,
    pub chart_spec: Option<Value>,
    pub attempt_count: BTreeMap<String, u32>,
    pub processing_steps: Vec<String>,
    pub confidence_score: f64,
    pub data_quality: DataQuality,
    pub error: Option<String>,
    /// Free-form hints from error analysis, shown to later prompts.
    pub data_processing_hints: Option<Value>,
}

impl PipelineState {
    pub fn new(
        generation_id: impl Into<String>,
        user_intent: impl Into<String>,
        dataset: DatasetRef,
    ) -> Self {
        Self {
            generation_id: generation_id.into(),
            user_intent: user_intent.into(),
            dataset,
            field_analysis: None,
            field_mapping: None,
            chart_type: ChartType::default(),
            sql_query: None,
            query_results: None,
            chart_spec: None,
            attempt_count: BTreeMap::new(),
            processing_steps: Vec::new(),
            confidence_score: 0.0,
            data_quality: DataQuality::default(),
            error: None,
            data_processing_hints: None,
        }
    }

    pub fn attempts_for(&self, stage: StageName) -> u32 {
        self.attempt_count.get(stage.as_str()).copied().unwrap_or(0)
    }

    pub fn with_attempt(mut self, stage: StageName, attempt: u32) -> Self {
        self.attempt_count.insert(stage.as_str().to_string(), attempt);
        self
    }

    pub fn record_step(&mut self, stage: StageName) {
        self.processing_steps.push(stage.as_str().to_string());
    }

    /// Summary safe to persist and to show a reviewer: result sets are cut
    /// to a count and a few sample rows, field analysis to names and roles.
    pub fn sanitized_snapshot(&self) -> Value {
        let query_results = self.query_results.as_ref().map(|rows| {
            json!({
                "count": rows.len(),
                "sample": rows.iter().take(SNAPSHOT_SAMPLE_ROWS).collect::<Vec<_>>(),
            })
        });
        let field_analysis = self.field_analysis.as_ref().map(|analysis| {
            json!({
                "field_count": analysis.fields.len(),
                "fields": analysis
                    .fields
                    .iter()
                    .map(|f| json!({
                        "name": f.name(),
                        "role": f.role,
                        "semantic_type": f.semantic_type,
                    }))
                    .collect::<Vec<_>>(),
            })
        });
        let chart_spec = self.chart_spec.as_ref().map(|spec| {
            json!({
                "type": spec.get("type"),
                "keys": spec
                    .as_object()
                    .map(|o| o.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        });

        json!({
            "generation_id": self.generation_id,
            "user_intent": self.user_intent,
            "dataset": self.dataset,
            "field_analysis": field_analysis,
            "field_mapping": self.field_mapping,
            "chart_type": self.chart_type,
            "sql_query": self.sql_query,
            "query_results": query_results,
            "chart_spec": chart_spec,
            "attempt_count": self.attempt_count,
            "processing_steps": self.processing_steps,
            "data_processing_hints": self.data_processing_hints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new(
            "gen-1",
            "sales by region",
            DatasetRef {
                dataset_id: "ds".into(),
                table_name: "sales".into(),
            },
        )
    }

    #[test]
    fn test_require_mapping() {
        assert_eq!(
            FieldMapping::default().require(),
            Err(ValidationError::MissingDimension)
        );
        let partial = FieldMapping {
            dimension: Some("region".into()),
            ..Default::default()
        };
        assert_eq!(partial.require(), Err(ValidationError::MissingMeasure));
        assert_eq!(
            FieldMapping::new("region", "amount").require(),
            Ok(("region", "amount"))
        );
    }

    #[test]
    fn test_attempt_bookkeeping() {
        let state = state().with_attempt(StageName::SqlGeneration, 2);
        assert_eq!(state.attempts_for(StageName::SqlGeneration), 2);
        assert_eq!(state.attempts_for(StageName::Initialize), 0);
    }

    #[test]
    fn test_snapshot_never_holds_full_results() {
        let mut state = state();
        state.query_results = Some(
            (0..10)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("region".into(), json!(format!("r{i}")));
                    row
                })
                .collect(),
        );
        let snapshot = state.sanitized_snapshot();
        assert_eq!(snapshot["query_results"]["count"], 10);
        assert_eq!(snapshot["query_results"]["sample"].as_array().unwrap().len(), 3);
        assert_eq!(snapshot["dataset"]["table_name"], "sales");
    }
}
