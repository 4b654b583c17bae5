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

use async_trait::async_trait;
use estel::{select_chart_type, FieldAnalysis, FieldRole};
use regex::Regex;
use tracing::{debug, info};

use super::{Stage, StageName};
use crate::context::GenerationContext;
use crate::error::{StageError, ValidationError};
use crate::state::{FieldMapping, PipelineState};

/// Chooses the dimension/measure pair and the chart family.
#[derive(Debug, Default)]
pub struct FieldMappingStage;

impl FieldMappingStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for FieldMappingStage {
    fn name(&self) -> StageName {
        StageName::FieldMapping
    }

    async fn run(
        &self,
        mut state: PipelineState,
        _ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError> {
        let analysis = state
            .field_analysis
            .as_ref()
            .ok_or(ValidationError::MissingFieldAnalysis)?;

        let mapping = match state.field_mapping.as_ref().filter(|m| m.is_complete()) {
            Some(supplied) => {
                let (dimension, measure) = supplied.require()?;
                for name in [dimension, measure] {
                    if !analysis.contains(name) {
                        return Err(StageError::FieldDetection(format!(
                            "field '{name}' does not exist in '{}'",
                            state.dataset.table_name
                        )));
                    }
                }
                debug!(dimension, measure, "Keeping supplied field mapping");
                supplied.clone()
            }
            None => detect_mapping(&state.user_intent, analysis, state.field_mapping.as_ref())?,
        };

        let dimension_type = mapping
            .dimension
            .as_deref()
            .and_then(|d| analysis.field(d))
            .map(|f| f.semantic_type);
        let chart_type = select_chart_type(&state.user_intent, dimension_type);
        info!(
            dimension = ?mapping.dimension,
            measure = ?mapping.measure,
            chart_type = %chart_type,
            "Field mapping selected"
        );

        state.chart_type = chart_type;
        state.field_mapping = Some(mapping);
        Ok(state)
    }
}

/// Columns named in the intent win, then any partial mapping, then the
/// classifier's recommendation, then the first dimension/measure pair.
fn detect_mapping(
    intent: &str,
    analysis: &FieldAnalysis,
    partial: Option<&FieldMapping>,
) -> Result<FieldMapping, StageError> {
    let mentioned = mentioned_fields(intent, analysis);
    let mentioned_with = |role: FieldRole| {
        mentioned
            .iter()
            .find(|name| analysis.field(name).is_some_and(|f| f.role == role))
            .cloned()
    };
    let known = |name: Option<&String>| name.filter(|n| analysis.contains(n)).cloned();
    let first_pair = analysis.first_pair();

    let dimension = mentioned_with(FieldRole::Dimension)
        .or_else(|| known(partial.and_then(|p| p.dimension.as_ref())))
        .or_else(|| known(analysis.recommendation.dimension.as_ref()))
        .or_else(|| first_pair.as_ref().map(|(d, _)| d.clone()));
    let measure = mentioned_with(FieldRole::Measure)
        .or_else(|| known(partial.and_then(|p| p.measure.as_ref())))
        .or_else(|| known(analysis.recommendation.measure.as_ref()))
        .or_else(|| first_pair.as_ref().map(|(_, m)| m.clone()));

    match (dimension, measure) {
        (Some(dimension), Some(measure)) if dimension != measure => {
            let extra_fields = mentioned
                .into_iter()
                .filter(|f| *f != dimension && *f != measure)
                .collect();
            Ok(FieldMapping {
                dimension: Some(dimension),
                measure: Some(measure),
                extra_fields,
            })
        }
        (dimension, measure) => Err(StageError::FieldDetection(format!(
            "no dimension/measure pair among {} fields (dimension: {:?}, measure: {:?})",
            analysis.fields.len(),
            dimension,
            measure
        ))),
    }
}

/// Field names the intent mentions as whole words, in column order.
/// Underscores in a name also match spaces.
fn mentioned_fields(intent: &str, analysis: &FieldAnalysis) -> Vec<String> {
    let intent = intent.to_lowercase();
    analysis
        .fields
        .iter()
        .map(|f| f.name().to_string())
        .filter(|name| {
            let words = regex::escape(&name.to_lowercase()).replace('_', "[_ ]");
            Regex::new(&format!(r"\b{words}\b")).is_ok_and(|re| re.is_match(&intent))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DatasetRef;
    use estel::{ChartType, ClassifierConfig, ColumnProfile, FieldRoleClassifier};
    use serde_json::json;

    fn profile(name: &str, declared: &str, unique: u64, samples: Vec<serde_json::Value>) -> ColumnProfile {
        ColumnProfile {
            name: name.into(),
            declared_type: declared.into(),
            row_count: 40,
            unique_count: unique,
            cardinality_ratio: unique as f64 / 40.0,
            null_percentage: 0.0,
            sample_values: samples,
            min_value: None,
            max_value: None,
        }
    }

    fn state(intent: &str) -> PipelineState {
        let classifier = FieldRoleClassifier::heuristic(ClassifierConfig::default());
        let analysis = classifier.classify_heuristically(&[
            profile("region", "TEXT", 4, vec![json!("north"), json!("south")]),
            profile("product_line", "TEXT", 6, vec![json!("a"), json!("b")]),
            profile("amount", "REAL", 38, vec![json!(1.5), json!(2.0)]),
            profile("units", "INTEGER", 20, vec![json!(3), json!(4)]),
        ]);
        let mut state = PipelineState::new(
            "g",
            intent,
            DatasetRef {
                dataset_id: "ds".into(),
                table_name: "sales".into(),
            },
        );
        state.field_analysis = Some(analysis);
        state
    }

    async fn run(state: PipelineState) -> Result<PipelineState, StageError> {
        FieldMappingStage::new()
            .run(state, &GenerationContext::new("g", false))
            .await
    }

    #[tokio::test]
    async fn test_intent_mentions_win() {
        let out = run(state("compare units by product line")).await.unwrap();
        let mapping = out.field_mapping.unwrap();
        assert_eq!(mapping.dimension.as_deref(), Some("product_line"));
        assert_eq!(mapping.measure.as_deref(), Some("units"));
        assert_eq!(out.chart_type, ChartType::Bar);
    }

    #[tokio::test]
    async fn test_falls_back_to_recommendation() {
        let out = run(state("show distribution by category")).await.unwrap();
        let mapping = out.field_mapping.unwrap();
        assert_eq!(mapping.dimension.as_deref(), Some("region"));
        assert_eq!(mapping.measure.as_deref(), Some("amount"));
        assert_eq!(out.chart_type, ChartType::Pie);
    }

    #[tokio::test]
    async fn test_unknown_supplied_field_fails() {
        let mut input = state("anything");
        input.field_mapping = Some(FieldMapping::new("regon", "amount"));
        let err = run(input).await.unwrap_err();
        assert!(matches!(err, StageError::FieldDetection(ref m) if m.contains("regon")));
    }

    #[tokio::test]
    async fn test_missing_analysis() {
        let mut input = state("anything");
        input.field_analysis = None;
        assert!(matches!(
            run(input).await,
            Err(StageError::Validation(ValidationError::MissingFieldAnalysis))
        ));
    }
}
