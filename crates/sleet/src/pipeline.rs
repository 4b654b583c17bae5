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
use std::sync::Arc;

use estel::{ChartType, DataQuality, FieldRoleClassifier, Row};
use llm_contracts::TextGenerator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stele::{AttemptLedger, QueryPool};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{ConfigError, PipelineConfig};
use crate::context::GenerationContext;
use crate::error::{ExhaustedRetriesError, ValidationError};
use crate::logging::AttemptLog;
use crate::recovery::{AnalyzerConfig, ErrorAnalyzer, RecoveryExecutor};
use crate::stages::{
    ChartSpecStage, FieldMappingStage, FinalizeStage, InitializeStage, QueryStage, Stage,
    StageName,
};
use crate::state::{DatasetRef, FieldMapping, PipelineState};

/// Collaborators shared by every run of a pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub generator: Arc<dyn TextGenerator>,
    pub pool: QueryPool,
    pub ledger: Option<Arc<dyn AttemptLedger>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartRequest {
    pub user_intent: String,
    pub dataset_id: String,
    pub table_name: String,
    pub generation_id: Option<String>,
    pub logging_enabled: Option<bool>,
    pub field_mapping: Option<FieldMapping>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChartRequest {
    pub fn new(
        user_intent: impl Into<String>,
        dataset_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            user_intent: user_intent.into(),
            dataset_id: dataset_id.into(),
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn with_generation_id(mut self, generation_id: impl Into<String>) -> Self {
        self.generation_id = Some(generation_id.into());
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = Some(enabled);
        self
    }

    pub fn with_field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = Some(mapping);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMapping {
    pub dimension: String,
    pub measure: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartResponse {
    pub chart_spec: Value,
    pub sql_query: String,
    pub query_results: Vec<Row>,
    pub field_mapping: ResolvedMapping,
    pub chart_type: ChartType,
    pub confidence_score: f64,
    pub data_quality: DataQuality,
    pub processing_steps: Vec<String>,
    pub attempt_counts: BTreeMap<String, u32>,
    pub generation_id: String,
}

impl ChartResponse {
    fn from_state(state: &PipelineState) -> Result<Self, ValidationError> {
        let field_mapping = {
            let mapping = state
                .field_mapping
                .as_ref()
                .ok_or(ValidationError::MissingDimension)?;
            let (dimension, measure) = mapping.require()?;
            ResolvedMapping {
                dimension: dimension.to_string(),
                measure: measure.to_string(),
            }
        };
        Ok(Self {
            chart_spec: state
                .chart_spec
                .clone()
                .ok_or(ValidationError::MissingChartSpec)?,
            sql_query: state.sql_query.clone().unwrap_or_default(),
            query_results: state
                .query_results
                .clone()
                .ok_or(ValidationError::MissingQueryResults)?,
            field_mapping,
            chart_type: state.chart_type,
            confidence_score: state.confidence_score,
            data_quality: state.data_quality.clone(),
            processing_steps: state.processing_steps.clone(),
            attempt_counts: state.attempt_count.clone(),
            generation_id: state.generation_id.clone(),
        })
    }
}

/// Drives the five generation stages in order, each through the recovery
/// executor. Runs share only the query pool.
pub struct ChartPipeline {
    stages: Vec<Box<dyn Stage>>,
    executor: RecoveryExecutor,
    ledger_configured: bool,
    config: PipelineConfig,
}

impl ChartPipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let classifier = FieldRoleClassifier::new(deps.generator.clone(), config.classifier.clone());
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(InitializeStage::new(deps.pool.clone(), classifier, config.sample_rows)),
            Box::new(FieldMappingStage::new()),
            Box::new(QueryStage::new(
                deps.generator.clone(),
                deps.pool.clone(),
                config.max_result_groups,
                config.readability_threshold,
            )),
            Box::new(ChartSpecStage::new(
                deps.generator.clone(),
                config.decode_attempts,
                config.display_ceiling,
                config.template_fallback,
            )),
            Box::new(FinalizeStage::new()),
        ];

        let log = AttemptLog::new(deps.ledger);
        let analyzer = ErrorAnalyzer::new(
            Some(deps.generator),
            log.clone(),
            AnalyzerConfig {
                ai_enabled: config.ai_error_analysis,
                prior_attempt_limit: config.prior_attempt_limit,
                decode_attempts: config.decode_attempts,
            },
        );
        let ledger_configured = log.is_configured();
        let executor = RecoveryExecutor::new(analyzer, log, config.max_retries);

        Ok(Self {
            stages,
            executor,
            ledger_configured,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_pipeline(
        &self,
        user_intent: &str,
        dataset_id: &str,
        table_name: &str,
    ) -> Result<ChartResponse, ExhaustedRetriesError> {
        self.run(ChartRequest::new(user_intent, dataset_id, table_name))
            .await
    }

    pub async fn run(&self, request: ChartRequest) -> Result<ChartResponse, ExhaustedRetriesError> {
        let generation_id = request
            .generation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("chart_generation", generation_id = %generation_id);
        self.run_stages(generation_id, request).instrument(span).await
    }

    async fn run_stages(
        &self,
        generation_id: String,
        request: ChartRequest,
    ) -> Result<ChartResponse, ExhaustedRetriesError> {
        let ctx = GenerationContext::new(
            generation_id.as_str(),
            request.logging_enabled.unwrap_or(self.ledger_configured),
        )
        .with_metadata(request.metadata);

        let mut state = PipelineState::new(
            generation_id,
            request.user_intent,
            DatasetRef {
                dataset_id: request.dataset_id,
                table_name: request.table_name,
            },
        );
        state.field_mapping = request.field_mapping;
        info!(
            dataset_id = %state.dataset.dataset_id,
            table = %state.dataset.table_name,
            "Chart generation started"
        );

        for stage in &self.stages {
            state = self
                .executor
                .execute_with_recovery(stage.as_ref(), state, &ctx)
                .await?;
            state.record_step(stage.name());
        }

        // Finalize has already checked these; a gap here is reported against it.
        let response = match ChartResponse::from_state(&state) {
            Ok(response) => response,
            Err(e) => {
                state.error = Some(e.to_string());
                return Err(ExhaustedRetriesError {
                    stage: StageName::Finalize,
                    attempts: state.attempts_for(StageName::Finalize),
                    last_error: e.to_string(),
                    kind: e.kind(),
                    partial: Box::new(state),
                });
            }
        };
        info!(
            chart_type = %response.chart_type,
            rows = response.query_results.len(),
            attempts = response.attempt_counts.values().sum::<u32>(),
            "Chart generation completed"
        );
        Ok(response)
    }
}
