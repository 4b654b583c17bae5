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

use async_trait::async_trait;
use estel::{base_spec, ensure_data_serializable, post_process, standardize_rows, validate_data_for_chart};
use llm_contracts::{generate_structured, GenerationRequest, StructuredError, TextGenerator};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Stage, StageName};
use crate::context::GenerationContext;
use crate::error::{StageError, ValidationError};
use crate::prompts::{chart_prompt, chart_tool, CHART_SYSTEM_PROMPT};
use crate::state::PipelineState;

/// Produces the chart specification for the query results.
///
/// The generator's reply goes through the bounded decode-and-repair loop.
/// Whatever it returns, data rows and field bindings are then written from
/// the actual results and mapping.
pub struct ChartSpecStage {
    generator: Arc<dyn TextGenerator>,
    decode_attempts: u32,
    display_ceiling: usize,
    template_fallback: bool,
}

impl ChartSpecStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        decode_attempts: u32,
        display_ceiling: usize,
        template_fallback: bool,
    ) -> Self {
        Self {
            generator,
            decode_attempts,
            display_ceiling,
            template_fallback,
        }
    }
}

#[async_trait]
impl Stage for ChartSpecStage {
    fn name(&self) -> StageName {
        StageName::ChartGeneration
    }

    async fn run(
        &self,
        mut state: PipelineState,
        _ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError> {
        let (dimension, measure) = {
            let mapping = state
                .field_mapping
                .as_ref()
                .ok_or(ValidationError::MissingDimension)?;
            let (d, m) = mapping.require()?;
            (d.to_string(), m.to_string())
        };
        let results = state
            .query_results
            .as_deref()
            .ok_or(ValidationError::MissingQueryResults)?;
        let rows = standardize_rows(results, &dimension, &measure)?;
        let chart_type = state.chart_type;

        let validation = validate_data_for_chart(chart_type, &rows, &dimension, &measure);
        if !validation.valid {
            warn!(
                chart_type = %chart_type,
                categories = validation.category_count,
                issues = ?validation.issues,
                "Data is a poor fit for the chart type"
            );
        }
        if rows.len() > self.display_ceiling {
            warn!(rows = rows.len(), ceiling = self.display_ceiling, "More rows than the display ceiling");
        }

        let base = state
            .chart_spec
            .clone()
            .unwrap_or_else(|| base_spec(chart_type));
        let request = GenerationRequest::new(chart_prompt(&state, chart_type, &base, &rows, &dimension, &measure))
            .with_system_prompt(CHART_SYSTEM_PROMPT)
            .with_tool(chart_tool());

        let spec = match generate_structured::<Value, _>(
            self.generator.as_ref(),
            &request,
            self.decode_attempts,
        )
        .await
        {
            Ok(repaired) => {
                debug!(decode_attempts = repaired.attempts, "Chart specification decoded");
                repaired.value
            }
            Err(StructuredError::Generation(e)) if self.template_fallback => {
                warn!(error = %e, "Generator unavailable, using the base template");
                base
            }
            Err(e) => return Err(e.into()),
        };

        let title = match state.user_intent.trim() {
            "" => format!("{measure} by {dimension}"),
            intent => intent.to_string(),
        };
        let spec = post_process(spec, chart_type, &rows, &dimension, &measure, &title);
        ensure_data_serializable(&spec)?;

        info!(chart_type = %chart_type, rows = rows.len(), "Chart specification ready");
        state.chart_spec = Some(spec);
        Ok(state)
    }
}
