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
use estel::ensure_data_serializable;

use super::{Stage, StageName};
use crate::context::GenerationContext;
use crate::error::{StageError, ValidationError};
use crate::state::PipelineState;

#[derive(Debug, Default)]
pub struct FinalizeStage;

impl FinalizeStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> StageName {
        StageName::Finalize
    }

    async fn run(
        &self,
        state: PipelineState,
        _ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError> {
        state
            .field_mapping
            .as_ref()
            .ok_or(ValidationError::MissingDimension)?
            .require()?;
        if state.query_results.as_ref().map_or(true, Vec::is_empty) {
            return Err(ValidationError::MissingQueryResults.into());
        }
        let spec = state
            .chart_spec
            .as_ref()
            .ok_or(ValidationError::MissingChartSpec)?;
        ensure_data_serializable(spec)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DatasetRef, FieldMapping};
    use estel::Row;
    use serde_json::json;

    fn complete() -> PipelineState {
        let mut state = PipelineState::new(
            "g",
            "x",
            DatasetRef {
                dataset_id: "d".into(),
                table_name: "t".into(),
            },
        );
        state.field_mapping = Some(FieldMapping::new("region", "amount"));
        let mut row = Row::new();
        row.insert("region".into(), json!("north"));
        row.insert("amount".into(), json!(3));
        state.query_results = Some(vec![row]);
        state.chart_spec = Some(json!({"type": "pie", "data": [{"id": "id0", "values": []}]}));
        state
    }

    #[tokio::test]
    async fn test_complete_state_passes() {
        let ctx = GenerationContext::new("g", false);
        assert!(FinalizeStage::new().run(complete(), &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_executable_spec_rejected() {
        let ctx = GenerationContext::new("g", false);
        let mut state = complete();
        state.chart_spec = Some(json!({"type": "pie", "label": {"formatter": "(d) => d.value"}}));
        let err = FinalizeStage::new().run(state, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::InvalidChartSpec);

        let mut state = complete();
        state.chart_spec = None;
        let err = FinalizeStage::new().run(state, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::MissingChartSpec);
    }
}
