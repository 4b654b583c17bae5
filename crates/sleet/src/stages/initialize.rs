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
use estel::FieldRoleClassifier;
use stele::QueryPool;
use tracing::info;

use super::{Stage, StageName};
use crate::context::GenerationContext;
use crate::error::{StageError, ValidationError};
use crate::state::PipelineState;

/// Profiles the dataset and classifies its columns.
pub struct InitializeStage {
    pool: QueryPool,
    classifier: FieldRoleClassifier,
    sample_rows: usize,
}

impl InitializeStage {
    pub fn new(pool: QueryPool, classifier: FieldRoleClassifier, sample_rows: usize) -> Self {
        Self {
            pool,
            classifier,
            sample_rows,
        }
    }
}

#[async_trait]
impl Stage for InitializeStage {
    fn name(&self) -> StageName {
        StageName::Initialize
    }

    async fn run(
        &self,
        mut state: PipelineState,
        _ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError> {
        let (profiles, samples) = {
            let lease = self.pool.acquire().await?;
            let profiles = lease.column_profiles(&state.dataset.dataset_id).await?;
            let samples = lease
                .sample_rows(&state.dataset.table_name, self.sample_rows)
                .await?;
            (profiles, samples)
        };

        if profiles.is_empty() {
            return Err(ValidationError::NoColumns {
                dataset_id: state.dataset.dataset_id.clone(),
            }
            .into());
        }

        let analysis = self
            .classifier
            .classify(&state.dataset.table_name, &profiles, &samples)
            .await;
        info!(
            columns = analysis.fields.len(),
            source = ?analysis.source,
            quality = analysis.data_quality.score,
            "Dataset classified"
        );

        state.confidence_score = analysis.recommendation.confidence;
        state.data_quality = analysis.data_quality.clone();
        state.field_analysis = Some(analysis);
        Ok(state)
    }
}
