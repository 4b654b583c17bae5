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

pub mod chart_spec;
pub mod field_mapping;
pub mod finalize;
pub mod initialize;
pub mod query;

pub use chart_spec::ChartSpecStage;
pub use field_mapping::FieldMappingStage;
pub use finalize::FinalizeStage;
pub use initialize::InitializeStage;
pub use query::QueryStage;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::GenerationContext;
use crate::error::StageError;
use crate::state::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Initialize,
    FieldMapping,
    SqlGeneration,
    ChartGeneration,
    Finalize,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::Initialize,
        StageName::FieldMapping,
        StageName::SqlGeneration,
        StageName::ChartGeneration,
        StageName::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Initialize => "initialize",
            StageName::FieldMapping => "field_mapping",
            StageName::SqlGeneration => "sql_generation",
            StageName::ChartGeneration => "chart_generation",
            StageName::Finalize => "finalize",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named unit of pipeline work.
///
/// A stage receives its own copy of the state and returns the next state.
/// It must not touch `attempt_count` or `processing_steps`; the executor and
/// orchestrator own those.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(
        &self,
        state: PipelineState,
        ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError>;
}
