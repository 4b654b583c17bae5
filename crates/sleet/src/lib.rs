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

//! Chart generation pipeline: five stages run in order, each wrapped in a
//! bounded retry loop that corrects the pipeline state between attempts.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod recovery;
pub mod stages;
pub mod state;

pub use config::{ConfigError, PipelineConfig};
pub use context::GenerationContext;
pub use error::{ExhaustedRetriesError, FailureKind, QueryError, StageError, ValidationError};
pub use logging::AttemptLog;
pub use pipeline::{ChartPipeline, ChartRequest, ChartResponse, PipelineDeps, ResolvedMapping};
pub use recovery::{
    AnalyzerConfig, Analysis, AppliedCorrection, CorrectionSource, ErrorAnalyzer, RecoveryExecutor,
};
pub use stages::{Stage, StageName};
pub use state::{DatasetRef, FieldMapping, PipelineState};
