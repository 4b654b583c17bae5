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

pub mod analyzer;
pub mod heuristics;

pub use analyzer::{AnalyzerConfig, Analysis, AppliedCorrection, CorrectionSource, ErrorAnalyzer};

use std::time::Instant;

use stele::AttemptRecord;
use tracing::{error, info, warn};

use crate::context::GenerationContext;
use crate::error::ExhaustedRetriesError;
use crate::logging::AttemptLog;
use crate::stages::Stage;
use crate::state::PipelineState;

/// Runs one stage with attempt counting, ledger writes and bounded retry.
///
/// Attempts are strictly sequential. Each failed attempt is analysed and the
/// corrected state feeds the next attempt; after `max_retries` failures the
/// stage is abandoned without further analysis.
pub struct RecoveryExecutor {
    analyzer: ErrorAnalyzer,
    log: AttemptLog,
    max_retries: u32,
}

impl RecoveryExecutor {
    pub fn new(analyzer: ErrorAnalyzer, log: AttemptLog, max_retries: u32) -> Self {
        Self {
            analyzer,
            log,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn execute_with_recovery(
        &self,
        stage: &dyn Stage,
        state: PipelineState,
        ctx: &GenerationContext,
    ) -> Result<PipelineState, ExhaustedRetriesError> {
        let name = stage.name();
        let mut state = state;

        loop {
            let attempt = state.attempts_for(name) + 1;
            let input = state.with_attempt(name, attempt);

            let record = AttemptRecord::started(
                ctx.generation_id.as_str(),
                name.as_str(),
                attempt,
                input.sanitized_snapshot(),
            );
            self.log.write(ctx, &record).await;
            info!(stage = %name, attempt, max = self.max_retries, "Stage attempt started");

            let started = Instant::now();
            let outcome = stage.run(input.clone(), ctx).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let failure = match outcome {
                Ok(output) => {
                    self.log
                        .write(ctx, &record.succeeded(output.sanitized_snapshot(), elapsed_ms))
                        .await;
                    info!(stage = %name, attempt, elapsed_ms, "Stage attempt succeeded");
                    return Ok(output);
                }
                Err(e) => e,
            };

            let message = failure.to_string();
            let kind = failure.kind();
            let failed = record.failed(message.as_str(), elapsed_ms);
            self.log.write(ctx, &failed).await;
            warn!(stage = %name, attempt, kind = %kind, error = %message, elapsed_ms, "Stage attempt failed");

            if attempt >= self.max_retries {
                error!(stage = %name, attempts = attempt, error = %message, "Retries exhausted");
                let mut partial = input;
                partial.error = Some(message.clone());
                return Err(ExhaustedRetriesError {
                    stage: name,
                    attempts: attempt,
                    last_error: message,
                    kind,
                    partial: Box::new(partial),
                });
            }

            let analysis = self.analyzer.analyze(name, &failure, &input, attempt, ctx).await;
            if let Some(correction) = &analysis.correction {
                self.log
                    .write(ctx, &failed.with_correction(correction.to_json()))
                    .await;
            }
            state = analysis.state;
        }
    }
}
