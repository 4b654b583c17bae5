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

use llm_contracts::{generate_structured, GenerationRequest, TextGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stele::ensure_read_only;
use tracing::{debug, info, warn};

use super::heuristics;
use crate::context::GenerationContext;
use crate::error::StageError;
use crate::logging::AttemptLog;
use crate::prompts::{error_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};
use crate::stages::StageName;
use crate::state::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionSource {
    Ai,
    Heuristic,
}

/// What an analysis changed, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCorrection {
    pub source: CorrectionSource,
    pub strategy: String,
    pub changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AppliedCorrection {
    pub fn heuristic(strategy: &str, changes: Vec<String>) -> Self {
        Self {
            source: CorrectionSource::Heuristic,
            strategy: strategy.to_string(),
            changes,
            root_cause: None,
            confidence: None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result of analysing one failure. `correction` is `None` when the state
/// is returned unchanged.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub state: PipelineState,
    pub correction: Option<AppliedCorrection>,
}

#[derive(Debug, Deserialize)]
struct Diagnosis {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    suggested_corrections: SuggestedCorrections,
    #[serde(default)]
    correction_strategy: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default = "retry_by_default")]
    retry_recommended: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestedCorrections {
    #[serde(default)]
    field_mapping: Option<Value>,
    #[serde(default)]
    sql_query: Option<String>,
    #[serde(default, alias = "chart_spec")]
    chart_config: Option<Value>,
    #[serde(default)]
    data_processing: Option<Value>,
}

fn retry_by_default() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub ai_enabled: bool,
    pub prior_attempt_limit: usize,
    pub decode_attempts: u32,
}

/// Turns a stage failure into a corrected state.
///
/// The generator is asked for a diagnosis first. When that is disabled,
/// fails, or changes nothing, the heuristic table keyed on stage and failure
/// kind is applied. If neither applies the state comes back unchanged.
/// Analysis never fails.
pub struct ErrorAnalyzer {
    generator: Option<Arc<dyn TextGenerator>>,
    log: AttemptLog,
    config: AnalyzerConfig,
}

impl ErrorAnalyzer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, log: AttemptLog, config: AnalyzerConfig) -> Self {
        Self {
            generator,
            log,
            config,
        }
    }

    pub async fn analyze(
        &self,
        stage: StageName,
        error: &StageError,
        state: &PipelineState,
        attempt: u32,
        ctx: &GenerationContext,
    ) -> Analysis {
        let advisory = match self.analyze_with_ai(stage, error, state, attempt, ctx).await {
            Some(ai) if !ai.advisory_only => {
                info!(stage = %stage, changes = ?ai.correction.changes, "Applied AI correction");
                return Analysis {
                    state: ai.state,
                    correction: Some(ai.correction),
                };
            }
            other => other,
        };

        // Hints alone do not address what the stage checks.
        let base = advisory.as_ref().map_or(state, |ai| &ai.state);
        match heuristics::correct(stage, error.kind(), base) {
            Some((corrected, mut correction)) => {
                if let Some(ai) = &advisory {
                    correction.changes.extend(ai.correction.changes.iter().cloned());
                }
                info!(
                    stage = %stage,
                    kind = %error.kind(),
                    strategy = %correction.strategy,
                    "Applied heuristic correction"
                );
                Analysis {
                    state: corrected,
                    correction: Some(correction),
                }
            }
            None => match advisory {
                Some(ai) => {
                    info!(stage = %stage, changes = ?ai.correction.changes, "Applied AI hints only");
                    Analysis {
                        state: ai.state,
                        correction: Some(ai.correction),
                    }
                }
                None => {
                    warn!(stage = %stage, kind = %error.kind(), "No usable correction, retrying unchanged");
                    Analysis {
                        state: state.clone(),
                        correction: None,
                    }
                }
            },
        }
    }

    async fn analyze_with_ai(
        &self,
        stage: StageName,
        error: &StageError,
        state: &PipelineState,
        attempt: u32,
        ctx: &GenerationContext,
    ) -> Option<AiCorrection> {
        let generator = self.generator.as_ref().filter(|_| self.config.ai_enabled)?;

        let priors = self
            .log
            .recent(ctx, stage.as_str(), self.config.prior_attempt_limit)
            .await;
        let request = GenerationRequest::new(error_analysis_prompt(stage, error, state, attempt, &priors, ctx))
            .with_system_prompt(ANALYSIS_SYSTEM_PROMPT)
            .with_temperature(0.0);

        let diagnosis = match generate_structured::<Diagnosis, _>(
            generator.as_ref(),
            &request,
            self.config.decode_attempts,
        )
        .await
        {
            Ok(repaired) => repaired.value,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Error analysis unavailable, using heuristics");
                return None;
            }
        };
        debug!(
            stage = %stage,
            error_type = %diagnosis.error_type,
            confidence = diagnosis.confidence,
            retry_recommended = diagnosis.retry_recommended,
            "Error diagnosis received"
        );

        let merged = apply_suggestions(stage, state, diagnosis.suggested_corrections);
        if merged.changes.is_empty() || merged.state == *state {
            debug!(stage = %stage, "Diagnosis suggested nothing applicable");
            return None;
        }

        Some(AiCorrection {
            state: merged.state,
            advisory_only: merged.advisory_only,
            correction: AppliedCorrection {
                source: CorrectionSource::Ai,
                strategy: if diagnosis.correction_strategy.is_empty() {
                    "ai_suggested".to_string()
                } else {
                    diagnosis.correction_strategy
                },
                changes: merged.changes,
                root_cause: Some(diagnosis.root_cause).filter(|r| !r.is_empty()),
                confidence: Some(diagnosis.confidence.clamp(0.0, 1.0)),
            },
        })
    }
}

struct AiCorrection {
    state: PipelineState,
    correction: AppliedCorrection,
    advisory_only: bool,
}

/// A copy of the state with suggestions merged. `advisory_only` is set when
/// nothing but prompt hints changed.
struct Merged {
    state: PipelineState,
    changes: Vec<String>,
    advisory_only: bool,
}

/// Merges suggested corrections into a copy of the state. Suggestions that
/// name unknown fields, target a stage that does not read them or are empty
/// are skipped.
fn apply_suggestions(stage: StageName, state: &PipelineState, suggestions: SuggestedCorrections) -> Merged {
    let mut next = state.clone();
    let mut changes = Vec::new();

    if let Some(Value::Object(mapping)) = suggestions.field_mapping {
        let mut merged = next.field_mapping.clone().unwrap_or_default();
        let mut touched = false;
        for (key, slot) in [("dimension", &mut merged.dimension), ("measure", &mut merged.measure)] {
            let Some(name) = mapping.get(key).and_then(Value::as_str) else {
                continue;
            };
            if is_known_field(state, name) {
                *slot = Some(name.to_string());
                touched = true;
            } else {
                debug!(field = name, "Ignoring suggested mapping to an unknown field");
            }
        }
        if touched {
            changes.push(format!(
                "field_mapping -> {:?}/{:?}",
                merged.dimension, merged.measure
            ));
            next.field_mapping = Some(merged);
            next.sql_query = None;
            next.query_results = None;
        }
    }

    if let Some(sql) = suggestions.sql_query.filter(|_| stage == StageName::SqlGeneration) {
        match ensure_read_only(&sql) {
            Ok(statement) => {
                next.sql_query = Some(statement.to_string());
                next.query_results = None;
                changes.push("sql_query replaced".to_string());
            }
            Err(e) => debug!(error = %e, "Ignoring suggested query"),
        }
    }

    let reads_chart_spec = matches!(stage, StageName::ChartGeneration | StageName::Finalize);
    if let Some(Value::Object(config)) = suggestions.chart_config.filter(|_| reads_chart_spec) {
        if !config.is_empty() {
            let mut spec = match next.chart_spec.take() {
                Some(Value::Object(existing)) => existing,
                _ => Map::new(),
            };
            let keys: Vec<String> = config.keys().cloned().collect();
            spec.extend(config);
            next.chart_spec = Some(Value::Object(spec));
            changes.push(format!("chart_spec keys {keys:?}"));
        }
    }
    let substantive = !changes.is_empty();

    // Only the query prompt reads the hints.
    if let Some(hints) = suggestions
        .data_processing
        .filter(|h| !h.is_null() && stage == StageName::SqlGeneration)
    {
        next.data_processing_hints = Some(hints);
        changes.push("data_processing hints".to_string());
    }

    Merged {
        state: next,
        advisory_only: !substantive,
        changes,
    }
}

fn is_known_field(state: &PipelineState, name: &str) -> bool {
    state
        .field_analysis
        .as_ref()
        .is_some_and(|a| a.contains(name))
}
