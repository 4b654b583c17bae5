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

//! Fixed corrections keyed on the failing stage and the failure kind.

use super::analyzer::AppliedCorrection;
use crate::error::FailureKind;
use crate::stages::StageName;
use crate::state::{FieldMapping, PipelineState};

/// Returns the corrected state and what was done, or `None` when no rule
/// applies or the rule would leave the state as it is.
pub fn correct(
    stage: StageName,
    kind: FailureKind,
    state: &PipelineState,
) -> Option<(PipelineState, AppliedCorrection)> {
    use FailureKind as K;
    use StageName as S;

    let mut next = state.clone();
    let (strategy, changes) = match (stage, kind) {
        (_, K::UnknownColumn) => {
            let (dimension, measure) = first_pair(state)?;
            let change = format!("field_mapping -> {dimension}/{measure}");
            next.field_mapping = Some(FieldMapping::new(dimension, measure));
            next.sql_query = None;
            next.query_results = None;
            ("reset_field_mapping", vec![change, "sql_query cleared".to_string()])
        }
        (S::SqlGeneration, K::MissingFieldMapping) => {
            let (dimension, measure) = recommended_pair(state).or_else(|| first_pair(state))?;
            let change = format!("field_mapping -> {dimension}/{measure}");
            next.field_mapping = Some(FieldMapping::new(dimension, measure));
            ("fill_field_mapping", vec![change])
        }
        (S::SqlGeneration, K::EmptyResult | K::QueryRejected | K::UnknownTable | K::MalformedResponse) => {
            next.sql_query = None;
            next.query_results = None;
            ("regenerate_sql", vec!["sql_query cleared".to_string()])
        }
        (S::ChartGeneration, K::MalformedResponse | K::InvalidChartSpec)
        | (S::Finalize, K::MissingChartSpec | K::InvalidChartSpec) => {
            next.chart_spec = None;
            ("reset_chart_spec", vec!["chart_spec cleared".to_string()])
        }
        (S::FieldMapping, K::FieldDetection | K::MalformedResponse | K::MissingFieldMapping) => {
            next.field_mapping = None;
            ("redetect_field_mapping", vec!["field_mapping cleared".to_string()])
        }
        _ => return None,
    };

    if next == *state {
        return None;
    }
    Some((next, AppliedCorrection::heuristic(strategy, changes)))
}

fn recommended_pair(state: &PipelineState) -> Option<(String, String)> {
    state.field_analysis.as_ref()?.recommended_pair()
}

fn first_pair(state: &PipelineState) -> Option<(String, String)> {
    state.field_analysis.as_ref()?.first_pair()
}
