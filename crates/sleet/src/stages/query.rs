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
use llm_contracts::{decode_structured_response, extract_code_blocks, GenerationRequest, TextGenerator};
use serde::Deserialize;
use stele::QueryPool;
use tracing::{debug, info, warn};

use super::{Stage, StageName};
use crate::context::GenerationContext;
use crate::error::{QueryError, StageError, ValidationError};
use crate::prompts::{sql_prompt, SQL_SYSTEM_PROMPT};
use crate::state::PipelineState;

#[derive(Debug, Deserialize)]
struct SqlReply {
    sql: String,
}

/// Generates the aggregate query for the mapping and executes it.
pub struct QueryStage {
    generator: Arc<dyn TextGenerator>,
    pool: QueryPool,
    max_result_groups: usize,
    readability_threshold: usize,
}

impl QueryStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        pool: QueryPool,
        max_result_groups: usize,
        readability_threshold: usize,
    ) -> Self {
        Self {
            generator,
            pool,
            max_result_groups,
            readability_threshold,
        }
    }

    async fn generate_sql(
        &self,
        state: &PipelineState,
        dimension: &str,
        measure: &str,
    ) -> Result<String, StageError> {
        let request = GenerationRequest::new(sql_prompt(state, dimension, measure, self.max_result_groups))
            .with_system_prompt(SQL_SYSTEM_PROMPT)
            .with_temperature(0.0);
        let text = self.generator.generate_text(&request).await?;
        let sql = extract_sql(&text);
        if !is_select(&sql) {
            return Err(QueryError::Rejected {
                message: "generated text is not a SELECT statement".to_string(),
                sql,
            }
            .into());
        }
        Ok(sql)
    }
}

#[async_trait]
impl Stage for QueryStage {
    fn name(&self) -> StageName {
        StageName::SqlGeneration
    }

    async fn run(
        &self,
        mut state: PipelineState,
        _ctx: &GenerationContext,
    ) -> Result<PipelineState, StageError> {
        // Checked before any store access.
        let (dimension, measure) = {
            let mapping = state
                .field_mapping
                .as_ref()
                .ok_or(ValidationError::MissingDimension)?;
            let (d, m) = mapping.require()?;
            (d.to_string(), m.to_string())
        };

        let sql = match state.sql_query.clone().filter(|_| state.query_results.is_none()) {
            Some(pending) => {
                debug!(sql = %pending, "Executing corrected query");
                pending
            }
            None => self.generate_sql(&state, &dimension, &measure).await?,
        };

        let lease = self.pool.acquire().await?;
        let executed = lease.execute_query(&state.dataset.table_name, &sql).await;
        drop(lease);
        let mut rows = executed.map_err(|e| StageError::from_query(e, &sql))?;

        if rows.is_empty() {
            return Err(QueryError::EmptyResult { sql }.into());
        }
        if rows.len() > self.readability_threshold {
            warn!(
                rows = rows.len(),
                threshold = self.readability_threshold,
                "Query returned more groups than read well in one chart"
            );
        }
        if rows.len() > self.max_result_groups {
            warn!(rows = rows.len(), max = self.max_result_groups, "Truncating query results");
            rows.truncate(self.max_result_groups);
        }

        info!(rows = rows.len(), dimension = %dimension, measure = %measure, "Query executed");
        state.sql_query = Some(sql);
        state.query_results = Some(rows);
        Ok(state)
    }
}

/// Pulls a statement out of a reply: a fenced sql block, a `{"sql": ...}`
/// object, or the raw text. Trailing semicolons are dropped.
pub fn extract_sql(text: &str) -> String {
    let blocks = extract_code_blocks(text);
    let fenced = blocks
        .iter()
        .find(|(lang, _)| lang.as_deref().is_some_and(|l| l.eq_ignore_ascii_case("sql")))
        .or_else(|| blocks.iter().find(|(lang, code)| lang.is_none() && is_select(code)))
        .map(|(_, code)| code.clone());

    let sql = fenced
        .or_else(|| decode_structured_response::<SqlReply>(text).ok().map(|r| r.sql))
        .unwrap_or_else(|| text.to_string());
    sql.trim().trim_end_matches(';').trim().to_string()
}

fn is_select(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    head == "select" || head == "with"
}
