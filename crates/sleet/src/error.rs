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

use std::fmt;

use estel::ChartError;
use llm_contracts::{DecodeError, LLMError, StructuredError};
use serde::{Deserialize, Serialize};
use stele::{PoolError, StoreError};
use thiserror::Error;

use crate::stages::StageName;
use crate::state::PipelineState;

/// A stage precondition that does not hold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field analysis is missing; the initialize stage has not completed")]
    MissingFieldAnalysis,
    #[error("Field mapping has no dimension")]
    MissingDimension,
    #[error("Field mapping has no measure")]
    MissingMeasure,
    #[error("No query results are available")]
    MissingQueryResults,
    #[error("No chart specification is available")]
    MissingChartSpec,
    #[error("Dataset '{dataset_id}' has no columns")]
    NoColumns { dataset_id: String },
}

/// The data store rejected a generated query or it returned nothing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Query references unknown column '{column}': {message}")]
    UnknownColumn {
        column: String,
        message: String,
        sql: String,
    },
    #[error("Query references unknown table '{table}': {message}")]
    UnknownTable {
        table: String,
        message: String,
        sql: String,
    },
    #[error("Query rejected: {message}")]
    Rejected { message: String, sql: String },
    #[error("Query returned no rows")]
    EmptyResult { sql: String },
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Structured response unusable: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("Text generation failed: {0}")]
    Generation(#[from] LLMError),
    #[error("Data store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chart(#[from] ChartError),
    #[error("Field detection failed: {0}")]
    FieldDetection(String),
}

/// Classification of a stage failure, fixed where the failure is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingFieldMapping,
    MissingPrerequisite,
    MissingChartSpec,
    UnknownColumn,
    UnknownTable,
    EmptyResult,
    QueryRejected,
    MalformedResponse,
    FieldDetection,
    InvalidChartSpec,
    Generation,
    Store,
}

/// Terminal failure of a run: a stage failed on every allowed attempt.
#[derive(Error, Debug)]
#[error("{stage} failed after {attempts} attempts. Last error: {last_error}")]
pub struct ExhaustedRetriesError {
    pub stage: StageName,
    pub attempts: u32,
    pub last_error: String,
    pub kind: FailureKind,
    /// State as of the final attempt, with `error` set.
    pub partial: Box<PipelineState>,
}

impl ValidationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ValidationError::MissingDimension | ValidationError::MissingMeasure => {
                FailureKind::MissingFieldMapping
            }
            ValidationError::MissingChartSpec => FailureKind::MissingChartSpec,
            ValidationError::MissingFieldAnalysis
            | ValidationError::MissingQueryResults
            | ValidationError::NoColumns { .. } => FailureKind::MissingPrerequisite,
        }
    }
}

impl QueryError {
    pub fn sql(&self) -> &str {
        match self {
            QueryError::UnknownColumn { sql, .. }
            | QueryError::UnknownTable { sql, .. }
            | QueryError::Rejected { sql, .. }
            | QueryError::EmptyResult { sql } => sql,
        }
    }
}

impl StageError {
    /// Converts a store failure raised while executing `sql`. Failures that
    /// concern the query itself become [`QueryError`]s; the rest stay store
    /// errors.
    pub fn from_query(error: StoreError, sql: &str) -> Self {
        let sql = sql.to_string();
        match error {
            StoreError::UnknownColumn { column, message } => QueryError::UnknownColumn {
                column,
                message,
                sql,
            }
            .into(),
            StoreError::UnknownTable { table, message } => QueryError::UnknownTable {
                table,
                message,
                sql,
            }
            .into(),
            StoreError::InvalidQuery(message) => QueryError::Rejected { message, sql }.into(),
            other => StageError::Store(other),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Validation(e) => e.kind(),
            StageError::Decode(_) => FailureKind::MalformedResponse,
            StageError::Query(QueryError::UnknownColumn { .. }) => FailureKind::UnknownColumn,
            StageError::Query(QueryError::UnknownTable { .. }) => FailureKind::UnknownTable,
            StageError::Query(QueryError::Rejected { .. }) => FailureKind::QueryRejected,
            StageError::Query(QueryError::EmptyResult { .. }) => FailureKind::EmptyResult,
            StageError::Generation(_) => FailureKind::Generation,
            StageError::Store(_) => FailureKind::Store,
            StageError::Chart(ChartError::NoPlottableRows { .. }) => FailureKind::EmptyResult,
            StageError::Chart(_) => FailureKind::InvalidChartSpec,
            StageError::FieldDetection(_) => FailureKind::FieldDetection,
        }
    }

    /// The query that failed, when the failure came from executing one.
    pub fn failed_sql(&self) -> Option<&str> {
        match self {
            StageError::Query(e) => Some(e.sql()),
            _ => None,
        }
    }
}

impl From<StructuredError> for StageError {
    fn from(e: StructuredError) -> Self {
        match e {
            StructuredError::Generation(e) => StageError::Generation(e),
            StructuredError::Decode(e) => StageError::Decode(e),
        }
    }
}

impl From<PoolError> for StageError {
    fn from(e: PoolError) -> Self {
        StageError::Store(StoreError::Pool(e))
    }
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingFieldMapping => "missing_field_mapping",
            FailureKind::MissingPrerequisite => "missing_prerequisite",
            FailureKind::MissingChartSpec => "missing_chart_spec",
            FailureKind::UnknownColumn => "unknown_column",
            FailureKind::UnknownTable => "unknown_table",
            FailureKind::EmptyResult => "empty_result",
            FailureKind::QueryRejected => "query_rejected",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::FieldDetection => "field_detection",
            FailureKind::InvalidChartSpec => "invalid_chart_spec",
            FailureKind::Generation => "generation",
            FailureKind::Store => "store",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
