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

//! Per-attempt history of a chart generation.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerResult;

/// One attempt of one stage. Keyed by `(generation_id, stage_name, attempt_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub generation_id: String,
    pub stage_name: String,
    pub attempt_number: u32,
    pub input_snapshot: Value,
    pub output_snapshot: Option<Value>,
    pub error_message: Option<String>,
    pub correction_applied: Option<Value>,
    pub was_successful: bool,
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn started(
        generation_id: impl Into<String>,
        stage_name: impl Into<String>,
        attempt_number: u32,
        input_snapshot: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            generation_id: generation_id.into(),
            stage_name: stage_name.into(),
            attempt_number,
            input_snapshot,
            output_snapshot: None,
            error_message: None,
            correction_applied: None,
            was_successful: false,
            execution_time_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn succeeded(mut self, output_snapshot: Value, execution_time_ms: u64) -> Self {
        self.output_snapshot = Some(output_snapshot);
        self.was_successful = true;
        self.execution_time_ms = Some(execution_time_ms);
        self.updated_at = Utc::now();
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>, execution_time_ms: u64) -> Self {
        self.error_message = Some(error_message.into());
        self.was_successful = false;
        self.execution_time_ms = Some(execution_time_ms);
        self.updated_at = Utc::now();
        self
    }

    pub fn with_correction(mut self, correction: Value) -> Self {
        self.correction_applied = Some(correction);
        self.updated_at = Utc::now();
        self
    }
}

#[async_trait]
pub trait AttemptLedger: Send + Sync {
    /// Inserts the record, or updates the existing row with the same key.
    /// `created_at` of an existing row is preserved.
    async fn upsert(&self, record: &AttemptRecord) -> LedgerResult<()>;

    /// Newest attempt first.
    async fn recent_attempts(
        &self,
        generation_id: &str,
        stage_name: &str,
        limit: usize,
    ) -> LedgerResult<Vec<AttemptRecord>>;
}
