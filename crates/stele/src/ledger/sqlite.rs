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

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::{AttemptLedger, AttemptRecord};
use crate::error::{LedgerError, LedgerResult};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS chart_generation_attempts (
    generation_id      TEXT    NOT NULL,
    step_name          TEXT    NOT NULL,
    attempt_number     INTEGER NOT NULL,
    step_input         TEXT    NOT NULL,
    step_output        TEXT,
    error_message      TEXT,
    correction_applied TEXT,
    was_successful     INTEGER NOT NULL DEFAULT 0,
    execution_time_ms  INTEGER,
    created_at         TEXT    NOT NULL,
    updated_at         TEXT    NOT NULL,
    PRIMARY KEY (generation_id, step_name, attempt_number)
)"#;

const UPSERT: &str = r#"
INSERT INTO chart_generation_attempts (
    generation_id, step_name, attempt_number, step_input, step_output,
    error_message, correction_applied, was_successful, execution_time_ms,
    created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT (generation_id, step_name, attempt_number) DO UPDATE SET
    step_input = excluded.step_input,
    step_output = excluded.step_output,
    error_message = excluded.error_message,
    correction_applied = excluded.correction_applied,
    was_successful = excluded.was_successful,
    execution_time_ms = excluded.execution_time_ms,
    updated_at = excluded.updated_at"#;

const RECENT: &str = r#"
SELECT generation_id, step_name, attempt_number, step_input, step_output,
       error_message, correction_applied, was_successful, execution_time_ms,
       created_at, updated_at
FROM chart_generation_attempts
WHERE generation_id = ?1 AND step_name = ?2
ORDER BY attempt_number DESC
LIMIT ?3"#;

/// Attempt ledger persisted in the `chart_generation_attempts` table.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub async fn connect(path: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let ledger = Self::from_pool(pool).await?;
        info!(path, "Attempt ledger ready");
        Ok(ledger)
    }

    pub async fn in_memory() -> LedgerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::from_pool(pool).await
    }

    /// Shares an existing pool, creating the table if needed.
    pub async fn from_pool(pool: SqlitePool) -> LedgerResult<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl AttemptLedger for SqliteLedger {
    async fn upsert(&self, record: &AttemptRecord) -> LedgerResult<()> {
        sqlx::query(UPSERT)
            .bind(record.generation_id.as_str())
            .bind(record.stage_name.as_str())
            .bind(i64::from(record.attempt_number))
            .bind(serde_json::to_string(&record.input_snapshot)?)
            .bind(to_json_text(record.output_snapshot.as_ref())?)
            .bind(record.error_message.as_deref())
            .bind(to_json_text(record.correction_applied.as_ref())?)
            .bind(record.was_successful)
            .bind(
                record
                    .execution_time_ms
                    .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
            )
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_attempts(
        &self,
        generation_id: &str,
        stage_name: &str,
        limit: usize,
    ) -> LedgerResult<Vec<AttemptRecord>> {
        let rows = sqlx::query(RECENT)
            .bind(generation_id)
            .bind(stage_name)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn to_json_text(value: Option<&Value>) -> LedgerResult<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn from_json_text(text: Option<String>) -> LedgerResult<Option<Value>> {
    text.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

fn parse_timestamp(text: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Serialisation(format!("bad timestamp '{text}': {e}")))
}

fn record_from_row(row: &SqliteRow) -> LedgerResult<AttemptRecord> {
    let input: String = row.try_get("step_input")?;
    let attempt_number: i64 = row.try_get("attempt_number")?;
    let execution_time_ms: Option<i64> = row.try_get("execution_time_ms")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(AttemptRecord {
        generation_id: row.try_get("generation_id")?,
        stage_name: row.try_get("step_name")?,
        attempt_number: u32::try_from(attempt_number).unwrap_or_default(),
        input_snapshot: serde_json::from_str(&input)?,
        output_snapshot: from_json_text(row.try_get("step_output")?)?,
        error_message: row.try_get("error_message")?,
        correction_applied: from_json_text(row.try_get("correction_applied")?)?,
        was_successful: row.try_get("was_successful")?,
        execution_time_ms: execution_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let started = AttemptRecord::started("g1", "chart_generation", 1, json!({"chart_type": "bar"}));
        ledger.upsert(&started).await.unwrap();

        let mut finished = started
            .clone()
            .succeeded(json!({"type": "bar"}), 40)
            .with_correction(json!({"strategy": "reset_chart_spec"}));
        finished.created_at = Utc::now() + chrono::Duration::hours(1);
        ledger.upsert(&finished).await.unwrap();

        let rows = ledger.recent_attempts("g1", "chart_generation", 5).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.was_successful);
        assert_eq!(row.execution_time_ms, Some(40));
        assert_eq!(row.output_snapshot, Some(json!({"type": "bar"})));
        assert_eq!(row.correction_applied, Some(json!({"strategy": "reset_chart_spec"})));
        assert_eq!(row.created_at.timestamp(), started.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_recent_attempts_ordering_and_limit() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        for n in 1..=3 {
            let record = AttemptRecord::started("g1", "sql_generation", n, json!({"n": n}))
                .failed(format!("failure {n}"), 5);
            ledger.upsert(&record).await.unwrap();
        }
        let recent = ledger.recent_attempts("g1", "sql_generation", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempt_number, 3);
        assert_eq!(recent[0].error_message.as_deref(), Some("failure 3"));
        assert_eq!(recent[1].input_snapshot, json!({"n": 2}));
        assert!(ledger.recent_attempts("g2", "sql_generation", 2).await.unwrap().is_empty());
    }
}
