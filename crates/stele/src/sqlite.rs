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

//! SQLite-backed [`DataStore`].

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use estel::{ColumnProfile, Row};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{ensure_read_only, quote_identifier, DataStore};

const SAMPLE_VALUES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Real,
    Text,
}

impl Affinity {
    fn sql(self) -> &'static str {
        match self {
            Affinity::Integer => "INTEGER",
            Affinity::Real => "REAL",
            Affinity::Text => "TEXT",
        }
    }

    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut affinity = Affinity::Integer;
        let mut seen = false;
        for value in values {
            match value {
                Value::Null => continue,
                Value::Number(n) if n.is_i64() || n.is_u64() => {}
                Value::Number(_) => affinity = Affinity::Real,
                _ => return Affinity::Text,
            }
            seen = true;
        }
        if seen {
            affinity
        } else {
            Affinity::Text
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    datasets: RwLock<HashMap<String, String>>,
}

impl SqliteStore {
    /// A private in-memory database. A single connection is kept open for the
    /// lifetime of the store, since closing it would discard the data.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub async fn connect(path: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!(path, "Connected SQLite data store");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            datasets: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn register_dataset(&self, dataset_id: &str, table_name: &str) {
        self.datasets
            .write()
            .await
            .insert(dataset_id.to_string(), table_name.to_string());
    }

    async fn table_for(&self, dataset_id: &str) -> StoreResult<String> {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDataset(dataset_id.to_string()))
    }

    /// Creates (or replaces) `table_name` from JSON rows and registers it
    /// under `dataset_id`. Column affinities are inferred from the values.
    pub async fn import_rows(
        &self,
        dataset_id: &str,
        table_name: &str,
        columns: &[String],
        rows: &[Row],
    ) -> StoreResult<usize> {
        if columns.is_empty() {
            return Err(StoreError::InvalidQuery(format!(
                "cannot import '{table_name}' without columns"
            )));
        }
        let table = quote_identifier(table_name);
        let definitions = columns
            .iter()
            .map(|c| {
                let affinity = Affinity::infer(rows.iter().filter_map(|r| r.get(c)));
                format!("{} {}", quote_identifier(c), affinity.sql())
            })
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {table} ({definitions})"))
            .execute(&mut *tx)
            .await?;
        for row in rows {
            let mut query = sqlx::query(&insert_sql);
            for column in columns {
                query = bind_json(query, row.get(column));
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.register_dataset(dataset_id, table_name).await;
        info!(dataset_id, table = table_name, rows = rows.len(), "Imported dataset");
        Ok(rows.len())
    }

    async fn profile_column(
        &self,
        table: &str,
        name: &str,
        declared_type: String,
        row_count: u64,
    ) -> StoreResult<ColumnProfile> {
        let column = quote_identifier(name);
        let stats = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT {column}) AS unique_count, \
             SUM(CASE WHEN {column} IS NULL THEN 1 ELSE 0 END) AS null_count, \
             CAST(MIN(CASE WHEN typeof({column}) IN ('integer', 'real') THEN {column} END) AS REAL) AS min_value, \
             CAST(MAX(CASE WHEN typeof({column}) IN ('integer', 'real') THEN {column} END) AS REAL) AS max_value \
             FROM {table}"
        ))
        .fetch_one(&self.pool)
        .await?;

        let unique_count = count(stats.try_get::<i64, _>("unique_count")?);
        let null_count = count(stats.try_get::<Option<i64>, _>("null_count")?.unwrap_or(0));
        let min_value: Option<f64> = stats.try_get("min_value")?;
        let max_value: Option<f64> = stats.try_get("max_value")?;

        let samples = sqlx::query(&format!(
            "SELECT DISTINCT {column} FROM {table} WHERE {column} IS NOT NULL LIMIT ?1"
        ))
        .bind(SAMPLE_VALUES)
        .fetch_all(&self.pool)
        .await?;
        let sample_values = samples
            .iter()
            .map(|row| cell_to_json(row, 0))
            .collect::<StoreResult<Vec<_>>>()?;

        let non_null = row_count.saturating_sub(null_count);
        Ok(ColumnProfile {
            name: name.to_string(),
            declared_type,
            row_count,
            unique_count,
            cardinality_ratio: if non_null > 0 {
                unique_count as f64 / non_null as f64
            } else {
                0.0
            },
            null_percentage: if row_count > 0 {
                null_count as f64 / row_count as f64 * 100.0
            } else {
                0.0
            },
            sample_values,
            min_value,
            max_value,
        })
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn column_profiles(&self, dataset_id: &str) -> StoreResult<Vec<ColumnProfile>> {
        let table_name = self.table_for(dataset_id).await?;
        let columns = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table_name.as_str())
            .fetch_all(&self.pool)
            .await?;
        if columns.is_empty() {
            return Err(StoreError::UnknownTable {
                table: table_name.clone(),
                message: format!("dataset '{dataset_id}' points at a missing table"),
            });
        }

        let table = quote_identifier(&table_name);
        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;

        let mut profiles = Vec::with_capacity(columns.len());
        for column in &columns {
            let name: String = column.try_get("name")?;
            let declared_type: String = column.try_get("type")?;
            profiles.push(
                self.profile_column(&table, &name, declared_type, count(row_count))
                    .await?,
            );
        }
        debug!(dataset_id, columns = profiles.len(), "Profiled dataset");
        Ok(profiles)
    }

    async fn sample_rows(&self, table_name: &str, limit: usize) -> StoreResult<Vec<Row>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} LIMIT ?1",
            quote_identifier(table_name)
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute_query(&self, table_name: &str, query: &str) -> StoreResult<Vec<Row>> {
        let statement = ensure_read_only(query)?;
        debug!(table = table_name, sql = statement, "Executing query");
        let rows = sqlx::query(statement).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_json).collect()
    }
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn bind_json<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Option<&Value>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        None | Some(Value::Null) => query.bind(None::<String>),
        Some(Value::Bool(b)) => query.bind(*b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Some(Value::String(s)) => query.bind(s.clone()),
        Some(other) => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &SqliteRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), cell_to_json(row, index)?);
    }
    Ok(out)
}

/// Decodes one cell by the storage class of the value itself, since
/// expression columns carry no declared type.
fn cell_to_json(row: &SqliteRow, index: usize) -> StoreResult<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "INT8" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(index)?),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            let f = row.try_get_unchecked::<f64, _>(index)?;
            serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> (Vec<String>, Vec<Row>) {
        let columns = vec!["region".to_string(), "amount".to_string(), "units".to_string()];
        let data = [
            ("north", json!(10.5), json!(1)),
            ("south", json!(20.0), json!(2)),
            ("north", json!(5.25), Value::Null),
            ("east", json!(7.0), json!(4)),
        ];
        let rows = data
            .iter()
            .map(|(r, a, u)| {
                let mut row = Row::new();
                row.insert("region".into(), json!(r));
                row.insert("amount".into(), a.clone());
                row.insert("units".into(), u.clone());
                row
            })
            .collect();
        (columns, rows)
    }

    async fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        let (columns, rows) = rows();
        store.import_rows("ds-1", "sales", &columns, &rows).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_profiles() {
        let store = store().await;
        let profiles = store.column_profiles("ds-1").await.unwrap();
        assert_eq!(profiles.len(), 3);

        let region = &profiles[0];
        assert_eq!(region.name, "region");
        assert_eq!(region.declared_type, "TEXT");
        assert_eq!(region.unique_count, 3);
        assert_eq!(region.row_count, 4);
        assert!(region.min_value.is_none());

        let amount = &profiles[1];
        assert_eq!(amount.declared_type, "REAL");
        assert_eq!(amount.min_value, Some(5.25));
        assert_eq!(amount.max_value, Some(20.0));

        let units = &profiles[2];
        assert_eq!(units.declared_type, "INTEGER");
        assert_eq!(units.null_percentage, 25.0);
        assert_eq!(units.cardinality_ratio, 1.0);
    }

    #[tokio::test]
    async fn test_aggregate_query_rows() {
        let store = store().await;
        let rows = store
            .execute_query(
                "sales",
                "SELECT region, SUM(amount) AS amount FROM sales GROUP BY region ORDER BY amount DESC",
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["region"], "south");
        assert_eq!(rows[0]["amount"], json!(20.0));
        assert_eq!(rows[1]["amount"], json!(15.75));
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let store = store().await;
        let err = store
            .execute_query("sales", "SELECT regon, SUM(amount) FROM sales GROUP BY regon")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "regon"));

        let err = store.execute_query("sales", "SELECT * FROM sale").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable { .. }));

        let err = store.execute_query("sales", "DELETE FROM sales").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));

        assert!(matches!(
            store.column_profiles("missing").await,
            Err(StoreError::UnknownDataset(_))
        ));
    }

    #[tokio::test]
    async fn test_sample_rows_limit() {
        let store = store().await;
        let rows = store.sample_rows("sales", 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains_key("units"));
    }
}
