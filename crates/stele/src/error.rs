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

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static NO_SUCH_COLUMN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)no such column:\s*([^\s,;)]+)"#).unwrap());
static MISSING_COLUMN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)column\s+"?([^"\s]+)"?\s+does not exist"#).unwrap());
static NO_SUCH_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)no such table:\s*([^\s,;)]+)"#).unwrap());

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Query pool is closed")]
    Closed,
    #[error("Timed out after {0}ms waiting for a query connection")]
    Timeout(u64),
    #[error("Pool configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("column \"{column}\" does not exist ({message})")]
    UnknownColumn { column: String, message: String },
    #[error("table \"{table}\" does not exist ({message})")]
    UnknownTable { table: String, message: String },
    #[error("dataset '{0}' is not registered")]
    UnknownDataset(String),
    #[error("query rejected: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Backend(String),
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("ledger backend error: {0}")]
    Backend(String),
    #[error("ledger serialisation error: {0}")]
    Serialisation(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

impl StoreError {
    /// Classifies a database error message at the point it is raised.
    pub fn classify(message: &str) -> Self {
        let message = message.trim().to_string();
        if let Some(caps) = NO_SUCH_COLUMN_RE
            .captures(&message)
            .or_else(|| MISSING_COLUMN_RE.captures(&message))
        {
            return StoreError::UnknownColumn {
                column: caps[1].trim_matches(['"', '\'', '`']).to_string(),
                message: message.clone(),
            };
        }
        if let Some(caps) = NO_SUCH_TABLE_RE.captures(&message) {
            return StoreError::UnknownTable {
                table: caps[1].trim_matches(['"', '\'', '`']).to_string(),
                message: message.clone(),
            };
        }
        StoreError::InvalidQuery(message)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => StoreError::classify(db.message()),
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::Serialisation(format!("column {index}: {source}"))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialisation(e.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialisation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sqlite_messages() {
        assert_eq!(
            StoreError::classify("no such column: regon"),
            StoreError::UnknownColumn {
                column: "regon".into(),
                message: "no such column: regon".into()
            }
        );
        assert!(matches!(
            StoreError::classify("no such table: sales_2023"),
            StoreError::UnknownTable { table, .. } if table == "sales_2023"
        ));
        assert!(matches!(
            StoreError::classify("near \"SELEC\": syntax error"),
            StoreError::InvalidQuery(_)
        ));
    }

    #[test]
    fn test_classify_postgres_style_message() {
        assert!(matches!(
            StoreError::classify("column \"amount_usd\" does not exist"),
            StoreError::UnknownColumn { column, .. } if column == "amount_usd"
        ));
    }
}
