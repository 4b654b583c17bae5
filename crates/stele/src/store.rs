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

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use estel::{ColumnProfile, Row};

/// Tabular data behind a chart generation.
///
/// Implementations classify failures into [`StoreError`] variants where they
/// are raised, so callers never inspect message text.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn column_profiles(&self, dataset_id: &str) -> StoreResult<Vec<ColumnProfile>>;

    async fn sample_rows(&self, table_name: &str, limit: usize) -> StoreResult<Vec<Row>>;

    /// Runs a read-only query. Fails on invalid SQL or unknown table/column.
    async fn execute_query(&self, table_name: &str, query: &str) -> StoreResult<Vec<Row>>;
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rejects anything but a single `SELECT`/`WITH` statement.
pub fn ensure_read_only(query: &str) -> StoreResult<&str> {
    let statement = query.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        return Err(StoreError::InvalidQuery("empty query".to_string()));
    }
    let head = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if head != "select" && head != "with" {
        return Err(StoreError::InvalidQuery(format!(
            "only SELECT queries are allowed, got '{head}'"
        )));
    }
    if has_unquoted_semicolon(statement) {
        return Err(StoreError::InvalidQuery(
            "multiple statements are not allowed".to_string(),
        ));
    }
    Ok(statement)
}

/// Doubled quotes inside a literal toggle twice, so SQL escaping needs no
/// special case.
fn has_unquoted_semicolon(statement: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in statement.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (None, ';') => return true,
            (Some(open), c) if c == open => quote = None,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("region"), "\"region\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_read_only_guard() {
        assert_eq!(ensure_read_only(" SELECT 1; ").unwrap(), "SELECT 1");
        assert!(ensure_read_only("with t as (select 1) select * from t").is_ok());
        assert!(ensure_read_only("DELETE FROM sales").is_err());
        assert!(ensure_read_only("SELECT 1; DROP TABLE sales").is_err());
        assert!(ensure_read_only("   ").is_err());
    }

    #[test]
    fn test_semicolons_inside_literals_are_allowed() {
        let query = "SELECT region FROM sales WHERE note != 'a;b' AND \"odd;col\" IS NOT NULL";
        assert_eq!(ensure_read_only(query).unwrap(), query);
        assert!(ensure_read_only("SELECT 'it''s;fine'").is_ok());
        assert!(ensure_read_only("SELECT 'a;b'; DELETE FROM sales").is_err());
    }
}
