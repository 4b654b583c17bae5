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

use std::path::Path;

use anyhow::{Context, Result};
use estel::Row;
use serde_json::{json, Value};

pub struct CsvTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Reads a headed CSV file. Integers and floats become JSON numbers, empty
/// fields become null, everything else stays a string.
pub fn load_csv(path: &Path) -> Result<CsvTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let columns: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading CSV record {}", line + 1))?;
        let row: Row = columns
            .iter()
            .zip(record.iter())
            .map(|(column, field)| (column.clone(), infer_value(field)))
            .collect();
        rows.push(row);
    }
    Ok(CsvTable { columns, rows })
}

fn infer_value(field: &str) -> Value {
    let field = field.trim();
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = field.parse::<i64>() {
        return json!(i);
    }
    match field.parse::<f64>() {
        Ok(f) if f.is_finite() => json!(f),
        _ => json!(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_numbers_are_inferred() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "category,amount,units").unwrap();
        writeln!(file, "books,12.5,3").unwrap();
        writeln!(file, "games,,4").unwrap();
        file.flush().unwrap();

        let table = load_csv(file.path()).unwrap();
        assert_eq!(table.columns, vec!["category", "amount", "units"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["amount"], json!(12.5));
        assert_eq!(table.rows[0]["units"], json!(3));
        assert_eq!(table.rows[1]["amount"], Value::Null);
        assert_eq!(table.rows[1]["category"], json!("games"));
    }

    #[test]
    fn test_nan_stays_text() {
        assert_eq!(infer_value("NaN"), json!("NaN"));
        assert_eq!(infer_value(" 7 "), json!(7));
    }
}
