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

//! Deterministic clean-up of generated chart specifications.
//!
//! Generated specs are never trusted for data or field names: rows are
//! injected here and the field bindings are overwritten from the actual
//! field mapping.

use crate::chart_knowledge::{base_spec, ChartType};
use crate::classifier::numeric_value;
use crate::error::{ChartError, Result};
use crate::profile::Row;
use serde_json::{json, Map, Number, Value};
use tracing::{debug, warn};

const WRAPPER_KEYS: [&str; 3] = ["spec", "chart_spec", "chartSpec"];

/// Reshapes query results into `{dimension: category, measure: number}` rows.
///
/// Columns are matched by exact name first, so results whose aliases differ
/// from the mapping (`SUM(amount)`, `total_amount`, `value`) still resolve.
/// Rows without a numeric measure are dropped.
pub fn standardize_rows(results: &[Row], dimension: &str, measure: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::with_capacity(results.len());
    for source in results {
        let Some(category_key) = category_key(source, dimension) else {
            continue;
        };
        let Some(value_key) = value_key(source, measure, category_key) else {
            continue;
        };
        let Some(value) = source.get(value_key).and_then(plottable_number) else {
            continue;
        };
        let category = match source.get(category_key) {
            None | Some(Value::Null) => Value::String("Unknown".to_string()),
            Some(Value::String(s)) => Value::String(s.clone()),
            Some(other) => Value::String(other.to_string()),
        };

        let mut row = Row::new();
        row.insert(dimension.to_string(), category);
        row.insert(measure.to_string(), Value::Number(value));
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ChartError::NoPlottableRows {
            measure: measure.to_string(),
            total: results.len(),
        });
    }
    if rows.len() < results.len() {
        debug!(kept = rows.len(), total = results.len(), "Dropped rows without a plottable value");
    }
    Ok(rows)
}

fn category_key<'a>(row: &'a Row, dimension: &str) -> Option<&'a str> {
    find_key(row, |k| k == dimension)
        .or_else(|| find_key(row, |k| k.eq_ignore_ascii_case(dimension)))
        .or_else(|| find_key(row, |k| k.eq_ignore_ascii_case("category")))
        .or_else(|| {
            row.iter()
                .find(|(_, v)| numeric_value(v).is_none())
                .map(|(k, _)| k.as_str())
        })
}

fn value_key<'a>(row: &'a Row, measure: &str, category_key: &str) -> Option<&'a str> {
    let lowered = measure.to_ascii_lowercase();
    find_key(row, |k| k == measure && k != category_key)
        .or_else(|| find_key(row, |k| k != category_key && k.eq_ignore_ascii_case(measure)))
        .or_else(|| find_key(row, |k| k != category_key && k.to_ascii_lowercase().contains(&lowered)))
        .or_else(|| find_key(row, |k| k.eq_ignore_ascii_case("value")))
        .or_else(|| {
            row.iter()
                .find(|(k, v)| k.as_str() != category_key && numeric_value(v).is_some())
                .map(|(k, _)| k.as_str())
        })
}

fn find_key<'a>(row: &'a Row, predicate: impl Fn(&str) -> bool) -> Option<&'a str> {
    row.keys().map(String::as_str).find(|k| predicate(k))
}

fn plottable_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        other => numeric_value(other).and_then(Number::from_f64),
    }
}

/// Forces a generated spec into agreement with the data and field mapping.
pub fn post_process(spec: Value, chart_type: ChartType, rows: &[Row], dimension: &str, measure: &str, title: &str) -> Value {
    // Scrubbed before injection so row values are never touched.
    let mut spec = unwrap_spec(spec);
    let removed = scrub_executable(&mut spec);
    if removed > 0 {
        warn!(removed, "Removed executable values from chart spec");
    }

    let mut spec = match spec {
        Value::Object(map) => map,
        other => {
            warn!(kind = json_kind(&other), "Generated spec is not an object, using base template");
            match base_spec(chart_type) {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        }
    };

    spec.insert("type".to_string(), json!(chart_type.as_str()));
    inject_data(&mut spec, rows);
    bind_fields(&mut spec, chart_type, dimension, measure);
    rewrite_tooltip(&mut spec, dimension, measure);
    if !spec.contains_key("title") && !is_executable(title) {
        spec.insert("title".to_string(), json!({"visible": true, "text": title}));
    }

    Value::Object(spec)
}

fn unwrap_spec(spec: Value) -> Value {
    if let Value::Object(map) = &spec {
        if map.len() == 1 {
            for key in WRAPPER_KEYS {
                if let Some(inner) = map.get(key).filter(|v| v.is_object()) {
                    return inner.clone();
                }
            }
        }
    }
    spec
}

fn inject_data(spec: &mut Map<String, Value>, rows: &[Row]) {
    let values = Value::Array(rows.iter().cloned().map(Value::Object).collect());
    match spec.get_mut("data") {
        Some(Value::Array(entries)) if entries.first().is_some_and(Value::is_object) => {
            entries.truncate(1);
            if let Some(Value::Object(entry)) = entries.first_mut() {
                entry.entry("id").or_insert_with(|| json!("id0"));
                entry.insert("values".to_string(), values);
            }
        }
        _ => {
            spec.insert("data".to_string(), json!([{"id": "id0", "values": values}]));
        }
    }
}

fn bind_fields(spec: &mut Map<String, Value>, chart_type: ChartType, dimension: &str, measure: &str) {
    let (category_key, value_key) = chart_type.field_keys();
    let stale: Vec<&str> = ChartType::all()
        .iter()
        .flat_map(|t| {
            let (c, v) = t.field_keys();
            [c, v]
        })
        .filter(|k| *k != category_key && *k != value_key)
        .collect();

    let apply = |target: &mut Map<String, Value>| {
        for key in &stale {
            target.remove(*key);
        }
        target.insert(category_key.to_string(), json!(dimension));
        target.insert(value_key.to_string(), json!(measure));
    };

    apply(spec);
    if let Some(Value::Array(series)) = spec.get_mut("series") {
        for entry in series.iter_mut() {
            if let Value::Object(entry) = entry {
                apply(entry);
            }
        }
    }
}

fn rewrite_tooltip(spec: &mut Map<String, Value>, dimension: &str, measure: &str) {
    let content = json!([{"key": format!("{{{dimension}}}"), "value": format!("{{{measure}}}")}]);
    let tooltip = spec
        .entry("tooltip")
        .or_insert_with(|| json!({}));
    if !tooltip.is_object() {
        *tooltip = json!({});
    }
    if let Value::Object(tooltip) = tooltip {
        tooltip.insert("mark".to_string(), json!({"content": content.clone()}));
        if tooltip.contains_key("dimension") {
            tooltip.insert("dimension".to_string(), json!({"content": content}));
        }
    }
}

fn is_executable(s: &str) -> bool {
    let declares_function = s
        .trim_start()
        .strip_prefix("function")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| c == '(' || c.is_whitespace()));
    declares_function || s.contains("=>") || s.contains("function(") || s.contains("function (")
}

/// Removes executable-looking strings in place, returning how many went.
fn scrub_executable(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|_, v| !v.as_str().is_some_and(is_executable));
            let mut removed = before - map.len();
            for v in map.values_mut() {
                removed += scrub_executable(v);
            }
            removed
        }
        Value::Array(items) => {
            let before = items.len();
            items.retain(|v| !v.as_str().is_some_and(is_executable));
            let mut removed = before - items.len();
            for v in items.iter_mut() {
                removed += scrub_executable(v);
            }
            removed
        }
        _ => 0,
    }
}

fn find_executable(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::String(s) if is_executable(s) => Some(path.to_string()),
        Value::Object(map) => map
            .iter()
            .find_map(|(k, v)| find_executable(v, &format!("{path}.{k}"))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_executable(v, &format!("{path}[{i}]"))),
        _ => None,
    }
}

/// Like `find_executable`, but `data[*].values` holds row values, which are
/// plain data whatever they look like.
fn find_executable_outside_rows(spec: &Map<String, Value>) -> Option<String> {
    spec.iter().find_map(|(key, value)| match (key.as_str(), value) {
        ("data", Value::Array(entries)) => entries.iter().enumerate().find_map(|(i, entry)| match entry {
            Value::Object(entry) => entry
                .iter()
                .filter(|(k, _)| k.as_str() != "values")
                .find_map(|(k, v)| find_executable(v, &format!("$.data[{i}].{k}"))),
            other => find_executable(other, &format!("$.data[{i}]")),
        }),
        _ => find_executable(value, &format!("$.{key}")),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Checks that a spec is pure data: an object with a type and a data slot,
/// free of executable strings, and unchanged by a JSON encode/decode cycle.
pub fn ensure_data_serializable(spec: &Value) -> Result<()> {
    let Value::Object(map) = spec else {
        return Err(ChartError::InvalidSpec {
            reason: format!("expected an object, found {}", json_kind(spec)),
        });
    };
    for key in ["type", "data"] {
        if !map.contains_key(key) {
            return Err(ChartError::InvalidSpec {
                reason: format!("missing '{key}'"),
            });
        }
    }
    if let Some(path) = find_executable_outside_rows(map) {
        return Err(ChartError::ExecutableValue { path });
    }

    let encoded = serde_json::to_string(spec).map_err(|e| ChartError::NotSerializable { reason: e.to_string() })?;
    let decoded: Value =
        serde_json::from_str(&encoded).map_err(|e| ChartError::NotSerializable { reason: e.to_string() })?;
    if decoded != *spec {
        return Err(ChartError::NotSerializable {
            reason: "JSON round trip altered the specification".to_string(),
        });
    }
    Ok(())
}
