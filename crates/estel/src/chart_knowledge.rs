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

use crate::classifier::numeric_value;
use crate::error::KnowledgeError;
use crate::profile::{Row, SemanticType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Pie,
    Bar,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldBinding {
    CategoryValue,
    XY,
}

#[derive(Debug, Clone)]
pub struct ChartKnowledge {
    pub chart_type: ChartType,
    pub description: &'static str,
    pub min_dimensions: usize,
    pub min_measures: usize,
    pub max_categories: Option<usize>,
    pub requires_positive_values: bool,
    pub binding: FieldBinding,
    pub intent_keywords: &'static [&'static str],
    pub rules: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidation {
    pub valid: bool,
    pub category_count: usize,
    pub issues: Vec<String>,
}

static PIE: ChartKnowledge = ChartKnowledge {
    chart_type: ChartType::Pie,
    description: "Part-to-whole composition of a single measure across categories",
    min_dimensions: 1,
    min_measures: 1,
    max_categories: Some(15),
    requires_positive_values: true,
    binding: FieldBinding::CategoryValue,
    intent_keywords: &["distribution", "share", "proportion", "breakdown", "composition", "percentage", "split"],
    rules: &[
        "Use 2-8 slices for best readability",
        "All values must be positive",
        "Group long tails into an 'Other' slice",
    ],
};
static BAR: ChartKnowledge = ChartKnowledge {
    chart_type: ChartType::Bar,
    description: "Comparison of a measure across discrete categories",
    min_dimensions: 1,
    min_measures: 1,
    max_categories: Some(30),
    requires_positive_values: false,
    binding: FieldBinding::XY,
    intent_keywords: &["compare", "comparison", "ranking", "rank ", " top ", "versus", " vs ", "highest", "lowest"],
    rules: &["Sort bars by value unless the categories are ordinal", "Start the value axis at zero"],
};
static LINE: ChartKnowledge = ChartKnowledge {
    chart_type: ChartType::Line,
    description: "Change of a measure over an ordered or temporal dimension",
    min_dimensions: 1,
    min_measures: 1,
    max_categories: None,
    requires_positive_values: false,
    binding: FieldBinding::XY,
    intent_keywords: &["trend", "over time", "timeline", "growth", "by month", "by year", "by day", "monthly", "yearly"],
    rules: &["Order points along the dimension", "Avoid more than a handful of series"],
};
impl ChartType {
    pub fn all() -> [ChartType; 3] {
        [ChartType::Pie, ChartType::Bar, ChartType::Line]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Pie => "pie",
            ChartType::Bar => "bar",
            ChartType::Line => "line",
        }
    }

    pub fn knowledge(&self) -> &'static ChartKnowledge {
        match self {
            ChartType::Pie => &PIE,
            ChartType::Bar => &BAR,
            ChartType::Line => &LINE,
        }
    }

    /// Spec keys that carry the category and value field names.
    pub fn field_keys(&self) -> (&'static str, &'static str) {
        match self.knowledge().binding {
            FieldBinding::CategoryValue => ("categoryField", "valueField"),
            FieldBinding::XY => ("xField", "yField"),
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = KnowledgeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pie" | "donut" | "doughnut" => Ok(ChartType::Pie),
            "bar" | "column" => Ok(ChartType::Bar),
            "line" | "area" => Ok(ChartType::Line),
            other => Err(KnowledgeError::UnknownChartType {
                name: other.to_string(),
            }),
        }
    }
}

/// Picks a chart family from the user's wording and the dimension's type.
///
/// An explicit "<type> chart" mention wins. Otherwise trend wording or a
/// temporal dimension selects a line chart, comparison wording a bar chart,
/// and distribution wording a pie chart. Pie is the fallback.
pub fn select_chart_type(intent: &str, dimension_type: Option<SemanticType>) -> ChartType {
    let intent = format!(" {} ", intent.to_lowercase());
    for chart_type in ChartType::all() {
        let name = chart_type.as_str();
        if intent.contains(&format!("{name} chart")) || intent.contains(&format!("{name} graph")) {
            return chart_type;
        }
    }
    let mentions = |knowledge: &ChartKnowledge| knowledge.intent_keywords.iter().any(|k| intent.contains(k));
    if mentions(&LINE) || dimension_type == Some(SemanticType::Temporal) {
        ChartType::Line
    } else if mentions(&BAR) {
        ChartType::Bar
    } else {
        ChartType::Pie
    }
}

/// Base specification for a chart family, with an empty data slot.
pub fn base_spec(chart_type: ChartType) -> Value {
    match chart_type {
        ChartType::Pie => json!({
            "type": "pie",
            "data": [{"id": "id0", "values": []}],
            "categoryField": "category",
            "valueField": "value",
            "outerRadius": 0.8,
            "innerRadius": 0,
            "legends": {"visible": true, "orient": "left"},
            "label": {"visible": true},
            "tooltip": {"mark": {"content": [{"key": "{category}", "value": "{value}"}]}}
        }),
        ChartType::Bar => json!({
            "type": "bar",
            "data": [{"id": "id0", "values": []}],
            "xField": "category",
            "yField": "value",
            "axes": [{"orient": "bottom"}, {"orient": "left", "zero": true}],
            "label": {"visible": false},
            "tooltip": {"mark": {"content": [{"key": "{category}", "value": "{value}"}]}}
        }),
        ChartType::Line => json!({
            "type": "line",
            "data": [{"id": "id0", "values": []}],
            "xField": "category",
            "yField": "value",
            "point": {"visible": true},
            "axes": [{"orient": "bottom"}, {"orient": "left"}],
            "tooltip": {"mark": {"content": [{"key": "{category}", "value": "{value}"}]}}
        }),
    }
}

/// Advisory suitability check of standardized rows for a chart family.
pub fn validate_data_for_chart(chart_type: ChartType, rows: &[Row], dimension: &str, measure: &str) -> DataValidation {
    let knowledge = chart_type.knowledge();
    let categories: HashSet<String> = rows
        .iter()
        .filter_map(|r| r.get(dimension))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let mut issues = Vec::new();

    if let Some(max) = knowledge.max_categories {
        if categories.len() > max {
            issues.push(format!(
                "{} categories exceeds the {} chart maximum of {max}",
                categories.len(),
                chart_type
            ));
        }
    }
    if categories.len() < 2 {
        issues.push(format!("Only {} category found; a {chart_type} chart needs at least 2", categories.len()));
    }
    if knowledge.requires_positive_values {
        let negatives = rows
            .iter()
            .filter_map(|r| r.get(measure).and_then(numeric_value))
            .filter(|v| *v < 0.0)
            .count();
        if negatives > 0 {
            issues.push(format!("{negatives} negative values cannot be shown as {chart_type} slices"));
        }
    }

    DataValidation {
        valid: issues.is_empty(),
        category_count: categories.len(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(category: &str, value: f64) -> Row {
        let mut r = Row::new();
        r.insert("region".into(), json!(category));
        r.insert("amount".into(), json!(value));
        r
    }

    #[test]
    fn test_select_chart_type() {
        assert_eq!(select_chart_type("show distribution by category", None), ChartType::Pie);
        assert_eq!(select_chart_type("compare revenue per region", None), ChartType::Bar);
        assert_eq!(select_chart_type("sales trend", None), ChartType::Line);
        assert_eq!(select_chart_type("revenue by day", Some(SemanticType::Temporal)), ChartType::Line);
        assert_eq!(select_chart_type("a bar chart of the breakdown", None), ChartType::Bar);
        assert_eq!(select_chart_type("anything", None), ChartType::Pie);
    }

    #[test]
    fn test_chart_type_parsing() {
        assert_eq!("Donut".parse::<ChartType>().unwrap(), ChartType::Pie);
        assert!("sankey".parse::<ChartType>().is_err());
    }

    #[test]
    fn test_validation_flags_are_advisory() {
        let rows = vec![row("north", 10.0), row("south", -2.0)];
        let result = validate_data_for_chart(ChartType::Pie, &rows, "region", "amount");
        assert!(!result.valid);
        assert_eq!(result.category_count, 2);
        assert!(result.issues[0].contains("negative"));

        let many: Vec<Row> = (0..20).map(|i| row(&format!("c{i}"), 1.0)).collect();
        let result = validate_data_for_chart(ChartType::Pie, &many, "region", "amount");
        assert!(result.issues.iter().any(|i| i.contains("exceeds")));
        assert!(validate_data_for_chart(ChartType::Line, &many, "region", "amount").valid);
    }

    #[test]
    fn test_base_spec_field_keys() {
        for chart_type in ChartType::all() {
            let spec = base_spec(chart_type);
            let (category_key, value_key) = chart_type.field_keys();
            assert_eq!(spec[category_key], "category");
            assert_eq!(spec[value_key], "value");
            assert_eq!(spec["type"], chart_type.as_str());
        }
    }
}
