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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One result or sample row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub declared_type: String,
    pub row_count: u64,
    pub unique_count: u64,
    pub cardinality_ratio: f64,
    pub null_percentage: f64,
    pub sample_values: Vec<Value>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Dimension,
    Measure,
    Identifier,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Numerical,
    Categorical,
    Text,
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Heuristic,
    AiRefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedField {
    #[serde(flatten)]
    pub profile: ColumnProfile,
    pub role: FieldRole,
    pub semantic_type: SemanticType,
    /// Set when an AI review overrode the heuristic role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub dimension: Option<String>,
    pub measure: Option<String>,
    pub suitable: bool,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataQuality {
    pub score: f64,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub fields: Vec<AnnotatedField>,
    pub recommendation: Recommendation,
    pub data_quality: DataQuality,
    pub source: AnalysisSource,
}

impl FieldRole {
    /// Parses a role name as returned by a reviewer. `exclude` means the
    /// column should not be charted at all.
    pub fn from_review(role: &str) -> Option<Self> {
        match role.trim().to_ascii_lowercase().as_str() {
            "dimension" => Some(FieldRole::Dimension),
            "measure" => Some(FieldRole::Measure),
            "identifier" | "id" => Some(FieldRole::Identifier),
            "exclude" | "unknown" => Some(FieldRole::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldRole::Dimension => "dimension",
            FieldRole::Measure => "measure",
            FieldRole::Identifier => "identifier",
            FieldRole::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Numerical => "numerical",
            SemanticType::Categorical => "categorical",
            SemanticType::Text => "text",
            SemanticType::Temporal => "temporal",
        };
        f.write_str(name)
    }
}

impl AnnotatedField {
    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

impl FieldAnalysis {
    pub fn field(&self, name: &str) -> Option<&AnnotatedField> {
        self.fields.iter().find(|f| f.profile.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn with_role(&self, role: FieldRole) -> impl Iterator<Item = &AnnotatedField> {
        self.fields.iter().filter(move |f| f.role == role)
    }

    /// First dimension and first measure in column order.
    pub fn first_pair(&self) -> Option<(String, String)> {
        let dimension = self.with_role(FieldRole::Dimension).next()?;
        let measure = self.with_role(FieldRole::Measure).next()?;
        Some((dimension.name().to_string(), measure.name().to_string()))
    }

    /// The recommended pair when both halves are present.
    pub fn recommended_pair(&self) -> Option<(String, String)> {
        match (&self.recommendation.dimension, &self.recommendation.measure) {
            (Some(d), Some(m)) => Some((d.clone(), m.clone())),
            _ => None,
        }
    }
}
