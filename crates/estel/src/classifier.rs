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

use crate::profile::{
    AnalysisSource, AnnotatedField, ColumnProfile, DataQuality, FieldAnalysis, FieldRole,
    Recommendation, Row, SemanticType,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use llm_contracts::{decode_structured_response, GenerationRequest, TextGenerator};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marker line carried by the field review prompt.
pub const FIELD_REVIEW_TASK: &str = "TASK: field_role_review";

static ID_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(id|uuid|guid|key|pk)$|_(id|uuid|guid|key)$").unwrap());
static CAMEL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9](Id|ID|Uuid)$").unwrap());

const NUMERIC_TYPE_HINTS: [&str; 7] = ["int", "real", "float", "double", "numeric", "decimal", "number"];
const TEMPORAL_TYPE_HINTS: [&str; 3] = ["date", "time", "timestamp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub ai_enabled: bool,
    pub override_confidence: f64,
    pub min_dimension_values: u64,
    pub max_dimension_values: u64,
    pub max_categorical_cardinality: u64,
    pub categorical_ratio: f64,
    pub identifier_ratio: f64,
    pub null_issue_percentage: f64,
    pub temporal_formats: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            override_confidence: 0.7,
            min_dimension_values: 2,
            max_dimension_values: 20,
            max_categorical_cardinality: 50,
            categorical_ratio: 0.5,
            identifier_ratio: 0.95,
            null_issue_percentage: 20.0,
            temporal_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
                "%m/%d/%Y".to_string(),
                "%d/%m/%Y".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct FieldReview {
    #[serde(default)]
    field_analysis: Vec<FieldVerdict>,
    #[serde(default, alias = "recommendation")]
    pie_chart_recommendation: Option<ReviewRecommendation>,
    #[serde(default)]
    data_quality: Option<ReviewQuality>,
}

#[derive(Debug, Deserialize)]
struct FieldVerdict {
    field_name: String,
    recommended_role: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewRecommendation {
    #[serde(default)]
    suitable: bool,
    #[serde(default)]
    recommended_dimension: Option<String>,
    #[serde(default)]
    recommended_measure: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewQuality {
    #[serde(default)]
    overall_score: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
}

/// Annotates column profiles with roles and picks a dimension/measure pair.
///
/// Deterministic heuristics always run first. When a generator is attached
/// the heuristic result is sent for review and role overrides above
/// `override_confidence` are merged in. A failed or unparseable review yields
/// the heuristic result unchanged; classification itself never fails.
pub struct FieldRoleClassifier {
    generator: Option<Arc<dyn TextGenerator>>,
    config: ClassifierConfig,
}

impl FieldRoleClassifier {
    pub fn heuristic(config: ClassifierConfig) -> Self {
        Self {
            generator: None,
            config,
        }
    }

    pub fn new(generator: Arc<dyn TextGenerator>, config: ClassifierConfig) -> Self {
        Self {
            generator: Some(generator),
            config,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub async fn classify(
        &self,
        table_name: &str,
        profiles: &[ColumnProfile],
        sample_rows: &[Row],
    ) -> FieldAnalysis {
        let heuristic = self.classify_heuristically(profiles);
        let generator = match &self.generator {
            Some(g) if self.config.ai_enabled && !profiles.is_empty() => g,
            _ => return heuristic,
        };

        let request = GenerationRequest::new(self.review_prompt(table_name, &heuristic, sample_rows))
            .with_system_prompt("You are a meticulous data analyst. Answer with JSON only.");
        let text = match generator.generate_text(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, table = table_name, "Field review failed, using heuristic roles");
                return heuristic;
            }
        };
        match decode_structured_response::<FieldReview>(&text) {
            Ok(review) => {
                let merged = self.merge_review(&heuristic, review);
                info!(
                    table = table_name,
                    dimension = ?merged.recommendation.dimension,
                    measure = ?merged.recommendation.measure,
                    "Field roles refined by review"
                );
                merged
            }
            Err(e) => {
                warn!(error = %e, table = table_name, "Unparseable field review, using heuristic roles");
                heuristic
            }
        }
    }

    pub fn classify_heuristically(&self, profiles: &[ColumnProfile]) -> FieldAnalysis {
        let fields: Vec<AnnotatedField> = profiles
            .iter()
            .map(|profile| {
                let semantic_type = self.semantic_type(profile);
                AnnotatedField {
                    profile: profile.clone(),
                    role: self.heuristic_role(profile, semantic_type),
                    semantic_type,
                    override_confidence: None,
                    reasoning: None,
                }
            })
            .collect();
        let recommendation = self.recommend(&fields);
        let data_quality = self.assess_quality(&fields, &recommendation);
        debug!(
            fields = fields.len(),
            dimension = ?recommendation.dimension,
            measure = ?recommendation.measure,
            "Heuristic field classification"
        );
        FieldAnalysis {
            fields,
            recommendation,
            data_quality,
            source: AnalysisSource::Heuristic,
        }
    }

    pub fn semantic_type(&self, profile: &ColumnProfile) -> SemanticType {
        let declared = profile.declared_type.to_ascii_lowercase();
        if TEMPORAL_TYPE_HINTS.iter().any(|t| declared.contains(t)) {
            return SemanticType::Temporal;
        }
        if NUMERIC_TYPE_HINTS.iter().any(|t| declared.contains(t)) {
            return SemanticType::Numerical;
        }

        let samples: Vec<&Value> = profile.sample_values.iter().filter(|v| !v.is_null()).collect();
        if !samples.is_empty() {
            if samples.iter().all(|v| numeric_value(v).is_some()) {
                return SemanticType::Numerical;
            }
            if samples
                .iter()
                .all(|v| v.as_str().is_some_and(|s| self.looks_temporal(s)))
            {
                return SemanticType::Temporal;
            }
        }

        if profile.unique_count <= self.config.max_categorical_cardinality
            || profile.cardinality_ratio <= self.config.categorical_ratio
        {
            SemanticType::Categorical
        } else {
            SemanticType::Text
        }
    }

    fn heuristic_role(&self, profile: &ColumnProfile, semantic_type: SemanticType) -> FieldRole {
        if self.looks_like_identifier(profile, semantic_type) {
            return FieldRole::Identifier;
        }
        match semantic_type {
            SemanticType::Numerical => FieldRole::Measure,
            SemanticType::Categorical | SemanticType::Temporal => FieldRole::Dimension,
            SemanticType::Text => FieldRole::Unknown,
        }
    }

    fn looks_like_identifier(&self, profile: &ColumnProfile, semantic_type: SemanticType) -> bool {
        if ID_NAME_RE.is_match(&profile.name) || CAMEL_ID_RE.is_match(&profile.name) {
            return true;
        }
        semantic_type != SemanticType::Numerical
            && profile.cardinality_ratio >= self.config.identifier_ratio
            && profile.unique_count > self.config.max_dimension_values
    }

    fn looks_temporal(&self, value: &str) -> bool {
        let value = value.trim();
        DateTime::parse_from_rfc3339(value).is_ok()
            || self.config.temporal_formats.iter().any(|format| {
                NaiveDate::parse_from_str(value, format).is_ok()
                    || NaiveDateTime::parse_from_str(value, format).is_ok()
            })
    }

    fn dimension_range(&self) -> std::ops::RangeInclusive<u64> {
        self.config.min_dimension_values..=self.config.max_dimension_values
    }

    fn recommend(&self, fields: &[AnnotatedField]) -> Recommendation {
        let range = self.dimension_range();
        let candidates = |semantic: SemanticType| {
            fields
                .iter()
                .filter(|f| f.role == FieldRole::Dimension && f.semantic_type == semantic)
                .filter(|f| range.contains(&f.profile.unique_count))
                .min_by_key(|f| f.profile.unique_count)
        };
        let dimension = candidates(SemanticType::Categorical).or_else(|| candidates(SemanticType::Temporal));
        let measure = fields.iter().find(|f| f.role == FieldRole::Measure);

        match (dimension, measure) {
            (Some(d), Some(m)) => Recommendation {
                dimension: Some(d.name().to_string()),
                measure: Some(m.name().to_string()),
                suitable: true,
                confidence: 0.7,
                reasoning: format!(
                    "'{}' has {} distinct values and '{}' is numeric",
                    d.name(),
                    d.profile.unique_count,
                    m.name()
                ),
            },
            (d, m) => Recommendation {
                dimension: d.map(|f| f.name().to_string()),
                measure: m.map(|f| f.name().to_string()),
                suitable: false,
                confidence: 0.3,
                reasoning: format!(
                    "No categorical column with {}-{} distinct values paired with a numeric column",
                    range.start(),
                    range.end()
                ),
            },
        }
    }

    fn assess_quality(&self, fields: &[AnnotatedField], recommendation: &Recommendation) -> DataQuality {
        if fields.is_empty() {
            return DataQuality {
                score: 0.0,
                issues: vec!["Dataset has no columns".to_string()],
            };
        }
        let mean_null = fields.iter().map(|f| f.profile.null_percentage).sum::<f64>() / fields.len() as f64;
        let mut issues: Vec<String> = fields
            .iter()
            .filter(|f| f.profile.null_percentage > self.config.null_issue_percentage)
            .map(|f| format!("Column '{}' is {:.1}% null", f.name(), f.profile.null_percentage))
            .collect();
        if !recommendation.suitable {
            issues.push("No suitable dimension/measure pair found".to_string());
        }
        DataQuality {
            score: (1.0 - mean_null / 100.0).clamp(0.0, 1.0),
            issues,
        }
    }

    fn merge_review(&self, heuristic: &FieldAnalysis, review: FieldReview) -> FieldAnalysis {
        let mut fields = heuristic.fields.clone();
        for field in &mut fields {
            let Some(verdict) = review.field_analysis.iter().find(|v| v.field_name == field.profile.name) else {
                continue;
            };
            if verdict.confidence <= self.config.override_confidence {
                continue;
            }
            if let Some(role) = FieldRole::from_review(&verdict.recommended_role) {
                if role != field.role {
                    debug!(field = %field.profile.name, from = %field.role, to = %role, "Role override accepted");
                }
                field.role = role;
                field.override_confidence = Some(verdict.confidence);
                field.reasoning = verdict.reasoning.clone();
            }
        }

        let recommendation = review
            .pie_chart_recommendation
            .and_then(|r| self.accept_recommendation(&fields, r))
            .unwrap_or_else(|| self.recommend(&fields));

        let mut data_quality = self.assess_quality(&fields, &recommendation);
        if let Some(quality) = review.data_quality {
            if let Some(score) = quality.overall_score {
                data_quality.score = score.clamp(0.0, 1.0);
            }
            for issue in quality.issues {
                if !data_quality.issues.contains(&issue) {
                    data_quality.issues.push(issue);
                }
            }
        }

        FieldAnalysis {
            fields,
            recommendation,
            data_quality,
            source: AnalysisSource::AiRefined,
        }
    }

    fn accept_recommendation(&self, fields: &[AnnotatedField], rec: ReviewRecommendation) -> Option<Recommendation> {
        if rec.confidence <= self.config.override_confidence {
            return None;
        }
        let dimension = fields.iter().find(|f| Some(f.name()) == rec.recommended_dimension.as_deref())?;
        let measure = fields.iter().find(|f| Some(f.name()) == rec.recommended_measure.as_deref())?;
        if measure.semantic_type != SemanticType::Numerical || dimension.name() == measure.name() {
            return None;
        }
        Some(Recommendation {
            dimension: Some(dimension.name().to_string()),
            measure: Some(measure.name().to_string()),
            suitable: rec.suitable,
            confidence: rec.confidence.clamp(0.0, 1.0),
            reasoning: rec.reasoning.unwrap_or_default(),
        })
    }

    fn review_prompt(&self, table_name: &str, heuristic: &FieldAnalysis, sample_rows: &[Row]) -> String {
        let columns = heuristic
            .fields
            .iter()
            .map(|f| {
                format!(
                    "- {} ({}) heuristic={}/{} unique={} ratio={:.3} nulls={:.1}% samples={}",
                    f.name(),
                    f.profile.declared_type,
                    f.role,
                    f.semantic_type,
                    f.profile.unique_count,
                    f.profile.cardinality_ratio,
                    f.profile.null_percentage,
                    Value::Array(f.profile.sample_values.clone())
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let samples = serde_json::to_string_pretty(sample_rows).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{FIELD_REVIEW_TASK}\n\n\
             Review the column roles of table \"{table_name}\" for charting.\n\n\
             Columns:\n{columns}\n\n\
             Heuristic candidates: dimension={:?}, measure={:?}\n\n\
             Sample rows:\n{samples}\n\n\
             Roles: dimension (grouping category, ideally 2-{} distinct values), measure (numeric, \
             summable), identifier (keys, never charted), exclude.\n\n\
             Respond with JSON:\n\
             {{\"field_analysis\": [{{\"field_name\": \"...\", \"recommended_role\": \"dimension|measure|identifier|exclude\", \
             \"confidence\": 0.0, \"reasoning\": \"...\"}}],\n \
             \"pie_chart_recommendation\": {{\"suitable\": true, \"recommended_dimension\": \"...\", \
             \"recommended_measure\": \"...\", \"confidence\": 0.0, \"reasoning\": \"...\"}},\n \
             \"data_quality\": {{\"overall_score\": 0.0, \"issues\": []}}}}",
            heuristic.recommendation.dimension,
            heuristic.recommendation.measure,
            self.config.max_dimension_values,
        )
    }
}

/// Numeric reading of a JSON value, accepting numeric strings.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
