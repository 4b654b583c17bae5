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

pub mod chart_knowledge;
pub mod chart_spec;
pub mod classifier;
pub mod error;
pub mod profile;

pub use chart_knowledge::{
    base_spec, select_chart_type, validate_data_for_chart, ChartKnowledge, ChartType, DataValidation,
};
pub use chart_spec::{ensure_data_serializable, post_process, standardize_rows};
pub use classifier::{numeric_value, ClassifierConfig, FieldRoleClassifier, FIELD_REVIEW_TASK};
pub use error::{ChartError, KnowledgeError};
pub use profile::{
    AnalysisSource, AnnotatedField, ColumnProfile, DataQuality, FieldAnalysis, FieldRole,
    Recommendation, Row, SemanticType,
};
