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

use std::fs;
use std::path::Path;

use estel::ClassifierConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Executor attempts per stage, including the first.
    pub max_retries: u32,
    /// Generator calls per structured response inside one stage attempt.
    pub decode_attempts: u32,
    pub max_result_groups: usize,
    /// Result sizes above this are logged as hard to read.
    pub readability_threshold: usize,
    pub display_ceiling: usize,
    pub sample_rows: usize,
    pub prior_attempt_limit: usize,
    pub ai_error_analysis: bool,
    /// Post-process the base template when the generator is unavailable.
    pub template_fallback: bool,
    pub classifier: ClassifierConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            decode_attempts: 3,
            max_result_groups: 15,
            readability_threshold: 10,
            display_ceiling: 15,
            sample_rows: 5,
            prior_attempt_limit: 5,
            ai_error_analysis: true,
            template_fallback: true,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Applies `CHARTGEN_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = parsed(&lookup, "CHARTGEN_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "CHARTGEN_DECODE_ATTEMPTS")? {
            self.decode_attempts = v;
        }
        if let Some(v) = parsed(&lookup, "CHARTGEN_MAX_RESULT_GROUPS")? {
            self.max_result_groups = v;
        }
        if let Some(v) = parsed(&lookup, "CHARTGEN_SAMPLE_ROWS")? {
            self.sample_rows = v;
        }
        if let Some(v) = parsed(&lookup, "CHARTGEN_AI_ERROR_ANALYSIS")? {
            self.ai_error_analysis = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.decode_attempts == 0 {
            return Err(ConfigError::Invalid("decode_attempts must be at least 1".into()));
        }
        if self.max_result_groups == 0 {
            return Err(ConfigError::Invalid("max_result_groups must be at least 1".into()));
        }
        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_retries = 5
            ai_error_analysis = false

            [classifier]
            override_confidence = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(!config.ai_error_analysis);
        assert_eq!(config.decode_attempts, 3);
        assert_eq!(config.max_result_groups, 15);
        assert_eq!(config.classifier.override_confidence, 0.8);
        assert_eq!(config.classifier.max_dimension_values, 20);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::default()
            .with_overrides(|key| match key {
                "CHARTGEN_MAX_RETRIES" => Some("4".into()),
                "CHARTGEN_AI_ERROR_ANALYSIS" => Some("false".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_retries, 4);
        assert!(!config.ai_error_analysis);

        let err = PipelineConfig::default()
            .with_overrides(|key| (key == "CHARTGEN_SAMPLE_ROWS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
        let config = PipelineConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "decode_attempts = 2\ntemplate_fallback = false\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.decode_attempts, 2);
        assert!(!config.template_fallback);
        assert_eq!(config.max_retries, 3);

        let missing = PipelineConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
