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

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

const EXCERPT_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("response contained no JSON object or array")]
    NoStructure { excerpt: String },

    #[error("response JSON could not be decoded: {message}")]
    Malformed { message: String, excerpt: String },

    #[error("no decodable JSON after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DecodeError>,
    },
}

impl DecodeError {
    /// The offending response text, truncated.
    pub fn excerpt(&self) -> &str {
        match self {
            DecodeError::NoStructure { excerpt } | DecodeError::Malformed { excerpt, .. } => excerpt,
            DecodeError::Exhausted { last, .. } => last.excerpt(),
        }
    }
}

/// Decodes a structured value out of free-form generator output.
///
/// Candidates are tried in order: the whole response (when it looks like
/// JSON), fenced code blocks tagged `json` or untagged, then every balanced
/// top-level `{...}` and `[...]` segment. The first candidate that
/// deserializes into `T` wins. When none does, the error carries the parse
/// message of the first candidate, which is the one a repair prompt should
/// quote back.
pub fn decode_structured_response<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let trimmed = text.trim();
    let mut first_failure: Option<String> = None;

    for candidate in json_candidates(trimmed) {
        match serde_json::from_str::<T>(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(error = %e, "JSON candidate rejected");
                first_failure.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let excerpt = excerpt(trimmed);
    match first_failure {
        Some(message) => Err(DecodeError::Malformed { message, excerpt }),
        None => Err(DecodeError::NoStructure { excerpt }),
    }
}

fn json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if text.starts_with('{') || text.starts_with('[') {
        candidates.push(text.to_string());
    }

    for (language, content) in extract_code_blocks(text) {
        let tagged_json = matches!(language.as_deref(), None | Some("json") | Some("JSON"));
        if tagged_json && !content.trim().is_empty() {
            candidates.push(content.trim().to_string());
        }
    }

    for segment in balanced_segments(text, '{', '}')
        .into_iter()
        .chain(balanced_segments(text, '[', ']'))
    {
        let segment = segment.to_string();
        if !candidates.contains(&segment) {
            candidates.push(segment);
        }
    }

    candidates
}

/// Extracts fenced code blocks as `(language, content)` pairs.
pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut code_blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(lang_str) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = match lang_str.trim() {
            "" => None,
            lang => Some(lang.to_string()),
        };

        let mut code_content = String::new();
        for code_line in lines.by_ref() {
            if code_line.trim().starts_with("```") {
                break;
            }
            if !code_content.is_empty() {
                code_content.push('\n');
            }
            code_content.push_str(code_line);
        }
        code_blocks.push((language, code_content));
    }
    code_blocks
}

/// Top-level balanced segments delimited by `open`/`close`, skipping
/// delimiters that appear inside JSON string literals.
pub fn balanced_segments(text: &str, open: char, close: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if depth > 0 && in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start.take() {
                    segments.push(&text[s..i + ch.len_utf8()]);
                }
            }
        }
    }
    segments
}

pub(crate) fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        role: String,
        confidence: f64,
    }

    #[test]
    fn test_plain_json() {
        let v: Verdict = decode_structured_response(r#"{"role": "dimension", "confidence": 0.9}"#)
            .unwrap();
        assert_eq!(v.role, "dimension");
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let text = "Here is the analysis:\n```json\n{\"role\": \"measure\", \"confidence\": 0.8}\n```\nLet me know.";
        let v: Verdict = decode_structured_response(text).unwrap();
        assert_eq!(v.role, "measure");
    }

    #[test]
    fn test_embedded_object_with_braces_in_strings() {
        let text = r#"Sure! {"role": "a {weird} name", "confidence": 0.5} hope that helps"#;
        let v: Verdict = decode_structured_response(text).unwrap();
        assert_eq!(v.role, "a {weird} name");
    }

    #[test]
    fn test_skips_prose_braces_before_real_object() {
        let text = r#"Use {category} as label. {"role": "dimension", "confidence": 0.75}"#;
        let v: Verdict = decode_structured_response(text).unwrap();
        assert_eq!(v.confidence, 0.75);
    }

    #[test]
    fn test_no_structure() {
        let err = decode_structured_response::<Value>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, DecodeError::NoStructure { .. }));
        assert_eq!(err.excerpt(), "I cannot help with that.");
    }

    #[test]
    fn test_malformed_reports_first_parse_error() {
        let err = decode_structured_response::<Value>(r#"{"type": "pie", "data": [}"#).unwrap_err();
        match err {
            DecodeError::Malformed { message, excerpt } => {
                assert!(!message.is_empty());
                assert!(excerpt.contains("\"pie\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        let err = decode_structured_response::<Verdict>(r#"{"role": "dimension"}"#).unwrap_err();
        match err {
            DecodeError::Malformed { message, .. } => assert!(message.contains("confidence")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extract_code_blocks_languages() {
        let blocks = extract_code_blocks("```sql\nSELECT 1\n```\n```\n{}\n```");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0.as_deref(), Some("sql"));
        assert_eq!(blocks[0].1, "SELECT 1");
        assert_eq!(blocks[1].0, None);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }
}
