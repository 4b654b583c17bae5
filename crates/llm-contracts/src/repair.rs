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

use crate::decode::{decode_structured_response, DecodeError};
use crate::generator::TextGenerator;
use crate::requests::GenerationRequest;
use crate::types::LLMError;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Marker line carried by every repair prompt.
pub const REPAIR_TASK: &str = "TASK: json_repair";

#[derive(Debug, Error)]
pub enum StructuredError {
    #[error(transparent)]
    Generation(#[from] LLMError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A decoded value plus how many generator calls it took to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    pub value: T,
    pub attempts: u32,
}

/// Asks the generator for structured output and repairs malformed replies.
///
/// Each malformed reply is answered with a follow-up prompt that quotes the
/// exact parse error and the offending text. At most `max_attempts` calls are
/// made in total. Generator failures are returned immediately; only decode
/// failures are repaired.
pub async fn generate_structured<T, G>(
    generator: &G,
    request: &GenerationRequest,
    max_attempts: u32,
) -> Result<Repaired<T>, StructuredError>
where
    T: DeserializeOwned,
    G: TextGenerator + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut current = request.clone();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let text = generator.generate_text(&current).await?;

        match decode_structured_response::<T>(&text) {
            Ok(value) => {
                debug!(attempt, "Structured response decoded");
                return Ok(Repaired {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) if attempt >= max_attempts => {
                warn!(attempt, error = %e, "Giving up on structured response");
                return Err(DecodeError::Exhausted {
                    attempts: attempt,
                    last: Box::new(e),
                }
                .into());
            }
            Err(e) => {
                warn!(attempt, error = %e, "Malformed structured response, requesting repair");
                current = request.follow_up(repair_prompt(&request.prompt, &e, &text));
            }
        }
    }
}

fn repair_prompt(original_prompt: &str, error: &DecodeError, offending: &str) -> String {
    format!(
        "{REPAIR_TASK}\n\n\
         Your previous response could not be used because it was not valid JSON.\n\n\
         Parse error: {error}\n\n\
         Previous response:\n{}\n\n\
         Original request:\n{original_prompt}\n\n\
         Respond with ONLY the corrected JSON. No markdown fences, no commentary.",
        crate::decode::excerpt(offending.trim()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedGenerator;
    use serde_json::Value;

    #[tokio::test]
    async fn test_first_reply_valid() {
        let generator = ScriptedGenerator::new().on("TASK: chart", r#"{"type": "pie"}"#);
        let request = GenerationRequest::new("TASK: chart\nmake a pie");
        let out: Repaired<Value> = generate_structured(&generator, &request, 3).await.unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.value["type"], "pie");
    }

    #[tokio::test]
    async fn test_repairs_until_valid() {
        let generator = ScriptedGenerator::new()
            .on("TASK: chart", "a pie chart would be nice")
            .on(REPAIR_TASK, "{type: pie}")
            .on(REPAIR_TASK, r#"{"type": "pie"}"#);
        let request = GenerationRequest::new("TASK: chart\nmake a pie");

        let out: Repaired<Value> = generate_structured(&generator, &request, 3).await.unwrap();
        assert_eq!(out.attempts, 3);

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].prompt.contains("a pie chart would be nice"));
        assert!(calls[2].prompt.contains("{type: pie}"));
        assert!(calls[2].prompt.contains("Parse error"));
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let generator = ScriptedGenerator::new()
            .on("TASK: chart", "nope")
            .on(REPAIR_TASK, "still nope");
        let request = GenerationRequest::new("TASK: chart");

        let err = generate_structured::<Value, _>(&generator, &request, 2)
            .await
            .unwrap_err();
        match err {
            StructuredError::Decode(DecodeError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last.excerpt(), "still nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_repaired() {
        let generator = ScriptedGenerator::new();
        let request = GenerationRequest::new("TASK: chart");
        let err = generate_structured::<Value, _>(&generator, &request, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StructuredError::Generation(_)));
        assert_eq!(generator.calls().len(), 1);
    }
}
