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

use std::time::Duration;

use async_trait::async_trait;
use llm_contracts::{
    GenerationOutput, GenerationRequest, LLMError, LLMResult, Provider, TextGenerator,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const API_VERSION: &str = "2023-06-01";

/// Messages API client. Retries are left to the pipeline's executor.
#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl AnthropicGenerator {
    pub fn new(
        api_key: String,
        model: Option<String>,
        endpoint: Option<String>,
        timeout_seconds: u64,
    ) -> LLMResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| LLMError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// Reads `ANTHROPIC_API_KEY`, `ANTHROPIC_MODEL` and `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> LLMResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LLMError::Configuration("ANTHROPIC_API_KEY is not set".to_string()))?;
        let endpoint = std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .map(|base| format!("{}/v1/messages", base.trim_end_matches('/')));
        Self::new(api_key, std::env::var("ANTHROPIC_MODEL").ok(), endpoint, 60)
    }

    fn build_payload(&self, request: &GenerationRequest) -> Value {
        let config = &request.generation_config;
        let mut payload = json!({
            "model": self.model,
            "max_tokens": config.max_tokens.unwrap_or(4096),
            "messages": [{"role": "user", "content": request.prompt}],
        });

        if let Some(system) = &request.system_prompt {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = config.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &config.stop_sequences {
            payload["stop_sequences"] = json!(stop);
        }
        if !request.tools.is_empty() {
            payload["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect();
        }
        payload
    }
}

/// A `tool_use` block wins over text; text blocks are concatenated.
fn parse_response(data: &Value) -> LLMResult<GenerationOutput> {
    let blocks = data["content"].as_array().ok_or_else(|| {
        LLMError::Provider("Anthropic response has no content blocks".to_string())
    })?;

    if let Some(tool) = blocks.iter().find(|b| b["type"] == "tool_use") {
        let name = tool["name"].as_str().unwrap_or_default();
        return Ok(GenerationOutput::tool_call(name, tool["input"].clone()));
    }

    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(LLMError::Provider(
            "Failed to extract content from Anthropic response".to_string(),
        ));
    }
    Ok(GenerationOutput::text(text))
}

fn status_error(status: StatusCode, body: String) -> LLMError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LLMError::Authentication(body),
        StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimit,
        StatusCode::NOT_FOUND => LLMError::ModelNotFound(body),
        StatusCode::BAD_REQUEST => LLMError::Validation(body),
        _ => LLMError::Provider(format!("Anthropic API error {status}: {body}")),
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationOutput> {
        let payload = self.build_payload(request);
        debug!(model = %self.model, tools = request.tools.len(), "Sending request to Anthropic API");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::Serialisation(format!("Failed to parse JSON response: {e}")))?;
        parse_response(&data)
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::ToolSpec;

    #[test]
    fn test_payload_carries_system_and_tools() {
        let generator =
            AnthropicGenerator::new("key".into(), Some("test-model".into()), None, 5).unwrap();
        let request = GenerationRequest::new("TASK: chart_spec")
            .with_system_prompt("json only")
            .with_tool(ToolSpec {
                name: "submit_chart_spec".into(),
                description: "submit".into(),
                input_schema: json!({"type": "object"}),
            });

        let payload = generator.build_payload(&request);
        assert_eq!(payload["model"], "test-model");
        assert_eq!(payload["system"], "json only");
        assert_eq!(payload["tools"][0]["name"], "submit_chart_spec");
        assert_eq!(payload["messages"][0]["content"], "TASK: chart_spec");
    }

    #[test]
    fn test_tool_use_block_preferred() {
        let data = json!({"content": [
            {"type": "text", "text": "Here you go"},
            {"type": "tool_use", "name": "submit_chart_spec", "input": {"type": "pie"}}
        ]});
        let output = parse_response(&data).unwrap();
        assert_eq!(output.as_tool_call().unwrap().arguments, json!({"type": "pie"}));

        let data = json!({"content": [{"type": "text", "text": "SELECT 1"}]});
        assert_eq!(parse_response(&data).unwrap().into_text(), "SELECT 1");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            LLMError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LLMError::RateLimit
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            LLMError::Provider(_)
        ));
    }
}
