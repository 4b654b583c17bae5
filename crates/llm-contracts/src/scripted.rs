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

//! Deterministic generator for offline runs and tests.

use crate::generator::TextGenerator;
use crate::requests::GenerationRequest;
use crate::responses::GenerationOutput;
use crate::types::{LLMError, LLMResult, Provider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

struct Route {
    marker: String,
    replies: VecDeque<LLMResult<GenerationOutput>>,
}

/// Replays queued replies keyed by a marker substring of the prompt.
///
/// When several markers occur in one prompt, the one appearing earliest wins,
/// so a follow-up prompt that quotes an earlier request is still routed by its
/// own leading marker. Every request is recorded. A prompt with no queued
/// reply yields [`LLMError::Provider`].
#[derive(Default)]
pub struct ScriptedGenerator {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, marker: &str, reply: impl Into<String>) -> Self {
        self.push(marker, Ok(GenerationOutput::text(reply)))
    }

    pub fn on_tool_call(self, marker: &str, name: &str, arguments: Value) -> Self {
        self.push(marker, Ok(GenerationOutput::tool_call(name, arguments)))
    }

    pub fn on_error(self, marker: &str, error: LLMError) -> Self {
        self.push(marker, Err(error))
    }

    fn push(self, marker: &str, reply: LLMResult<GenerationOutput>) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            match routes.iter_mut().find(|r| r.marker == marker) {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    marker: marker.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.prompt.contains(marker))
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.routes
            .lock()
            .map(|routes| routes.iter().map(|r| r.replies.len()).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationOutput> {
        self.calls
            .lock()
            .map_err(|_| LLMError::Internal("scripted call log poisoned".into()))?
            .push(request.clone());

        let mut routes = self
            .routes
            .lock()
            .map_err(|_| LLMError::Internal("scripted routes poisoned".into()))?;

        let chosen = routes
            .iter_mut()
            .filter(|r| !r.replies.is_empty())
            .filter_map(|r| request.prompt.find(&r.marker).map(|pos| (pos, r)))
            .min_by_key(|(pos, _)| *pos)
            .and_then(|(_, route)| route.replies.pop_front());

        chosen.unwrap_or_else(|| {
            let first_line = request.prompt.lines().next().unwrap_or_default();
            Err(LLMError::Provider(format!(
                "no scripted reply for prompt starting with '{first_line}'"
            )))
        })
    }

    fn provider(&self) -> Provider {
        Provider::Scripted
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}
