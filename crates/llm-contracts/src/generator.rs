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

use crate::requests::GenerationRequest;
use crate::responses::GenerationOutput;
use crate::types::{LLMResult, Provider};
use async_trait::async_trait;
use std::sync::Arc;

/// A non-deterministic text generation service.
///
/// Output is never guaranteed to be well-formed, even when the prompt asks
/// for JSON. Callers that need structure go through
/// [`crate::decode_structured_response`] or [`crate::generate_structured`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationOutput>;

    async fn generate_text(&self, request: &GenerationRequest) -> LLMResult<String> {
        Ok(self.generate(request).await?.into_text())
    }

    fn provider(&self) -> Provider;

    fn model_name(&self) -> String {
        "unknown".to_string()
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> LLMResult<GenerationOutput> {
        (**self).generate(request).await
    }

    fn provider(&self) -> Provider {
        (**self).provider()
    }

    fn model_name(&self) -> String {
        (**self).model_name()
    }
}
