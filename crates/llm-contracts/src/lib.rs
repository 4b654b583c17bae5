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

pub mod decode;
pub mod generator;
pub mod repair;
pub mod requests;
pub mod responses;
pub mod scripted;
pub mod types;

pub use decode::{decode_structured_response, extract_code_blocks, DecodeError};
pub use generator::TextGenerator;
pub use repair::{generate_structured, Repaired, StructuredError, REPAIR_TASK};
pub use requests::{GenerationConfig, GenerationRequest, ToolSpec};
pub use responses::{GenerationOutput, ToolCall};
pub use scripted::ScriptedGenerator;
pub use types::{LLMError, LLMResult, Provider};
