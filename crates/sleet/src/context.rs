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

use serde_json::{Map, Value};

/// Per-run settings fixed at pipeline entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    pub generation_id: String,
    /// Whether attempts are written to the ledger. Set once by the caller.
    pub logging_enabled: bool,
    /// Caller-supplied context shown to error analysis.
    pub metadata: Map<String, Value>,
}

impl GenerationContext {
    pub fn new(generation_id: impl Into<String>, logging_enabled: bool) -> Self {
        Self {
            generation_id: generation_id.into(),
            logging_enabled,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}
