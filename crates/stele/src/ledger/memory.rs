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

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AttemptLedger, AttemptRecord};
use crate::error::LedgerResult;

type AttemptKey = (String, String, u32);

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<AttemptKey, AttemptRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AttemptRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AttemptLedger for MemoryLedger {
    async fn upsert(&self, record: &AttemptRecord) -> LedgerResult<()> {
        let key = (
            record.generation_id.clone(),
            record.stage_name.clone(),
            record.attempt_number,
        );
        let mut records = self.records.write().await;
        let mut record = record.clone();
        if let Some(existing) = records.get(&key) {
            record.created_at = existing.created_at;
        }
        records.insert(key, record);
        Ok(())
    }

    async fn recent_attempts(
        &self,
        generation_id: &str,
        stage_name: &str,
        limit: usize,
    ) -> LedgerResult<Vec<AttemptRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .rev()
            .filter(|r| r.generation_id == generation_id && r.stage_name == stage_name)
            .take(limit)
            .cloned()
            .collect())
    }
}
