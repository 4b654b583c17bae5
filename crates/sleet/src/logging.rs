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

use std::sync::Arc;

use stele::{AttemptLedger, AttemptRecord};
use tracing::{debug, warn};

use crate::context::GenerationContext;

/// Best-effort writer in front of an [`AttemptLedger`].
///
/// Nothing is written unless the context enables logging. Ledger failures
/// are logged and dropped; they never reach the caller.
#[derive(Clone, Default)]
pub struct AttemptLog {
    ledger: Option<Arc<dyn AttemptLedger>>,
}

impl AttemptLog {
    pub fn new(ledger: Option<Arc<dyn AttemptLedger>>) -> Self {
        Self { ledger }
    }

    pub fn is_configured(&self) -> bool {
        self.ledger.is_some()
    }

    fn ledger(&self, ctx: &GenerationContext) -> Option<&Arc<dyn AttemptLedger>> {
        self.ledger.as_ref().filter(|_| ctx.logging_enabled)
    }

    pub async fn write(&self, ctx: &GenerationContext, record: &AttemptRecord) {
        let Some(ledger) = self.ledger(ctx) else {
            return;
        };
        match ledger.upsert(record).await {
            Ok(()) => debug!(
                stage = %record.stage_name,
                attempt = record.attempt_number,
                success = record.was_successful,
                "Attempt recorded"
            ),
            Err(e) => warn!(
                error = %e,
                stage = %record.stage_name,
                attempt = record.attempt_number,
                "Failed to record attempt"
            ),
        }
    }

    /// Prior attempts of a stage, newest first. Empty when logging is off or
    /// the ledger cannot be read.
    pub async fn recent(
        &self,
        ctx: &GenerationContext,
        stage_name: &str,
        limit: usize,
    ) -> Vec<AttemptRecord> {
        let Some(ledger) = self.ledger(ctx) else {
            return Vec::new();
        };
        ledger
            .recent_attempts(&ctx.generation_id, stage_name, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, stage = stage_name, "Failed to read prior attempts");
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use stele::{LedgerError, LedgerResult, MemoryLedger};

    struct BrokenLedger;

    #[async_trait]
    impl AttemptLedger for BrokenLedger {
        async fn upsert(&self, _record: &AttemptRecord) -> LedgerResult<()> {
            Err(LedgerError::Backend("disk full".into()))
        }
        async fn recent_attempts(&self, _g: &str, _s: &str, _l: usize) -> LedgerResult<Vec<AttemptRecord>> {
            Err(LedgerError::Backend("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_disabled_context_writes_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        let log = AttemptLog::new(Some(ledger.clone()));
        let ctx = GenerationContext::new("g1", false);
        log.write(&ctx, &AttemptRecord::started("g1", "initialize", 1, json!({}))).await;
        assert!(ledger.is_empty().await);
        assert!(log.recent(&ctx, "initialize", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_broken_ledger_is_swallowed() {
        let log = AttemptLog::new(Some(Arc::new(BrokenLedger)));
        let ctx = GenerationContext::new("g1", true);
        log.write(&ctx, &AttemptRecord::started("g1", "initialize", 1, json!({}))).await;
        assert!(log.recent(&ctx, "initialize", 5).await.is_empty());
    }
}
