//! In-memory data provider.
//!
//! Backs unit tests and standalone (no `DATABASE_URL`) runs. Per-key
//! linearizability comes from the map's shard locks: every mutation runs
//! under the entry lock, so the CAS and merge semantics match the durable
//! provider.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::store::{
    DataProvider, HealthReport, StoreError, TxFilter, TxPatch, immutable_fields_match, merge_into,
};
use crate::types::{TransactionRecord, TxHash, TxStatus};

#[derive(Default)]
pub struct MemoryProvider {
    records: DashMap<String, TransactionRecord>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn find_transaction(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.records.get(hash.as_str()).map(|r| r.clone()))
    }

    async fn save_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionRecord, StoreError> {
        let mut entry = self
            .records
            .entry(record.hash.as_str().to_string())
            .or_insert_with(|| {
                let mut fresh = record.clone();
                fresh.signatures = Vec::new();
                fresh.status = TxStatus::Pending;
                fresh.created_at = Utc::now();
                fresh.updated_at = fresh.created_at;
                fresh
            });
        let stored = entry.value_mut();
        if !immutable_fields_match(stored, record) {
            return Err(StoreError::ImmutableConflict(record.hash.to_string()));
        }
        if !stored.status.is_terminal() {
            merge_into(stored, record);
            stored.updated_at = Utc::now();
        }
        Ok(stored.clone())
    }

    async fn update_transaction(
        &self,
        hash: &TxHash,
        patch: TxPatch,
        expected_status: TxStatus,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.records.get_mut(hash.as_str()) else {
            return Ok(false);
        };
        let record = entry.value_mut();
        if record.status != expected_status {
            return Ok(false);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(submitted_at) = patch.submitted_at {
            record.submitted_at = Some(submitted_at);
        }
        if let Some(last_error) = patch.last_error {
            record.last_error = Some(last_error);
        }
        if patch.increment_retry {
            record.retry_count += 1;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_transactions(
        &self,
        filter: &TxFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut matching: Vec<TransactionRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|r| r.created_at);
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn cleanup_expired(&self, now: i64) -> Result<u64, StoreError> {
        let mut swept = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if matches!(record.status, TxStatus::Pending | TxStatus::Ready)
                && record.max_time != 0
                && record.max_time <= now
            {
                record.status = TxStatus::Failed;
                record.last_error = Some("expired".to_string());
                record.updated_at = Utc::now();
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport {
            connected: true,
            latency_ms: 0,
            error: None,
        }
    }
}
