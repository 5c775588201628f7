//! Persistent transaction storage.
//!
//! [`DataProvider`] is the single cross-process synchronization point of the
//! system. Every mutation is either an additive merge (signature sets) or a
//! compare-and-swap on `status`, so no distributed locks are needed even
//! when several instances share one database.
//!
//! Two implementations ship: [`postgres::PostgresProvider`] for durable
//! deployments and [`memory::MemoryProvider`] for tests and standalone
//! runs.

use async_trait::async_trait;

use crate::types::{TransactionRecord, TxHash, TxStatus};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    /// Upsert attempted to change `payload`, `blockchain`, `networkName` or
    /// `encoding` of an existing record.
    #[error("Record {0} conflicts with stored immutable fields")]
    ImmutableConflict(String),
}

/// Filter shape for [`DataProvider::list_transactions`].
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
    pub status: Option<TxStatus>,
    /// Only records whose `min_time` has passed at this instant.
    pub due_at: Option<i64>,
    /// Only records not expired at this instant (`max_time` unset or in the
    /// future).
    pub not_expired_at: Option<i64>,
    pub limit: Option<usize>,
}

impl TxFilter {
    /// The finalizer's poll: `ready`, due, not expired.
    pub fn ready_at(now: i64, limit: usize) -> Self {
        TxFilter {
            status: Some(TxStatus::Ready),
            due_at: Some(now),
            not_expired_at: Some(now),
            limit: Some(limit),
        }
    }

    pub fn matches(&self, record: &TransactionRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(now) = self.due_at {
            if record.min_time > now {
                return false;
            }
        }
        if let Some(now) = self.not_expired_at {
            if record.max_time != 0 && record.max_time <= now {
                return false;
            }
        }
        true
    }
}

/// Partial update applied under a status CAS.
#[derive(Debug, Clone, Default)]
pub struct TxPatch {
    pub status: Option<TxStatus>,
    pub submitted_at: Option<i64>,
    pub last_error: Option<String>,
    pub increment_retry: bool,
}

/// Backend health snapshot for `/monitoring/health`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Abstract capability set any backing store must provide.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn find_transaction(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Idempotent upsert keyed by `hash`.
    ///
    /// On an existing record: immutable fields must match
    /// ([`StoreError::ImmutableConflict`] otherwise), signatures merge
    /// additively by signer key so no concurrent writer loses one, and the
    /// status never moves backwards. Terminal records are returned
    /// unchanged. The stored row after the merge is returned.
    async fn save_transaction(
        &self,
        record: &TransactionRecord,
    ) -> Result<TransactionRecord, StoreError>;

    /// Applies `patch` iff the stored status equals `expected_status`.
    /// Returns whether a row matched; `false` means another worker won the
    /// race.
    async fn update_transaction(
        &self,
        hash: &TxHash,
        patch: TxPatch,
        expected_status: TxStatus,
    ) -> Result<bool, StoreError>;

    /// Status CAS with error capture. Failure transitions increment
    /// `retryCount`.
    async fn update_tx_status(
        &self,
        hash: &TxHash,
        new_status: TxStatus,
        expected_status: TxStatus,
        error: Option<String>,
    ) -> Result<bool, StoreError> {
        let increment_retry = error.is_some();
        self.update_transaction(
            hash,
            TxPatch {
                status: Some(new_status),
                submitted_at: None,
                last_error: error,
                increment_retry,
            },
            expected_status,
        )
        .await
    }

    /// Matching records ordered by creation time.
    async fn list_transactions(
        &self,
        filter: &TxFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Fails every non-terminal record whose `max_time` has passed. Returns
    /// the number of records swept. Safe to run concurrently with the
    /// finalizer: the status predicate prevents double-terminal moves.
    async fn cleanup_expired(&self, now: i64) -> Result<u64, StoreError>;

    async fn health_check(&self) -> HealthReport;
}

/// How far along the lifecycle a status is; merges keep the furthest.
pub(crate) fn status_rank(status: TxStatus) -> u8 {
    match status {
        TxStatus::Pending => 0,
        TxStatus::Ready => 1,
        TxStatus::Processing => 2,
        TxStatus::Processed => 3,
        TxStatus::Failed => 3,
    }
}

pub(crate) fn immutable_fields_match(
    stored: &TransactionRecord,
    incoming: &TransactionRecord,
) -> bool {
    stored.payload == incoming.payload
        && stored.blockchain == incoming.blockchain
        && stored.network_name == incoming.network_name
        && stored.encoding == incoming.encoding
}

/// Additively merges `incoming` into `stored` under the upsert rules:
/// signatures union by signer key, status only moves forward, request-level
/// fields fill in but never blank out.
pub(crate) fn merge_into(stored: &mut TransactionRecord, incoming: &TransactionRecord) {
    for signature in &incoming.signatures {
        if !stored.has_signature_from(&signature.signer_key) {
            stored.signatures.push(signature.clone());
        }
    }
    if status_rank(incoming.status) > status_rank(stored.status) {
        stored.status = incoming.status;
    }
    for signer in &incoming.desired_signers {
        if !stored.desired_signers.contains(signer) {
            stored.desired_signers.push(signer.clone());
        }
    }
    stored.submit = stored.submit || incoming.submit;
    if stored.callback_url.is_none() {
        stored.callback_url = incoming.callback_url.clone();
    }
    if stored.tx_uri.is_none() {
        stored.tx_uri = incoming.tx_uri.clone();
    }
    if incoming.min_time != 0 {
        stored.min_time = incoming.min_time;
    }
    if incoming.max_time != 0 {
        stored.max_time = incoming.max_time;
    }
}
