//! The signer engine: orchestrates one transaction submission.
//!
//! Every `POST /tx` flows through [`SignerEngine::submit`]:
//!
//! 1. Normalize the request and select the chain handler.
//! 2. Parse the payload, compute the canonical hash, and detach any carried
//!    signatures. The stored payload is always the unsigned serialization;
//!    collected signatures live in the record's own array, decoupled from
//!    the chain-native envelope encoding.
//! 3. Load or create the record; on reload, the immutable fields must
//!    match the fresh parse or the submission is a hash collision.
//! 4. Attribute each detached signature against the potential signer set;
//!    accepted ones append, foreign ones are reported masked.
//! 5. Evaluate threshold feasibility, flip `pending → ready` when newly
//!    met, persist through the additive upsert, and nudge the finalizer.
//!
//! Concurrent submissions of the same hash converge because persistence
//! merges signatures additively and never demotes status.

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::instrument;

use crate::chain::{HandlerRegistry, SignatureMatch};
use crate::error::RefractorError;
use crate::registry;
use crate::request::{self, NormalizedRequest, TxSubmitRequest};
use crate::store::{DataProvider, StoreError};
use crate::types::{TransactionRecord, TxChanges, TxStatus};
use crate::util::unix_now;
use crate::{tx_uri, types::MAX_TIME_CEILING};

/// Result of one submission: the stored record, this call's deltas, and
/// whether the record is new (drives 200 vs 201).
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub record: TransactionRecord,
    pub changes: TxChanges,
    pub created: bool,
}

pub struct SignerEngine {
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn DataProvider>,
    /// Best-effort finalizer trigger; the periodic tick is the liveness
    /// path.
    ready_notify: Arc<Notify>,
}

impl SignerEngine {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn DataProvider>,
        ready_notify: Arc<Notify>,
    ) -> Self {
        SignerEngine {
            handlers,
            store,
            ready_notify,
        }
    }

    pub fn store(&self) -> &Arc<dyn DataProvider> {
        &self.store
    }

    /// Processes one client submission end to end.
    #[instrument(
        skip_all,
        err,
        fields(blockchain = tracing::field::Empty, hash = tracing::field::Empty)
    )]
    pub async fn submit(&self, req: &TxSubmitRequest) -> Result<SubmissionOutcome, RefractorError> {
        let now = unix_now();
        let normalized = request::normalize(req, now)
            .map_err(|e| RefractorError::Validation(e.to_string()))?;
        tracing::Span::current().record("blockchain", normalized.blockchain.as_str());

        let spec = registry::get(&normalized.blockchain)
            .ok_or_else(|| RefractorError::Validation(format!(
                "Unknown blockchain: {}",
                normalized.blockchain
            )))?;
        let handler = self
            .handlers
            .get(&normalized.blockchain)
            .ok_or_else(|| RefractorError::Unimplemented(normalized.blockchain.clone()))?;
        let network = registry::network_config(&normalized.blockchain, &normalized.network_name)
            .ok_or_else(|| RefractorError::Validation(format!(
                "Unknown network {} for blockchain {}",
                normalized.network_name, normalized.blockchain
            )))?;
        if !spec.supports_encoding(normalized.encoding) {
            return Err(RefractorError::Validation(format!(
                "Encoding {} not supported by {}",
                normalized.encoding, normalized.blockchain
            )));
        }
        for signer in &normalized.desired_signers {
            if !handler.is_valid_public_key(signer) {
                return Err(RefractorError::Validation(format!(
                    "Invalid desired signer key: {}",
                    signer
                )));
            }
        }

        let parsed =
            handler.parse_transaction(&normalized.payload, normalized.encoding, network)?;
        let digest = handler.compute_hash(&parsed)?;
        let hash = digest.tx_hash();
        tracing::Span::current().record("hash", hash.as_str());

        let raw_signatures = handler.extract_signatures(&parsed)?;
        let unsigned = handler.clear_signatures(&parsed)?;
        let stored_payload = handler.serialize_transaction(&unsigned, normalized.encoding)?;

        let params = handler.transaction_params(&parsed)?;
        let (min_time, max_time) = merge_time_bounds(&normalized, params.min_time, params.max_time)?;
        if max_time != 0 && max_time <= now {
            return Err(RefractorError::Validation(format!(
                "Transaction already expired (maxTime={})",
                max_time
            )));
        }

        let existing = self
            .store
            .find_transaction(&hash)
            .await
            .map_err(store_error)?;
        let created = existing.is_none();
        let mut record = match existing {
            Some(stored) => {
                if stored.payload != stored_payload
                    || stored.blockchain != normalized.blockchain
                    || stored.network_name != normalized.network_name
                    || stored.encoding != normalized.encoding
                {
                    return Err(RefractorError::HashCollision(hash.to_string()));
                }
                if stored.status.is_terminal() {
                    // Terminal records are frozen; report them as-is.
                    return Ok(SubmissionOutcome {
                        record: stored,
                        changes: TxChanges::default(),
                        created: false,
                    });
                }
                stored
            }
            None => TransactionRecord {
                hash: hash.clone(),
                blockchain: normalized.blockchain.clone(),
                network_name: normalized.network_name.clone(),
                payload: stored_payload.clone(),
                encoding: normalized.encoding,
                tx_uri: None,
                signatures: Vec::new(),
                desired_signers: Vec::new(),
                submit: false,
                callback_url: None,
                min_time: 0,
                max_time: 0,
                status: TxStatus::Pending,
                submitted_at: None,
                retry_count: 0,
                last_error: None,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
        };

        // Fold request-level fields into the record.
        record.submit = record.submit || normalized.submit;
        if record.callback_url.is_none() {
            record.callback_url = normalized.callback_url.clone();
        }
        for signer in &normalized.desired_signers {
            if !record.desired_signers.contains(signer) {
                record.desired_signers.push(signer.clone());
            }
        }
        record.min_time = min_time;
        if max_time != 0 {
            record.max_time = max_time;
        }
        if record.tx_uri.is_none() {
            record.tx_uri = Some(normalized.tx_uri.clone().unwrap_or_else(|| {
                tx_uri::canonical(
                    &normalized.blockchain,
                    &normalized.network_name,
                    normalized.encoding,
                    &stored_payload,
                )
            }));
        }

        // One signer discovery per submission; the schema also drives the
        // feasibility check below.
        let schema = handler.signer_schema(&parsed, network).await?;
        let candidates = schema.keys();

        let mut changes = TxChanges::default();
        for raw in &raw_signatures {
            match handler.match_signature_to_signer(raw, &candidates, &digest) {
                SignatureMatch::Matched(pair) => {
                    if !record.has_signature_from(&pair.signer_key) {
                        record.signatures.push(pair.clone());
                        changes.accepted.push(pair);
                    }
                }
                SignatureMatch::Unmatched(rejected) => changes.rejected.push(rejected),
            }
        }

        let mut became_ready = false;
        if record.status == TxStatus::Pending {
            let signed_keys = record.signed_keys();
            if handler.check_feasibility(&schema, &signed_keys) {
                record.status = TxStatus::Ready;
                became_ready = true;
            }
        }

        let mut saved = self
            .store
            .save_transaction(&record)
            .await
            .map_err(store_error)?;

        // The merge may have folded in signatures from a concurrent
        // submission that, combined with ours, now meet the threshold.
        if saved.status == TxStatus::Pending
            && handler.check_feasibility(&schema, &saved.signed_keys())
        {
            let promoted = self
                .store
                .update_transaction(
                    &hash,
                    crate::store::TxPatch {
                        status: Some(TxStatus::Ready),
                        ..Default::default()
                    },
                    TxStatus::Pending,
                )
                .await
                .map_err(store_error)?;
            if promoted {
                saved.status = TxStatus::Ready;
                became_ready = true;
            }
        }

        if became_ready && saved.status == TxStatus::Ready {
            tracing::debug!(hash = %saved.hash, "Record became ready, nudging finalizer");
            self.ready_notify.notify_one();
        }

        Ok(SubmissionOutcome {
            record: saved,
            changes,
            created,
        })
    }

    /// Looks up a record for `GET /tx/{hash}`.
    pub async fn find(
        &self,
        hash: &crate::types::TxHash,
    ) -> Result<TransactionRecord, RefractorError> {
        self.store
            .find_transaction(hash)
            .await
            .map_err(store_error)?
            .ok_or(RefractorError::NotFound)
    }
}

/// Combines transaction time bounds with the request's `expires` field.
/// Both constrain the window, so the effective `max_time` is the tighter
/// one.
fn merge_time_bounds(
    normalized: &NormalizedRequest,
    tx_min: i64,
    tx_max: i64,
) -> Result<(i64, i64), RefractorError> {
    if tx_max < 0 || tx_min < 0 {
        return Err(RefractorError::Validation(
            "Negative transaction time bound".to_string(),
        ));
    }
    if tx_max > MAX_TIME_CEILING {
        return Err(RefractorError::Validation(format!(
            "maxTime {} exceeds the supported range",
            tx_max
        )));
    }
    let max_time = match (tx_max, normalized.max_time) {
        (0, requested) => requested,
        (embedded, 0) => embedded,
        (embedded, requested) => embedded.min(requested),
    };
    Ok((tx_min, max_time))
}

fn store_error(err: StoreError) -> RefractorError {
    match err {
        StoreError::ImmutableConflict(hash) => RefractorError::HashCollision(hash),
        StoreError::Backend(msg) => RefractorError::TransientBackend(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer as _;

    use crate::chain::evm::tests as evm_fixtures;
    use crate::chain::onemoney::tests as onemoney_fixtures;
    use crate::chain::stellar::tests as stellar_fixtures;
    use crate::chain::stellar::{StaticSchemaSource, StellarHandler};
    use crate::chain::{ChainHandler, SignerSchema, WeightedSigner};
    use crate::chain::{evm::EvmHandler, onemoney::OneMoneyHandler};
    use crate::store::memory::MemoryProvider;
    use crate::types::Encoding;

    struct Harness {
        engine: SignerEngine,
        store: Arc<MemoryProvider>,
        notify: Arc<Notify>,
    }

    fn harness(schemas: Vec<(String, SignerSchema)>) -> Harness {
        let mut source = StaticSchemaSource::new();
        for (account, schema) in schemas {
            source.insert(account, schema);
        }
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(StellarHandler::new(Arc::new(source))));
        handlers.register(Arc::new(EvmHandler::new("ethereum")));
        handlers.register(Arc::new(OneMoneyHandler::new()));

        let store = Arc::new(MemoryProvider::new());
        let notify = Arc::new(Notify::new());
        let engine = SignerEngine::new(
            Arc::new(handlers),
            store.clone() as Arc<dyn DataProvider>,
            notify.clone(),
        );
        Harness { engine, store, notify }
    }

    fn stellar_request(xdr: String) -> TxSubmitRequest {
        TxSubmitRequest {
            blockchain: Some("stellar".to_string()),
            network_name: Some("testnet".to_string()),
            payload: Some(xdr),
            submit: true,
            ..Default::default()
        }
    }

    fn sign_envelope(xdr: &str, key: &ed25519_dalek::SigningKey) -> String {
        let handler = StellarHandler::new(Arc::new(StaticSchemaSource::new()));
        let tx = handler
            .parse_transaction(xdr, Encoding::Base64, stellar_fixtures::testnet())
            .unwrap();
        let digest = handler.compute_hash(&tx).unwrap();
        let signature = key.sign(digest.as_bytes());
        let signed = handler
            .add_signature(&tx, &stellar_fixtures::strkey_of(key), &signature.to_bytes())
            .unwrap();
        handler
            .serialize_transaction(&signed, Encoding::Base64)
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_signer_happy_path() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account.clone()))]);

        // Unsigned submission creates a pending record.
        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        let first = h.engine.submit(&stellar_request(xdr.clone())).await.unwrap();
        assert!(first.created);
        assert_eq!(first.record.status, TxStatus::Pending);
        assert!(first.record.signatures.is_empty());
        assert!(first.changes.is_empty());
        assert!(first.record.submit);

        // The signed counterpart flips it to ready.
        let signed = h.engine.submit(&stellar_request(sign_envelope(&xdr, &key))).await.unwrap();
        assert!(!signed.created);
        assert_eq!(signed.record.hash, first.record.hash);
        assert_eq!(signed.record.status, TxStatus::Ready);
        assert_eq!(signed.changes.accepted.len(), 1);
        assert_eq!(signed.record.signatures.len(), 1);
        assert_eq!(signed.record.signatures[0].signer_key, account);
        // The stored payload stays the unsigned serialization.
        assert_eq!(signed.record.payload, xdr);
    }

    #[tokio::test]
    async fn test_multisig_threshold_two_of_two() {
        let k1 = stellar_fixtures::signing_key(1);
        let k2 = stellar_fixtures::signing_key(2);
        let account = stellar_fixtures::strkey_of(&k1);
        let schema = SignerSchema {
            signers: vec![
                WeightedSigner { key: stellar_fixtures::strkey_of(&k1), weight: 1 },
                WeightedSigner { key: stellar_fixtures::strkey_of(&k2), weight: 1 },
            ],
            threshold: 2,
        };
        let h = harness(vec![(account, schema)]);

        let xdr = stellar_fixtures::unsigned_envelope(&k1, None);
        h.engine.submit(&stellar_request(xdr.clone())).await.unwrap();

        let after_first = h
            .engine
            .submit(&stellar_request(sign_envelope(&xdr, &k1)))
            .await
            .unwrap();
        assert_eq!(after_first.record.status, TxStatus::Pending);
        assert_eq!(after_first.changes.accepted.len(), 1);

        let after_second = h
            .engine
            .submit(&stellar_request(sign_envelope(&xdr, &k2)))
            .await
            .unwrap();
        assert_eq!(after_second.record.status, TxStatus::Ready);
        assert_eq!(after_second.record.signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_submissions_converge_to_signature_union() {
        let k1 = stellar_fixtures::signing_key(1);
        let k2 = stellar_fixtures::signing_key(2);
        let account = stellar_fixtures::strkey_of(&k1);
        let schema = SignerSchema {
            signers: vec![
                WeightedSigner { key: stellar_fixtures::strkey_of(&k1), weight: 1 },
                WeightedSigner { key: stellar_fixtures::strkey_of(&k2), weight: 1 },
            ],
            threshold: 2,
        };
        let h = harness(vec![(account, schema)]);

        let xdr = stellar_fixtures::unsigned_envelope(&k1, None);
        let by_k1 = stellar_request(sign_envelope(&xdr, &k1));
        let by_k2 = stellar_request(sign_envelope(&xdr, &k2));
        let (a, b) = tokio::join!(h.engine.submit(&by_k1), h.engine.submit(&by_k2));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Whichever write landed second observed the union and, since the
        // union meets the threshold, promoted the record.
        let stored = h
            .engine
            .find(&a.record.hash)
            .await
            .unwrap();
        assert_eq!(stored.hash, b.record.hash);
        let mut keys = stored.signed_keys();
        keys.sort();
        let mut expected = vec![
            stellar_fixtures::strkey_of(&k1),
            stellar_fixtures::strkey_of(&k2),
        ];
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(stored.status, TxStatus::Ready);
    }

    #[tokio::test]
    async fn test_legacy_stellar_shape_end_to_end() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        let req = TxSubmitRequest {
            xdr: Some(xdr.clone()),
            network: Some(serde_json::json!(1)),
            submit: true,
            ..Default::default()
        };
        let outcome = h.engine.submit(&req).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.record.blockchain, "stellar");
        assert_eq!(outcome.record.network_name, "testnet");
        assert_eq!(outcome.record.payload, xdr);
    }

    #[tokio::test]
    async fn test_duplicate_signature_is_idempotent() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        let signed_xdr = sign_envelope(&xdr, &key);
        let first = h.engine.submit(&stellar_request(signed_xdr.clone())).await.unwrap();
        assert_eq!(first.changes.accepted.len(), 1);

        let second = h.engine.submit(&stellar_request(signed_xdr)).await.unwrap();
        assert!(second.changes.accepted.is_empty());
        assert!(second.changes.rejected.is_empty());
        assert_eq!(second.record.signatures, first.record.signatures);
        assert_eq!(second.record.status, first.record.status);
    }

    #[tokio::test]
    async fn test_foreign_signature_is_rejected_and_masked() {
        let key = stellar_fixtures::signing_key(1);
        let stranger = stellar_fixtures::signing_key(9);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        let outcome = h
            .engine
            .submit(&stellar_request(sign_envelope(&xdr, &stranger)))
            .await
            .unwrap();
        assert!(outcome.changes.accepted.is_empty());
        assert_eq!(outcome.changes.rejected.len(), 1);
        assert!(outcome.changes.rejected[0].signer_hint.starts_with('…'));
        assert_eq!(outcome.record.status, TxStatus::Pending);
        assert!(outcome.record.signatures.is_empty());
    }

    #[tokio::test]
    async fn test_evm_chain_id_mismatch_creates_nothing() {
        let h = harness(Vec::new());
        let req = TxSubmitRequest {
            blockchain: Some("ethereum".to_string()),
            network_name: Some("mainnet".to_string()),
            payload: Some(evm_fixtures::unsigned_payload(137)),
            ..Default::default()
        };
        let err = h.engine.submit(&req).await.unwrap_err();
        match err {
            RefractorError::Validation(msg) => assert!(msg.contains("Chain-id mismatch")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_evm_signed_submission_becomes_ready() {
        let h = harness(Vec::new());
        let signer = evm_fixtures::test_signer();

        let unsigned = TxSubmitRequest {
            blockchain: Some("ethereum".to_string()),
            network_name: Some("sepolia".to_string()),
            payload: Some(evm_fixtures::unsigned_payload(11155111)),
            ..Default::default()
        };
        let first = h.engine.submit(&unsigned).await.unwrap();
        assert!(first.created);
        assert_eq!(first.record.status, TxStatus::Pending);

        let signed = TxSubmitRequest {
            blockchain: Some("ethereum".to_string()),
            network_name: Some("sepolia".to_string()),
            payload: Some(evm_fixtures::signed_payload(11155111, &signer)),
            ..Default::default()
        };
        let second = h.engine.submit(&signed).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record.hash, first.record.hash);
        assert_eq!(second.record.status, TxStatus::Ready);
        assert_eq!(second.record.signatures.len(), 1);
        assert_eq!(
            second.record.signatures[0].signer_key,
            signer.address().to_string()
        );
    }

    #[tokio::test]
    async fn test_onemoney_single_signature_is_feasible() {
        let h = harness(Vec::new());
        let key = onemoney_fixtures::signing_key(3);
        let tx = onemoney_fixtures::transfer_tx(&key, None);
        let unsigned_payload = onemoney_fixtures::encode_msgpack(&tx);

        let req = TxSubmitRequest {
            blockchain: Some("onemoney".to_string()),
            network_name: Some("testnet".to_string()),
            payload: Some(unsigned_payload.clone()),
            encoding: Some("msgpack".to_string()),
            ..Default::default()
        };
        let first = h.engine.submit(&req).await.unwrap();
        assert_eq!(first.record.status, TxStatus::Pending);

        // Sign and resubmit.
        let handler = OneMoneyHandler::new();
        let network = crate::registry::network_config("onemoney", "testnet").unwrap();
        let parsed = handler
            .parse_transaction(&unsigned_payload, Encoding::Msgpack, network)
            .unwrap();
        let digest = handler.compute_hash(&parsed).unwrap();
        let signature = key.sign(digest.as_bytes());
        let signed = handler
            .add_signature(
                &parsed,
                &onemoney_fixtures::hex_key(&key),
                &signature.to_bytes(),
            )
            .unwrap();
        let signed_payload = handler
            .serialize_transaction(&signed, Encoding::Msgpack)
            .unwrap();

        let req = TxSubmitRequest {
            payload: Some(signed_payload),
            ..req
        };
        let second = h.engine.submit(&req).await.unwrap();
        assert_eq!(second.record.status, TxStatus::Ready);
        assert_eq!(second.changes.accepted.len(), 1);
    }

    #[tokio::test]
    async fn test_hash_collision_is_rejected() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        let outcome = h.engine.submit(&stellar_request(xdr.clone())).await.unwrap();

        // Forge a stored record with the same hash but a different payload.
        let mut forged = outcome.record.clone();
        forged.payload = "AAAAforged".to_string();
        let forged_store = MemoryProvider::new();
        forged_store.save_transaction(&forged).await.unwrap();
        let engine = SignerEngine::new(
            {
                let mut handlers = HandlerRegistry::new();
                handlers.register(Arc::new(StellarHandler::new(Arc::new(
                    StaticSchemaSource::new(),
                ))));
                Arc::new(handlers)
            },
            Arc::new(forged_store),
            Arc::new(Notify::new()),
        );
        let err = engine.submit(&stellar_request(xdr)).await.unwrap_err();
        assert!(matches!(err, RefractorError::HashCollision(_)));
    }

    #[tokio::test]
    async fn test_unimplemented_blockchain() {
        let h = harness(Vec::new());
        let req = TxSubmitRequest {
            blockchain: Some("solana".to_string()),
            network_name: Some("mainnet".to_string()),
            payload: Some("3yZe7d".to_string()),
            ..Default::default()
        };
        let err = h.engine.submit(&req).await.unwrap_err();
        assert!(matches!(err, RefractorError::Unimplemented(_)));
    }

    #[tokio::test]
    async fn test_ready_flip_notifies_finalizer() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let xdr = stellar_fixtures::unsigned_envelope(&key, None);
        h.engine
            .submit(&stellar_request(sign_envelope(&xdr, &key)))
            .await
            .unwrap();
        // The nudge must already be buffered in the notify.
        tokio::time::timeout(std::time::Duration::from_millis(50), h.notify.notified())
            .await
            .expect("finalizer nudge expected");
    }

    #[tokio::test]
    async fn test_stellar_time_bounds_flow_into_record() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let future = unix_now() + 3_600;
        let xdr = stellar_fixtures::unsigned_envelope(&key, Some((100, future as u64)));
        let outcome = h.engine.submit(&stellar_request(xdr)).await.unwrap();
        assert_eq!(outcome.record.min_time, 100);
        assert_eq!(outcome.record.max_time, future);
    }

    #[tokio::test]
    async fn test_expired_transaction_rejected() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        // Envelope max time in the past.
        let xdr = stellar_fixtures::unsigned_envelope(&key, Some((0, 1_000)));
        let err = h.engine.submit(&stellar_request(xdr)).await.unwrap_err();
        match err {
            RefractorError::Validation(msg) => assert!(msg.contains("expired")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_desired_signer_rejected() {
        let key = stellar_fixtures::signing_key(1);
        let account = stellar_fixtures::strkey_of(&key);
        let h = harness(vec![(account.clone(), SignerSchema::single(account))]);

        let req = TxSubmitRequest {
            desired_signers: vec!["not-a-strkey".to_string()],
            ..stellar_request(stellar_fixtures::unsigned_envelope(&key, None))
        };
        let err = h.engine.submit(&req).await.unwrap_err();
        assert!(matches!(err, RefractorError::Validation(_)));
    }
}
