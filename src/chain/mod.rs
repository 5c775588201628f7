//! Per-chain transaction handling.
//!
//! Every supported blockchain implements the [`ChainHandler`] capability
//! set: parsing, canonical hashing, signature extraction/attribution/
//! verification, serialization, signer discovery, and threshold
//! feasibility. Handlers are concrete structs selected through the
//! [`HandlerRegistry`] by blockchain id; there is no inheritance, and a new
//! chain is added by registering another factory.
//!
//! [`TxObject`] is a tagged variant over chain-specific parsed transactions.
//! Each handler operates only on its own variant and rejects the others
//! with [`ChainError::InvalidInput`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::NetworkSpec;
use crate::types::{Encoding, RejectedSignature, SignaturePair, TxHash};

pub mod evm;
pub mod onemoney;
pub mod stellar;

/// Errors produced by chain handler operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Malformed payload, foreign [`TxObject`] variant, bad key, or a
    /// chain-id/network mismatch.
    #[error("{0}")]
    InvalidInput(String),
    /// Encoding outside the handler's supported set.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(Encoding),
    /// Recognized but deliberately unsupported construct (fee-bump
    /// envelope, blob transaction, non-hex EVM payload).
    #[error("{0}")]
    UnsupportedFeature(String),
    /// Chain RPC failure; retryable.
    #[error("{0}")]
    TransientBackend(String),
}

/// Chain-specific parsed transaction.
#[derive(Debug, Clone)]
pub enum TxObject {
    Stellar(stellar::StellarTx),
    Evm(evm::EvmTx),
    OneMoney(onemoney::OneMoneyTx),
}

/// Canonical digest of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDigest(pub Vec<u8>);

impl TxDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn tx_hash(&self) -> TxHash {
        TxHash::from_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A signature lifted from a submitted payload, before it has been
/// attributed to a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSignature {
    /// Signature carrying a short signer hint (Stellar decorated
    /// signature: last 4 bytes of the signer's public key).
    Hinted { hint: [u8; 4], signature: Vec<u8> },
    /// Signature already bound to a signer key by the payload (1Money).
    Keyed {
        signer_key: String,
        signature: Vec<u8>,
    },
    /// Recoverable ECDSA signature (EVM r‖s‖v).
    Recoverable { signature: Vec<u8> },
}

impl RawSignature {
    pub fn signature_bytes(&self) -> &[u8] {
        match self {
            RawSignature::Hinted { signature, .. } => signature,
            RawSignature::Keyed { signature, .. } => signature,
            RawSignature::Recoverable { signature } => signature,
        }
    }
}

/// Outcome of attributing one raw signature against the potential signer
/// set.
#[derive(Debug, Clone)]
pub enum SignatureMatch {
    Matched(SignaturePair),
    /// No candidate matched; the identifier is masked for diagnostics.
    Unmatched(RejectedSignature),
}

/// One signer key with its policy weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedSigner {
    pub key: String,
    pub weight: u32,
}

/// Per-account signing policy: weighted keys plus the required threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSchema {
    pub signers: Vec<WeightedSigner>,
    pub threshold: u32,
}

impl SignerSchema {
    /// Single-signer policy: one key, weight 1, threshold 1.
    pub fn single(key: impl Into<String>) -> Self {
        SignerSchema {
            signers: vec![WeightedSigner {
                key: key.into(),
                weight: 1,
            }],
            threshold: 1,
        }
    }

    /// Policy with no known signers yet. Never feasible.
    pub fn empty() -> Self {
        SignerSchema {
            signers: Vec::new(),
            threshold: 1,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.signers.iter().map(|s| s.key.clone()).collect()
    }

    /// Whether the present signer set satisfies the threshold: the summed
    /// weight of signed schema members must reach `threshold`.
    pub fn is_feasible(&self, signed_keys: &[String]) -> bool {
        let weight: u32 = self
            .signers
            .iter()
            .filter(|s| signed_keys.iter().any(|k| k == &s.key))
            .map(|s| s.weight)
            .sum();
        weight >= self.threshold
    }
}

/// Time bounds extracted from a parsed transaction, unix seconds, 0 = unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxParams {
    pub min_time: i64,
    pub max_time: i64,
}

/// Capability set every supported blockchain implements.
///
/// Pure transformations (`parse`, `hash`, `match`) are synchronous; only
/// signer discovery suspends, because it may consult the chain.
#[async_trait]
pub trait ChainHandler: Send + Sync {
    /// Registry key of the blockchain this handler serves.
    fn blockchain(&self) -> &'static str;

    /// Parses an encoded payload into a [`TxObject`] bound to `network`.
    ///
    /// Rejects wrong encodings, fee-bump envelopes (Stellar) and chain-id
    /// mismatches (EVM).
    fn parse_transaction(
        &self,
        payload: &str,
        encoding: Encoding,
        network: &NetworkSpec,
    ) -> Result<TxObject, ChainError>;

    /// Deterministic canonical digest; the record key is derived from it.
    fn compute_hash(&self, tx: &TxObject) -> Result<TxDigest, ChainError>;

    /// Signatures already carried by the submitted payload.
    fn extract_signatures(&self, tx: &TxObject) -> Result<Vec<RawSignature>, ChainError>;

    /// The unsigned form, for re-serialization into the stored payload.
    fn clear_signatures(&self, tx: &TxObject) -> Result<TxObject, ChainError>;

    /// Chain-native signature verification of `message` under `signer_key`.
    fn verify_signature(&self, signer_key: &str, signature: &[u8], message: &[u8]) -> bool;

    /// Appends a signature. Order-independent for multi-sig chains;
    /// single-slot for EVM.
    fn add_signature(
        &self,
        tx: &TxObject,
        signer_key: &str,
        signature: &[u8],
    ) -> Result<TxObject, ChainError>;

    /// Byte-exact inverse of [`Self::parse_transaction`] when the signature
    /// set is unchanged.
    fn serialize_transaction(&self, tx: &TxObject, encoding: Encoding)
    -> Result<String, ChainError>;

    /// Signing policy for the transaction's source account(s). May consult
    /// the chain (Stellar signer sets); local for EVM and 1Money.
    async fn signer_schema(
        &self,
        tx: &TxObject,
        network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError>;

    /// Signer keys that may satisfy the policy.
    async fn potential_signers(
        &self,
        tx: &TxObject,
        network: &NetworkSpec,
    ) -> Result<Vec<String>, ChainError> {
        Ok(self.signer_schema(tx, network).await?.keys())
    }

    /// Attributes one raw signature to a candidate signer, or masks it.
    fn match_signature_to_signer(
        &self,
        raw: &RawSignature,
        candidates: &[String],
        digest: &TxDigest,
    ) -> SignatureMatch;

    /// Chain-specific key format / checksum validation.
    fn is_valid_public_key(&self, key: &str) -> bool;

    /// Time bounds carried by the transaction itself.
    fn transaction_params(&self, tx: &TxObject) -> Result<TxParams, ChainError>;

    /// Whether the signed key set satisfies the policy.
    fn check_feasibility(&self, schema: &SignerSchema, signed_keys: &[String]) -> bool {
        schema.is_feasible(signed_keys)
    }
}

/// Immutable registry of chain handlers, built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ChainHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under its blockchain id.
    pub fn register(&mut self, handler: Arc<dyn ChainHandler>) {
        self.handlers.insert(handler.blockchain(), handler);
    }

    /// Handler for `blockchain`, or `None` for a recognized-but-unhandled
    /// chain (the caller reports 501).
    pub fn get(&self, blockchain: &str) -> Option<Arc<dyn ChainHandler>> {
        self.handlers.get(blockchain.to_lowercase().as_str()).cloned()
    }

    pub fn blockchains(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Masks a signer identifier down to its trailing hint for diagnostics.
pub(crate) fn mask_signer(identifier: &str) -> String {
    const VISIBLE: usize = 8;
    let len = identifier.chars().count();
    if len <= VISIBLE {
        format!("…{}", identifier)
    } else {
        let tail: String = identifier.chars().skip(len - VISIBLE).collect();
        format!("…{}", tail)
    }
}
