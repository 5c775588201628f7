//! Core domain types for pending multi-signature transactions.
//!
//! The central object is [`TransactionRecord`]: one row per canonical
//! transaction hash, carrying the unsigned payload, the signatures collected
//! so far, and the lifecycle status. Wire representations follow the
//! camelCase JSON produced by the original Refractor API, so existing
//! clients keep working unchanged.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Largest `maxTime` the API accepts (fits a signed 32-bit unix timestamp).
pub const MAX_TIME_CEILING: i64 = i32::MAX as i64;

/// A canonical transaction hash: lowercase hex, derived from the payload by
/// the chain handler, never supplied by the client.
///
/// 32-byte digests serialize to 64 characters; other chains may produce a
/// different (even) length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(String);

static TX_HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[a-f0-9]{2}){20,64}$").expect("Invalid regex for tx hash"));

impl TxHash {
    /// Wraps a lowercase hex digest. Uppercase input is folded to lowercase.
    pub fn new(hex: impl Into<String>) -> Result<Self, TxHashError> {
        let hex = hex.into().to_lowercase();
        if TX_HASH_REGEX.is_match(&hex) {
            Ok(TxHash(hex))
        } else {
            Err(TxHashError(hex))
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        TxHash(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash: {0}")]
pub struct TxHashError(String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxHash {
    type Err = TxHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TxHash::new(s)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TxHash::new(s).map_err(DeError::custom)
    }
}

/// Payload encoding on the wire. Each chain handler constrains the subset it
/// accepts; the registry records the default per blockchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Base64,
    Hex,
    Base58,
    Msgpack,
    Base32,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Base58 => "base58",
            Encoding::Msgpack => "msgpack",
            Encoding::Base32 => "base32",
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "base58" => Ok(Encoding::Base58),
            "msgpack" => Ok(Encoding::Msgpack),
            "base32" => Ok(Encoding::Base32),
            other => Err(format!("Unknown encoding: {}", other)),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status.
///
/// Transitions are monotonic: `pending → ready → processing → processed |
/// failed`. Nothing ever moves backwards; in particular a `ready` record can
/// not return to `pending` because signatures are append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    Ready,
    Processing,
    Processed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Ready => "ready",
            TxStatus::Processing => "processing",
            TxStatus::Processed => "processed",
            TxStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Processed | TxStatus::Failed)
    }

    /// Whether moving to `next` respects the status DAG.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Ready)
                | (TxStatus::Ready, TxStatus::Processing)
                | (TxStatus::Processing, TxStatus::Processed)
                | (TxStatus::Processing, TxStatus::Failed)
                // Expiration may fail a record that never became ready.
                | (TxStatus::Pending, TxStatus::Failed)
                | (TxStatus::Ready, TxStatus::Failed)
        )
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "ready" => Ok(TxStatus::Ready),
            "processing" => Ok(TxStatus::Processing),
            "processed" => Ok(TxStatus::Processed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("Invalid tx status: {}", other)),
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One collected signature: the signer's chain-canonical key plus the raw
/// signature bytes (base64 on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePair {
    pub signer_key: String,
    #[serde(with = "crate::util::b64_bytes")]
    pub signature: Vec<u8>,
}

/// A signature that could not be attributed to any potential signer.
///
/// The signer identity is masked (only the chain's short hint survives) so
/// the response never echoes unverified key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedSignature {
    /// Masked signer identifier, e.g. `…1a2b3c4d` for a Stellar hint.
    pub signer_hint: String,
    #[serde(with = "crate::util::b64_bytes")]
    pub signature: Vec<u8>,
}

/// Per-submission deltas reported back to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxChanges {
    pub accepted: Vec<SignaturePair>,
    pub rejected: Vec<RejectedSignature>,
}

impl TxChanges {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

/// The persistent transaction record, keyed by [`TxHash`].
///
/// `payload` always holds the *unsigned* serialization; collected signatures
/// live exclusively in `signatures`. `payload`, `blockchain`, `network_name`
/// and `encoding` are immutable once the record exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub blockchain: String,
    pub network_name: String,
    pub payload: String,
    pub encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_uri: Option<String>,
    #[serde(default)]
    pub signatures: Vec<SignaturePair>,
    #[serde(default)]
    pub desired_signers: Vec<String>,
    #[serde(default)]
    pub submit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<Url>,
    /// Earliest finalization time, unix seconds. 0 = unset.
    #[serde(default)]
    pub min_time: i64,
    /// Expiration time, unix seconds. 0 = unset.
    #[serde(default)]
    pub max_time: i64,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<i64>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Whether a signature from `signer_key` is already recorded.
    pub fn has_signature_from(&self, signer_key: &str) -> bool {
        self.signatures.iter().any(|s| s.signer_key == signer_key)
    }

    /// Keys of all recorded signatures, in insertion order.
    pub fn signed_keys(&self) -> Vec<String> {
        self.signatures.iter().map(|s| s.signer_key.clone()).collect()
    }

    /// Whether the record has expired relative to `now` (unix seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.max_time != 0 && self.max_time <= now && !self.status.is_terminal()
    }
}

/// Wire response for `POST /tx` and `GET /tx/{hash}`: the record plus this
/// submission's deltas and, for Stellar, the legacy `xdr`/`network` mirror.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResponse {
    #[serde(flatten)]
    pub record: TransactionRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<TxChanges>,
    /// Legacy Stellar mirror of `payload`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xdr: Option<String>,
    /// Legacy Stellar network id (0 = public, 1 = testnet, 2 = futurenet).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<u8>,
}

impl TxResponse {
    /// Builds the wire view: Stellar records additionally mirror the
    /// payload as `xdr` plus the historical numeric network id.
    pub fn new(record: TransactionRecord, changes: Option<TxChanges>) -> Self {
        let (xdr, network) = if record.blockchain == "stellar" {
            (
                Some(record.payload.clone()),
                crate::request::legacy_network_id(&record.network_name),
            )
        } else {
            (None, None)
        };
        TxResponse {
            record,
            changes,
            xdr,
            network,
        }
    }
}
