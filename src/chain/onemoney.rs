//! 1Money chain handler.
//!
//! The payment transaction is a msgpack document (base64-wrapped on the
//! wire; a plain JSON rendering is also accepted under the `base64`
//! encoding). Keys are hex-encoded ed25519 public keys. The canonical hash
//! is the SHA-256 of the unsigned msgpack body, which is also the message
//! every signer signs. The policy is flat: the transaction source plus any
//! per-operation sources may sign, and one valid signature makes the
//! transaction feasible.

use async_trait::async_trait;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;

use crate::chain::{
    ChainError, ChainHandler, RawSignature, SignatureMatch, SignerSchema, TxDigest, TxObject,
    TxParams, WeightedSigner, mask_signer,
};
use crate::registry::NetworkSpec;
use crate::types::{Encoding, RejectedSignature, SignaturePair};

static HEX_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid 1Money key regex"));

/// One operation inside a 1Money transaction. Operations with their own
/// `source` add that account to the potential signer set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneMoneyOperation {
    /// Operation kind, e.g. `transfer` or `mint`.
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Operation parameters, opaque to the aggregator.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A signature entry bound to its signer key by the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneMoneySignature {
    pub public_key: String,
    #[serde(with = "crate::util::b64_bytes")]
    pub signature: Vec<u8>,
}

/// Parsed 1Money transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneMoneyTx {
    /// Hex-encoded ed25519 key of the paying account.
    pub source: String,
    pub nonce: u64,
    pub operations: Vec<OneMoneyOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_after: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<OneMoneySignature>,
}

impl OneMoneyTx {
    fn unsigned(&self) -> OneMoneyTx {
        OneMoneyTx {
            signatures: Vec::new(),
            ..self.clone()
        }
    }

    /// Source account plus per-operation sources, deduplicated, in
    /// first-appearance order.
    fn signer_keys(&self) -> Vec<String> {
        let mut keys = vec![self.source.clone()];
        for op in &self.operations {
            if let Some(source) = &op.source {
                if !keys.contains(source) {
                    keys.push(source.clone());
                }
            }
        }
        keys
    }
}

/// 1Money implementation of the handler capability set.
#[derive(Default)]
pub struct OneMoneyHandler;

impl OneMoneyHandler {
    pub fn new() -> Self {
        OneMoneyHandler
    }

    fn own(tx: &TxObject) -> Result<&OneMoneyTx, ChainError> {
        match tx {
            TxObject::OneMoney(tx) => Ok(tx),
            _ => Err(ChainError::InvalidInput(
                "Expected a 1Money transaction object".to_string(),
            )),
        }
    }

    fn decode_key(key: &str) -> Option<VerifyingKey> {
        if !HEX_KEY_REGEX.is_match(key) {
            return None;
        }
        let bytes = hex::decode(&key[2..]).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&array).ok()
    }
}

#[async_trait]
impl ChainHandler for OneMoneyHandler {
    fn blockchain(&self) -> &'static str {
        "onemoney"
    }

    fn parse_transaction(
        &self,
        payload: &str,
        encoding: Encoding,
        _network: &NetworkSpec,
    ) -> Result<TxObject, ChainError> {
        let bytes = b64
            .decode(payload.as_bytes())
            .map_err(|e| ChainError::InvalidInput(format!("Invalid base64 wrapper: {}", e)))?;
        let tx: OneMoneyTx = match encoding {
            Encoding::Msgpack => rmp_serde::from_slice(&bytes)
                .map_err(|e| ChainError::InvalidInput(format!("Invalid msgpack body: {}", e)))?,
            Encoding::Base64 => serde_json::from_slice(&bytes)
                .map_err(|e| ChainError::InvalidInput(format!("Invalid JSON body: {}", e)))?,
            other => return Err(ChainError::UnsupportedEncoding(other)),
        };
        if !HEX_KEY_REGEX.is_match(&tx.source) {
            return Err(ChainError::InvalidInput(format!(
                "Invalid source key: {}",
                tx.source
            )));
        }
        if tx.operations.is_empty() {
            return Err(ChainError::InvalidInput(
                "Transaction has no operations".to_string(),
            ));
        }
        Ok(TxObject::OneMoney(tx))
    }

    fn compute_hash(&self, tx: &TxObject) -> Result<TxDigest, ChainError> {
        let tx = Self::own(tx)?;
        let bytes = rmp_serde::to_vec_named(&tx.unsigned())
            .map_err(|e| ChainError::InvalidInput(format!("Msgpack encoding failed: {}", e)))?;
        Ok(TxDigest(Sha256::digest(&bytes).to_vec()))
    }

    fn extract_signatures(&self, tx: &TxObject) -> Result<Vec<RawSignature>, ChainError> {
        let tx = Self::own(tx)?;
        Ok(tx
            .signatures
            .iter()
            .map(|s| RawSignature::Keyed {
                signer_key: s.public_key.clone(),
                signature: s.signature.clone(),
            })
            .collect())
    }

    fn clear_signatures(&self, tx: &TxObject) -> Result<TxObject, ChainError> {
        let tx = Self::own(tx)?;
        Ok(TxObject::OneMoney(tx.unsigned()))
    }

    fn verify_signature(&self, signer_key: &str, signature: &[u8], message: &[u8]) -> bool {
        let Some(verifying_key) = Self::decode_key(signer_key) else {
            return false;
        };
        let Ok(signature) = DalekSignature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    fn add_signature(
        &self,
        tx: &TxObject,
        signer_key: &str,
        signature: &[u8],
    ) -> Result<TxObject, ChainError> {
        let tx = Self::own(tx)?;
        if !HEX_KEY_REGEX.is_match(signer_key) {
            return Err(ChainError::InvalidInput(format!(
                "Invalid signer key: {}",
                signer_key
            )));
        }
        if signature.len() != 64 {
            return Err(ChainError::InvalidInput(
                "Signature must be 64 bytes".to_string(),
            ));
        }
        let mut next = tx.clone();
        if !next
            .signatures
            .iter()
            .any(|s| s.public_key.eq_ignore_ascii_case(signer_key))
        {
            next.signatures.push(OneMoneySignature {
                public_key: signer_key.to_string(),
                signature: signature.to_vec(),
            });
        }
        Ok(TxObject::OneMoney(next))
    }

    fn serialize_transaction(
        &self,
        tx: &TxObject,
        encoding: Encoding,
    ) -> Result<String, ChainError> {
        let tx = Self::own(tx)?;
        let bytes = match encoding {
            Encoding::Msgpack => rmp_serde::to_vec_named(tx)
                .map_err(|e| ChainError::InvalidInput(format!("Msgpack encoding failed: {}", e)))?,
            Encoding::Base64 => serde_json::to_vec(tx)
                .map_err(|e| ChainError::InvalidInput(format!("JSON encoding failed: {}", e)))?,
            other => return Err(ChainError::UnsupportedEncoding(other)),
        };
        Ok(b64.encode(bytes))
    }

    async fn signer_schema(
        &self,
        tx: &TxObject,
        _network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError> {
        let tx = Self::own(tx)?;
        let signers = tx
            .signer_keys()
            .into_iter()
            .map(|key| WeightedSigner { key, weight: 1 })
            .collect();
        // Any single valid signer makes the transaction feasible.
        Ok(SignerSchema {
            signers,
            threshold: 1,
        })
    }

    fn match_signature_to_signer(
        &self,
        raw: &RawSignature,
        candidates: &[String],
        digest: &TxDigest,
    ) -> SignatureMatch {
        let RawSignature::Keyed {
            signer_key,
            signature,
        } = raw
        else {
            return SignatureMatch::Unmatched(RejectedSignature {
                signer_hint: "…unknown".to_string(),
                signature: raw.signature_bytes().to_vec(),
            });
        };
        let known = candidates
            .iter()
            .any(|c| c.eq_ignore_ascii_case(signer_key));
        if known && self.verify_signature(signer_key, signature, digest.as_bytes()) {
            SignatureMatch::Matched(SignaturePair {
                signer_key: signer_key.clone(),
                signature: signature.clone(),
            })
        } else {
            SignatureMatch::Unmatched(RejectedSignature {
                signer_hint: mask_signer(signer_key),
                signature: signature.clone(),
            })
        }
    }

    fn is_valid_public_key(&self, key: &str) -> bool {
        Self::decode_key(key).is_some()
    }

    fn transaction_params(&self, tx: &TxObject) -> Result<TxParams, ChainError> {
        let tx = Self::own(tx)?;
        Ok(TxParams {
            min_time: tx.valid_after.unwrap_or(0),
            max_time: tx.valid_until.unwrap_or(0),
        })
    }
}
