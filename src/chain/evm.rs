//! EVM-family chain handler (Ethereum, Polygon, Base).
//!
//! Payloads are hex-encoded RLP: either a signed EIP-2718 envelope or an
//! unsigned transaction (typed, or a legacy field list). The canonical
//! record hash is the keccak256 *signing* hash of the unsigned form, so an
//! unsigned submission and its later signed counterpart converge on the
//! same record. Signer attribution is secp256k1 address recovery; there is
//! a single signature slot and feasibility is "the recovered key signed".

use alloy_consensus::transaction::{RlpEcdsaDecodableTx, RlpEcdsaEncodableTx};
use alloy_consensus::{SignableTransaction, Transaction as _, TxEip1559, TxEnvelope, TxLegacy, TypedTransaction};
use alloy_eips::eip2718::{Decodable2718, Encodable2718};
use alloy_primitives::{Address, B256, Signature};
use async_trait::async_trait;
use std::str::FromStr;

use crate::chain::{
    ChainError, ChainHandler, RawSignature, SignatureMatch, SignerSchema, TxDigest, TxObject,
    TxParams, mask_signer,
};
use crate::registry::NetworkSpec;
use crate::types::{Encoding, RejectedSignature, SignaturePair};

const EIP1559_TYPE: u8 = 0x02;

/// Parsed EVM transaction bound to its network's chain id.
#[derive(Debug, Clone)]
pub struct EvmTx {
    pub payload: EvmPayload,
    /// Chain id of the network the payload was submitted against.
    pub network_chain_id: u64,
}

/// Signed envelope or unsigned transaction body.
#[derive(Debug, Clone)]
pub enum EvmPayload {
    Signed(Box<TxEnvelope>),
    Unsigned(Box<TypedTransaction>),
}

/// EVM implementation of the handler capability set, parameterized by the
/// family member it is registered under.
pub struct EvmHandler {
    blockchain: &'static str,
}

impl EvmHandler {
    pub fn new(blockchain: &'static str) -> Self {
        EvmHandler { blockchain }
    }

    fn own(tx: &TxObject) -> Result<&EvmTx, ChainError> {
        match tx {
            TxObject::Evm(tx) => Ok(tx),
            _ => Err(ChainError::InvalidInput(
                "Expected an EVM transaction object".to_string(),
            )),
        }
    }

    fn decode_payload(bytes: &[u8]) -> Result<EvmPayload, ChainError> {
        // Signed envelopes first: every tx type decodes through EIP-2718.
        if let Ok(envelope) = TxEnvelope::decode_2718(&mut &bytes[..]) {
            if matches!(envelope, TxEnvelope::Eip4844(_)) {
                return Err(ChainError::UnsupportedFeature(
                    "Blob transactions are not supported".to_string(),
                ));
            }
            return Ok(EvmPayload::Signed(Box::new(envelope)));
        }
        // Unsigned bodies: typed EIP-1559 or a bare legacy field list.
        match bytes.first() {
            Some(&EIP1559_TYPE) => {
                let tx = TxEip1559::rlp_decode(&mut &bytes[1..]).map_err(|e| {
                    ChainError::InvalidInput(format!("Invalid unsigned EIP-1559 payload: {}", e))
                })?;
                Ok(EvmPayload::Unsigned(Box::new(TypedTransaction::Eip1559(tx))))
            }
            Some(first) if *first >= 0xc0 => {
                let tx = TxLegacy::rlp_decode(&mut &bytes[..]).map_err(|e| {
                    ChainError::InvalidInput(format!("Invalid unsigned legacy payload: {}", e))
                })?;
                Ok(EvmPayload::Unsigned(Box::new(TypedTransaction::Legacy(tx))))
            }
            Some(other) => Err(ChainError::UnsupportedFeature(format!(
                "Unsupported transaction type byte 0x{:02x}",
                other
            ))),
            None => Err(ChainError::InvalidInput("Empty payload".to_string())),
        }
    }

    fn embedded_chain_id(payload: &EvmPayload) -> Option<u64> {
        match payload {
            EvmPayload::Signed(envelope) => envelope.chain_id(),
            EvmPayload::Unsigned(tx) => tx.chain_id(),
        }
    }

    fn signing_hash(payload: &EvmPayload) -> Result<B256, ChainError> {
        match payload {
            EvmPayload::Signed(envelope) => Ok(match envelope.as_ref() {
                TxEnvelope::Legacy(signed) => signed.tx().signature_hash(),
                TxEnvelope::Eip2930(signed) => signed.tx().signature_hash(),
                TxEnvelope::Eip1559(signed) => signed.tx().signature_hash(),
                TxEnvelope::Eip7702(signed) => signed.tx().signature_hash(),
                TxEnvelope::Eip4844(_) => {
                    return Err(ChainError::UnsupportedFeature(
                        "Blob transactions are not supported".to_string(),
                    ));
                }
            }),
            EvmPayload::Unsigned(tx) => Ok(tx.signature_hash()),
        }
    }

    fn envelope_signature(envelope: &TxEnvelope) -> Result<Signature, ChainError> {
        Ok(match envelope {
            TxEnvelope::Legacy(signed) => *signed.signature(),
            TxEnvelope::Eip2930(signed) => *signed.signature(),
            TxEnvelope::Eip1559(signed) => *signed.signature(),
            TxEnvelope::Eip7702(signed) => *signed.signature(),
            TxEnvelope::Eip4844(_) => {
                return Err(ChainError::UnsupportedFeature(
                    "Blob transactions are not supported".to_string(),
                ));
            }
        })
    }

    fn unsigned_of(envelope: &TxEnvelope) -> Result<TypedTransaction, ChainError> {
        Ok(match envelope {
            TxEnvelope::Legacy(signed) => TypedTransaction::Legacy(signed.tx().clone()),
            TxEnvelope::Eip2930(signed) => TypedTransaction::Eip2930(signed.tx().clone()),
            TxEnvelope::Eip1559(signed) => TypedTransaction::Eip1559(signed.tx().clone()),
            TxEnvelope::Eip7702(signed) => TypedTransaction::Eip7702(signed.tx().clone()),
            TxEnvelope::Eip4844(_) => {
                return Err(ChainError::UnsupportedFeature(
                    "Blob transactions are not supported".to_string(),
                ));
            }
        })
    }

    fn recover(signature: &Signature, digest: &B256) -> Result<Address, ChainError> {
        signature
            .recover_address_from_prehash(digest)
            .map_err(|e| ChainError::InvalidInput(format!("Signature recovery failed: {}", e)))
    }

    fn parse_signature(bytes: &[u8]) -> Result<Signature, ChainError> {
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| ChainError::InvalidInput("Signature must be 65 bytes".to_string()))?;
        Signature::from_raw_array(&array)
            .map_err(|e| ChainError::InvalidInput(format!("Invalid signature: {}", e)))
    }
}

#[async_trait]
impl ChainHandler for EvmHandler {
    fn blockchain(&self) -> &'static str {
        self.blockchain
    }

    fn parse_transaction(
        &self,
        payload: &str,
        encoding: Encoding,
        network: &NetworkSpec,
    ) -> Result<TxObject, ChainError> {
        if encoding != Encoding::Hex {
            return Err(ChainError::UnsupportedEncoding(encoding));
        }
        let network_chain_id = network.chain_id.ok_or_else(|| {
            ChainError::InvalidInput(format!("Network {} has no chain id", network.name))
        })?;
        let stripped = payload.strip_prefix("0x").unwrap_or(payload);
        let bytes = hex::decode(stripped).map_err(|_| {
            ChainError::UnsupportedFeature("EVM payloads must be hex-encoded".to_string())
        })?;
        if bytes.is_empty() {
            return Err(ChainError::InvalidInput("Empty payload".to_string()));
        }
        let decoded = Self::decode_payload(&bytes)?;
        if let Some(embedded) = Self::embedded_chain_id(&decoded) {
            if embedded != network_chain_id {
                return Err(ChainError::InvalidInput(format!(
                    "Chain-id mismatch: payload declares {}, network {} expects {}",
                    embedded, network.name, network_chain_id
                )));
            }
        }
        Ok(TxObject::Evm(EvmTx {
            payload: decoded,
            network_chain_id,
        }))
    }

    fn compute_hash(&self, tx: &TxObject) -> Result<TxDigest, ChainError> {
        let tx = Self::own(tx)?;
        let hash = Self::signing_hash(&tx.payload)?;
        Ok(TxDigest(hash.to_vec()))
    }

    fn extract_signatures(&self, tx: &TxObject) -> Result<Vec<RawSignature>, ChainError> {
        let tx = Self::own(tx)?;
        match &tx.payload {
            EvmPayload::Signed(envelope) => {
                let signature = Self::envelope_signature(envelope)?;
                Ok(vec![RawSignature::Recoverable {
                    signature: signature.as_bytes().to_vec(),
                }])
            }
            EvmPayload::Unsigned(_) => Ok(Vec::new()),
        }
    }

    fn clear_signatures(&self, tx: &TxObject) -> Result<TxObject, ChainError> {
        let tx = Self::own(tx)?;
        let unsigned = match &tx.payload {
            EvmPayload::Signed(envelope) => Self::unsigned_of(envelope)?,
            EvmPayload::Unsigned(inner) => inner.as_ref().clone(),
        };
        Ok(TxObject::Evm(EvmTx {
            payload: EvmPayload::Unsigned(Box::new(unsigned)),
            network_chain_id: tx.network_chain_id,
        }))
    }

    fn verify_signature(&self, signer_key: &str, signature: &[u8], message: &[u8]) -> bool {
        let Ok(address) = Address::from_str(signer_key) else {
            return false;
        };
        if message.len() != 32 {
            return false;
        }
        let Ok(signature) = Self::parse_signature(signature) else {
            return false;
        };
        let digest = B256::from_slice(message);
        matches!(Self::recover(&signature, &digest), Ok(recovered) if recovered == address)
    }

    fn add_signature(
        &self,
        tx: &TxObject,
        signer_key: &str,
        signature: &[u8],
    ) -> Result<TxObject, ChainError> {
        let tx = Self::own(tx)?;
        let EvmPayload::Unsigned(unsigned) = &tx.payload else {
            // Single signature slot: a signed envelope is complete.
            return Err(ChainError::InvalidInput(
                "Transaction already carries a signature".to_string(),
            ));
        };
        let signature = Self::parse_signature(signature)?;
        let digest = unsigned.signature_hash();
        let recovered = Self::recover(&signature, &digest)?;
        let expected = Address::from_str(signer_key)
            .map_err(|_| ChainError::InvalidInput(format!("Invalid signer key: {}", signer_key)))?;
        if recovered != expected {
            return Err(ChainError::InvalidInput(format!(
                "Signature recovers to {}, not {}",
                recovered, expected
            )));
        }
        let envelope = match unsigned.as_ref().clone() {
            TypedTransaction::Legacy(inner) => TxEnvelope::Legacy(inner.into_signed(signature)),
            TypedTransaction::Eip2930(inner) => TxEnvelope::Eip2930(inner.into_signed(signature)),
            TypedTransaction::Eip1559(inner) => TxEnvelope::Eip1559(inner.into_signed(signature)),
            TypedTransaction::Eip7702(inner) => TxEnvelope::Eip7702(inner.into_signed(signature)),
            TypedTransaction::Eip4844(_) => {
                return Err(ChainError::UnsupportedFeature(
                    "Blob transactions are not supported".to_string(),
                ));
            }
        };
        Ok(TxObject::Evm(EvmTx {
            payload: EvmPayload::Signed(Box::new(envelope)),
            network_chain_id: tx.network_chain_id,
        }))
    }

    fn serialize_transaction(
        &self,
        tx: &TxObject,
        encoding: Encoding,
    ) -> Result<String, ChainError> {
        if encoding != Encoding::Hex {
            return Err(ChainError::UnsupportedEncoding(encoding));
        }
        let tx = Self::own(tx)?;
        let bytes = match &tx.payload {
            EvmPayload::Signed(envelope) => envelope.encoded_2718(),
            EvmPayload::Unsigned(unsigned) => match unsigned.as_ref() {
                TypedTransaction::Legacy(inner) => {
                    let mut buf = Vec::new();
                    inner.rlp_encode(&mut buf);
                    buf
                }
                TypedTransaction::Eip1559(inner) => {
                    let mut buf = vec![EIP1559_TYPE];
                    inner.rlp_encode(&mut buf);
                    buf
                }
                _ => {
                    return Err(ChainError::UnsupportedFeature(
                        "Unsigned serialization supports legacy and EIP-1559 payloads only"
                            .to_string(),
                    ));
                }
            },
        };
        Ok(format!("0x{}", hex::encode(bytes)))
    }

    async fn signer_schema(
        &self,
        tx: &TxObject,
        _network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError> {
        let tx = Self::own(tx)?;
        match &tx.payload {
            EvmPayload::Signed(envelope) => {
                let signature = Self::envelope_signature(envelope)?;
                let digest = Self::signing_hash(&tx.payload)?;
                let from = Self::recover(&signature, &digest)?;
                Ok(SignerSchema::single(from.to_string()))
            }
            // An unsigned body names no signer; the sender is only known
            // once a signed counterpart arrives.
            EvmPayload::Unsigned(_) => Ok(SignerSchema::empty()),
        }
    }

    fn match_signature_to_signer(
        &self,
        raw: &RawSignature,
        candidates: &[String],
        digest: &TxDigest,
    ) -> SignatureMatch {
        let RawSignature::Recoverable { signature } = raw else {
            return SignatureMatch::Unmatched(RejectedSignature {
                signer_hint: "…unknown".to_string(),
                signature: raw.signature_bytes().to_vec(),
            });
        };
        let unmatched = |signature: &[u8], hint: String| {
            SignatureMatch::Unmatched(RejectedSignature {
                signer_hint: hint,
                signature: signature.to_vec(),
            })
        };
        let Ok(parsed) = Self::parse_signature(signature) else {
            return unmatched(signature, "…invalid".to_string());
        };
        if digest.as_bytes().len() != 32 {
            return unmatched(signature, "…invalid".to_string());
        }
        let prehash = B256::from_slice(digest.as_bytes());
        let Ok(recovered) = Self::recover(&parsed, &prehash) else {
            return unmatched(signature, "…invalid".to_string());
        };
        let recovered_key = recovered.to_string();
        let accepted = candidates.is_empty()
            || candidates
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&recovered_key));
        if accepted {
            SignatureMatch::Matched(SignaturePair {
                signer_key: recovered_key,
                signature: signature.clone(),
            })
        } else {
            unmatched(signature, mask_signer(&recovered_key))
        }
    }

    fn is_valid_public_key(&self, key: &str) -> bool {
        let Some(stripped) = key.strip_prefix("0x") else {
            return false;
        };
        stripped.len() == 40 && Address::from_str(key).is_ok()
    }

    fn transaction_params(&self, tx: &TxObject) -> Result<TxParams, ChainError> {
        Self::own(tx)?;
        // EVM transactions carry no time bounds.
        Ok(TxParams::default())
    }
}
