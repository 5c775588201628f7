//! Stellar chain handler.
//!
//! Payloads are base64 XDR `TransactionEnvelope`s. The canonical hash is the
//! SHA-256 of the `TransactionSignaturePayload` (network id + transaction),
//! which is exactly the message account signers sign. Signatures are
//! decorated with a 4-byte hint (the tail of the signer's public key);
//! attribution iterates hint-matching candidates and keeps the first key
//! whose ed25519 verification succeeds.
//!
//! Signer discovery needs the account's on-chain signer set and thresholds,
//! which come from a [`SignerSchemaSource`]: Horizon in production, a static
//! table in tests.

use async_trait::async_trait;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stellar_xdr::curr::{
    DecoratedSignature, Hash, Limits, Preconditions, ReadXdr, Signature as XdrSignature,
    SignatureHint, TimeBounds, Transaction, TransactionEnvelope, TransactionExt,
    TransactionSignaturePayload, TransactionSignaturePayloadTaggedTransaction,
    TransactionV1Envelope, VecM, WriteXdr,
};
use url::Url;

use crate::chain::{
    ChainError, ChainHandler, RawSignature, SignatureMatch, SignerSchema, TxDigest, TxObject,
    TxParams, WeightedSigner,
};
use crate::registry::NetworkSpec;
use crate::types::{Encoding, RejectedSignature, SignaturePair};

/// Parsed Stellar transaction: the original envelope (v0 or v1) plus the
/// passphrase of the network it is bound to.
///
/// The envelope is kept in its submitted form so that serialization is a
/// byte-exact inverse of parsing; fee-bump envelopes never get this far.
#[derive(Debug, Clone)]
pub struct StellarTx {
    pub envelope: TransactionEnvelope,
    pub network_passphrase: String,
}

impl StellarTx {
    /// The v1 transaction view of the envelope. V0 envelopes hash and sign
    /// as their v1 equivalent, so this is the form all signing-related
    /// operations use.
    pub fn transaction(&self) -> Result<Transaction, ChainError> {
        match &self.envelope {
            TransactionEnvelope::Tx(env) => Ok(env.tx.clone()),
            TransactionEnvelope::TxV0(env) => {
                let v0 = &env.tx;
                Ok(Transaction {
                    source_account: stellar_xdr::curr::MuxedAccount::Ed25519(
                        v0.source_account_ed25519.clone(),
                    ),
                    fee: v0.fee,
                    seq_num: v0.seq_num.clone(),
                    cond: match v0.time_bounds.clone() {
                        Some(tb) => Preconditions::Time(tb),
                        None => Preconditions::None,
                    },
                    memo: v0.memo.clone(),
                    operations: v0.operations.clone(),
                    ext: TransactionExt::V0,
                })
            }
            TransactionEnvelope::TxFeeBump(_) => Err(ChainError::UnsupportedFeature(
                "Fee-bump envelopes are not supported".to_string(),
            )),
        }
    }

    fn signatures(&self) -> &[DecoratedSignature] {
        match &self.envelope {
            TransactionEnvelope::Tx(env) => env.signatures.as_slice(),
            TransactionEnvelope::TxV0(env) => env.signatures.as_slice(),
            TransactionEnvelope::TxFeeBump(env) => env.signatures.as_slice(),
        }
    }

    fn with_signatures(&self, signatures: Vec<DecoratedSignature>) -> Result<Self, ChainError> {
        let signatures: VecM<DecoratedSignature, 20> = signatures
            .try_into()
            .map_err(|_| ChainError::InvalidInput("Too many signatures (limit 20)".to_string()))?;
        let envelope = match &self.envelope {
            TransactionEnvelope::Tx(env) => TransactionEnvelope::Tx(TransactionV1Envelope {
                tx: env.tx.clone(),
                signatures,
            }),
            TransactionEnvelope::TxV0(env) => {
                TransactionEnvelope::TxV0(stellar_xdr::curr::TransactionV0Envelope {
                    tx: env.tx.clone(),
                    signatures,
                })
            }
            TransactionEnvelope::TxFeeBump(_) => {
                return Err(ChainError::UnsupportedFeature(
                    "Fee-bump envelopes are not supported".to_string(),
                ));
            }
        };
        Ok(StellarTx {
            envelope,
            network_passphrase: self.network_passphrase.clone(),
        })
    }

    /// Strkey of the transaction source account.
    pub fn source_account(&self) -> Result<String, ChainError> {
        let tx = self.transaction()?;
        let ed25519 = match tx.source_account {
            stellar_xdr::curr::MuxedAccount::Ed25519(bytes) => bytes,
            stellar_xdr::curr::MuxedAccount::MuxedEd25519(m) => m.ed25519,
        };
        Ok(stellar_strkey::ed25519::PublicKey(ed25519.0).to_string())
    }
}

/// Provider of per-account signer sets and thresholds.
///
/// Production uses [`HorizonSchemaSource`]; tests inject a
/// [`StaticSchemaSource`].
#[async_trait]
pub trait SignerSchemaSource: Send + Sync {
    async fn account_schema(
        &self,
        account: &str,
        network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError>;
}

/// Fetches the signer schema from a Horizon `/accounts/{id}` endpoint.
pub struct HorizonSchemaSource {
    client: reqwest::Client,
    /// Per-network endpoint overrides; the registry default applies
    /// otherwise.
    overrides: HashMap<String, Url>,
    timeout: Duration,
}

#[derive(serde::Deserialize)]
struct HorizonAccount {
    signers: Vec<HorizonSigner>,
    thresholds: HorizonThresholds,
}

#[derive(serde::Deserialize)]
struct HorizonSigner {
    key: String,
    weight: u32,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(serde::Deserialize)]
struct HorizonThresholds {
    med_threshold: u32,
}

impl HorizonSchemaSource {
    pub fn new(client: reqwest::Client, overrides: HashMap<String, Url>, timeout: Duration) -> Self {
        HorizonSchemaSource {
            client,
            overrides,
            timeout,
        }
    }

    fn endpoint(&self, network: &NetworkSpec) -> Result<Url, ChainError> {
        if let Some(url) = self.overrides.get(network.name) {
            return Ok(url.clone());
        }
        network
            .endpoint
            .and_then(|e| Url::parse(e).ok())
            .ok_or_else(|| {
                ChainError::TransientBackend(format!(
                    "No Horizon endpoint configured for network {}",
                    network.name
                ))
            })
    }
}

#[async_trait]
impl SignerSchemaSource for HorizonSchemaSource {
    async fn account_schema(
        &self,
        account: &str,
        network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError> {
        let mut url = self.endpoint(network)?;
        url.path_segments_mut()
            .map_err(|_| ChainError::TransientBackend("Invalid Horizon endpoint".to_string()))?
            .pop_if_empty()
            .extend(["accounts", account]);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChainError::TransientBackend(format!("Horizon request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChainError::InvalidInput(format!(
                "Source account {} not found on {}",
                account, network.name
            )));
        }
        if !response.status().is_success() {
            return Err(ChainError::TransientBackend(format!(
                "Horizon returned {}",
                response.status()
            )));
        }
        let account: HorizonAccount = response
            .json()
            .await
            .map_err(|e| ChainError::TransientBackend(format!("Invalid Horizon response: {}", e)))?;

        let signers = account
            .signers
            .into_iter()
            .filter(|s| s.kind == "ed25519_public_key" && s.weight > 0)
            .map(|s| WeightedSigner {
                key: s.key,
                weight: s.weight,
            })
            .collect();
        Ok(SignerSchema {
            signers,
            // Threshold 0 still requires one valid signature.
            threshold: account.thresholds.med_threshold.max(1),
        })
    }
}

/// Fixed schema table keyed by account strkey. For tests and standalone
/// deployments without chain access.
#[derive(Default)]
pub struct StaticSchemaSource {
    schemas: HashMap<String, SignerSchema>,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: impl Into<String>, schema: SignerSchema) {
        self.schemas.insert(account.into(), schema);
    }
}

#[async_trait]
impl SignerSchemaSource for StaticSchemaSource {
    async fn account_schema(
        &self,
        account: &str,
        _network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError> {
        self.schemas.get(account).cloned().ok_or_else(|| {
            ChainError::InvalidInput(format!("Source account {} not found", account))
        })
    }
}

/// Stellar implementation of the handler capability set.
pub struct StellarHandler {
    schema_source: Arc<dyn SignerSchemaSource>,
}

impl StellarHandler {
    pub fn new(schema_source: Arc<dyn SignerSchemaSource>) -> Self {
        StellarHandler { schema_source }
    }

    fn own(tx: &TxObject) -> Result<&StellarTx, ChainError> {
        match tx {
            TxObject::Stellar(tx) => Ok(tx),
            _ => Err(ChainError::InvalidInput(
                "Expected a Stellar transaction object".to_string(),
            )),
        }
    }

    fn decode_key(key: &str) -> Option<VerifyingKey> {
        let pk = stellar_strkey::ed25519::PublicKey::from_string(key).ok()?;
        VerifyingKey::from_bytes(&pk.0).ok()
    }
}

#[async_trait]
impl ChainHandler for StellarHandler {
    fn blockchain(&self) -> &'static str {
        "stellar"
    }

    fn parse_transaction(
        &self,
        payload: &str,
        encoding: Encoding,
        network: &NetworkSpec,
    ) -> Result<TxObject, ChainError> {
        if encoding != Encoding::Base64 {
            return Err(ChainError::UnsupportedEncoding(encoding));
        }
        let passphrase = network.passphrase.ok_or_else(|| {
            ChainError::InvalidInput(format!("Network {} has no passphrase", network.name))
        })?;
        let envelope = TransactionEnvelope::from_xdr_base64(payload, Limits::none())
            .map_err(|e| ChainError::InvalidInput(format!("Invalid XDR envelope: {}", e)))?;
        if matches!(envelope, TransactionEnvelope::TxFeeBump(_)) {
            return Err(ChainError::UnsupportedFeature(
                "Fee-bump envelopes are not supported".to_string(),
            ));
        }
        Ok(TxObject::Stellar(StellarTx {
            envelope,
            network_passphrase: passphrase.to_string(),
        }))
    }

    fn compute_hash(&self, tx: &TxObject) -> Result<TxDigest, ChainError> {
        let tx = Self::own(tx)?;
        let network_id = Sha256::digest(tx.network_passphrase.as_bytes());
        let payload = TransactionSignaturePayload {
            network_id: Hash(network_id.into()),
            tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(
                tx.transaction()?,
            ),
        };
        let bytes = payload
            .to_xdr(Limits::none())
            .map_err(|e| ChainError::InvalidInput(format!("XDR encoding failed: {}", e)))?;
        Ok(TxDigest(Sha256::digest(&bytes).to_vec()))
    }

    fn extract_signatures(&self, tx: &TxObject) -> Result<Vec<RawSignature>, ChainError> {
        let tx = Self::own(tx)?;
        Ok(tx
            .signatures()
            .iter()
            .map(|sig| RawSignature::Hinted {
                hint: sig.hint.0,
                signature: sig.signature.0.to_vec(),
            })
            .collect())
    }

    fn clear_signatures(&self, tx: &TxObject) -> Result<TxObject, ChainError> {
        let tx = Self::own(tx)?;
        Ok(TxObject::Stellar(tx.with_signatures(Vec::new())?))
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
        let pk = stellar_strkey::ed25519::PublicKey::from_string(signer_key)
            .map_err(|_| ChainError::InvalidInput(format!("Invalid signer key: {}", signer_key)))?;
        let sig_bytes: Vec<u8> = signature.to_vec();
        let xdr_signature: XdrSignature = XdrSignature(
            sig_bytes
                .try_into()
                .map_err(|_| ChainError::InvalidInput("Signature must be 64 bytes".to_string()))?,
        );
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&pk.0[28..]);
        let mut signatures = tx.signatures().to_vec();
        signatures.push(DecoratedSignature {
            hint: SignatureHint(hint),
            signature: xdr_signature,
        });
        Ok(TxObject::Stellar(tx.with_signatures(signatures)?))
    }

    fn serialize_transaction(
        &self,
        tx: &TxObject,
        encoding: Encoding,
    ) -> Result<String, ChainError> {
        if encoding != Encoding::Base64 {
            return Err(ChainError::UnsupportedEncoding(encoding));
        }
        let tx = Self::own(tx)?;
        tx.envelope
            .to_xdr_base64(Limits::none())
            .map_err(|e| ChainError::InvalidInput(format!("XDR encoding failed: {}", e)))
    }

    async fn signer_schema(
        &self,
        tx: &TxObject,
        network: &NetworkSpec,
    ) -> Result<SignerSchema, ChainError> {
        let tx = Self::own(tx)?;
        let source = tx.source_account()?;
        self.schema_source.account_schema(&source, network).await
    }

    fn match_signature_to_signer(
        &self,
        raw: &RawSignature,
        candidates: &[String],
        digest: &TxDigest,
    ) -> SignatureMatch {
        let RawSignature::Hinted { hint, signature } = raw else {
            return SignatureMatch::Unmatched(RejectedSignature {
                signer_hint: "…unknown".to_string(),
                signature: raw.signature_bytes().to_vec(),
            });
        };
        for candidate in candidates {
            let Ok(pk) = stellar_strkey::ed25519::PublicKey::from_string(candidate) else {
                continue;
            };
            if &pk.0[28..] != hint {
                continue;
            }
            if self.verify_signature(candidate, signature, digest.as_bytes()) {
                return SignatureMatch::Matched(SignaturePair {
                    signer_key: candidate.clone(),
                    signature: signature.clone(),
                });
            }
        }
        SignatureMatch::Unmatched(RejectedSignature {
            signer_hint: format!("…{}", hex::encode(hint)),
            signature: signature.clone(),
        })
    }

    fn is_valid_public_key(&self, key: &str) -> bool {
        stellar_strkey::ed25519::PublicKey::from_string(key).is_ok()
    }

    fn transaction_params(&self, tx: &TxObject) -> Result<TxParams, ChainError> {
        let tx = Self::own(tx)?;
        let bounds: Option<TimeBounds> = match tx.transaction()?.cond {
            Preconditions::None => None,
            Preconditions::Time(tb) => Some(tb),
            Preconditions::V2(v2) => v2.time_bounds,
        };
        Ok(match bounds {
            Some(tb) => TxParams {
                min_time: tb.min_time.0 as i64,
                max_time: tb.max_time.0 as i64,
            },
            None => TxParams::default(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use stellar_xdr::curr::{
        Asset, Memo, MuxedAccount, Operation, OperationBody, PaymentOp, SequenceNumber, TimePoint,
        TransactionV0, TransactionV0Envelope, TransactionV0Ext, Uint256,
    };

    use crate::registry;

    pub(crate) fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    pub(crate) fn strkey_of(key: &SigningKey) -> String {
        stellar_strkey::ed25519::PublicKey(key.verifying_key().to_bytes()).to_string()
    }

    pub(crate) fn testnet() -> &'static NetworkSpec {
        registry::network_config("stellar", "testnet").unwrap()
    }

    fn payment_operation(destination: [u8; 32]) -> Operation {
        Operation {
            source_account: None,
            body: OperationBody::Payment(PaymentOp {
                destination: MuxedAccount::Ed25519(Uint256(destination)),
                asset: Asset::Native,
                amount: 10_000_000,
            }),
        }
    }

    pub(crate) fn unsigned_envelope(source: &SigningKey, time_bounds: Option<(u64, u64)>) -> String {
        let tx = Transaction {
            source_account: MuxedAccount::Ed25519(Uint256(source.verifying_key().to_bytes())),
            fee: 100,
            seq_num: SequenceNumber(4242),
            cond: match time_bounds {
                Some((min, max)) => Preconditions::Time(TimeBounds {
                    min_time: TimePoint(min),
                    max_time: TimePoint(max),
                }),
                None => Preconditions::None,
            },
            memo: Memo::None,
            operations: vec![payment_operation([9u8; 32])].try_into().unwrap(),
            ext: TransactionExt::V0,
        };
        TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: VecM::default(),
        })
        .to_xdr_base64(Limits::none())
        .unwrap()
    }

    fn handler_with(schemas: Vec<(String, SignerSchema)>) -> StellarHandler {
        let mut source = StaticSchemaSource::new();
        for (account, schema) in schemas {
            source.insert(account, schema);
        }
        StellarHandler::new(Arc::new(source))
    }

    fn handler() -> StellarHandler {
        handler_with(Vec::new())
    }

    #[test]
    fn test_parse_serialize_roundtrip() {
        let key = signing_key(1);
        let xdr = unsigned_envelope(&key, Some((10, 2_000_000_000)));
        let handler = handler();
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let back = handler.serialize_transaction(&tx, Encoding::Base64).unwrap();
        assert_eq!(back, xdr);
    }

    #[test]
    fn test_rejects_wrong_encoding() {
        let key = signing_key(1);
        let xdr = unsigned_envelope(&key, None);
        let err = handler()
            .parse_transaction(&xdr, Encoding::Hex, testnet())
            .unwrap_err();
        assert!(matches!(err, ChainError::UnsupportedEncoding(_)));
    }

    #[test]
    fn test_rejects_garbage_payload() {
        let err = handler()
            .parse_transaction("AAAA!!!", Encoding::Base64, testnet())
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_fee_bump() {
        use stellar_xdr::curr::{
            FeeBumpTransaction, FeeBumpTransactionEnvelope, FeeBumpTransactionExt,
            FeeBumpTransactionInnerTx,
        };
        let key = signing_key(1);
        let inner_xdr = unsigned_envelope(&key, None);
        let inner = match TransactionEnvelope::from_xdr_base64(&inner_xdr, Limits::none()).unwrap()
        {
            TransactionEnvelope::Tx(env) => env,
            _ => unreachable!(),
        };
        let fee_bump = TransactionEnvelope::TxFeeBump(FeeBumpTransactionEnvelope {
            tx: FeeBumpTransaction {
                fee_source: MuxedAccount::Ed25519(Uint256([3u8; 32])),
                fee: 1000,
                inner_tx: FeeBumpTransactionInnerTx::Tx(inner),
                ext: FeeBumpTransactionExt::V0,
            },
            signatures: VecM::default(),
        })
        .to_xdr_base64(Limits::none())
        .unwrap();
        let err = handler()
            .parse_transaction(&fee_bump, Encoding::Base64, testnet())
            .unwrap_err();
        assert!(matches!(err, ChainError::UnsupportedFeature(_)));
    }

    #[test]
    fn test_hash_is_network_bound() {
        let key = signing_key(1);
        let xdr = unsigned_envelope(&key, None);
        let handler = handler();
        let on_testnet = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let on_public = handler
            .parse_transaction(
                &xdr,
                Encoding::Base64,
                registry::network_config("stellar", "public").unwrap(),
            )
            .unwrap();
        let h1 = handler.compute_hash(&on_testnet).unwrap();
        let h2 = handler.compute_hash(&on_public).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1.to_hex().len(), 64);
    }

    #[test]
    fn test_hash_ignores_signatures() {
        let key = signing_key(1);
        let xdr = unsigned_envelope(&key, None);
        let handler = handler();
        let unsigned = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let digest = handler.compute_hash(&unsigned).unwrap();
        let signature = key.sign(digest.as_bytes());
        let signed = handler
            .add_signature(&unsigned, &strkey_of(&key), &signature.to_bytes())
            .unwrap();
        assert_eq!(handler.compute_hash(&signed).unwrap(), digest);
    }

    #[test]
    fn test_add_extract_and_match_signature() {
        let key = signing_key(7);
        let strkey = strkey_of(&key);
        let xdr = unsigned_envelope(&key, None);
        let handler = handler();
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let digest = handler.compute_hash(&tx).unwrap();
        let signature = key.sign(digest.as_bytes());
        let signed = handler
            .add_signature(&tx, &strkey, &signature.to_bytes())
            .unwrap();

        let raw = handler.extract_signatures(&signed).unwrap();
        assert_eq!(raw.len(), 1);

        let candidates = vec![strkey.clone(), strkey_of(&signing_key(8))];
        match handler.match_signature_to_signer(&raw[0], &candidates, &digest) {
            SignatureMatch::Matched(pair) => {
                assert_eq!(pair.signer_key, strkey);
                assert_eq!(pair.signature, signature.to_bytes().to_vec());
            }
            SignatureMatch::Unmatched(_) => panic!("signature should match"),
        }
    }

    #[test]
    fn test_unmatched_signature_is_masked() {
        let signer = signing_key(7);
        let stranger = strkey_of(&signing_key(9));
        let xdr = unsigned_envelope(&signer, None);
        let handler = handler();
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let digest = handler.compute_hash(&tx).unwrap();
        let signature = signer.sign(digest.as_bytes());
        let signed = handler
            .add_signature(&tx, &strkey_of(&signer), &signature.to_bytes())
            .unwrap();
        let raw = handler.extract_signatures(&signed).unwrap();

        // The signer is not among the candidates: rejected, hint masked.
        match handler.match_signature_to_signer(&raw[0], &[stranger], &digest) {
            SignatureMatch::Unmatched(rejected) => {
                assert!(rejected.signer_hint.starts_with('…'));
                assert_eq!(rejected.signer_hint.chars().count(), 9);
            }
            SignatureMatch::Matched(_) => panic!("signature should not match"),
        }
    }

    #[test]
    fn test_clear_signatures_restores_unsigned_form() {
        let key = signing_key(7);
        let xdr = unsigned_envelope(&key, None);
        let handler = handler();
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let digest = handler.compute_hash(&tx).unwrap();
        let signature = key.sign(digest.as_bytes());
        let signed = handler
            .add_signature(&tx, &strkey_of(&key), &signature.to_bytes())
            .unwrap();
        let cleared = handler.clear_signatures(&signed).unwrap();
        assert_eq!(
            handler.serialize_transaction(&cleared, Encoding::Base64).unwrap(),
            xdr
        );
    }

    #[test]
    fn test_v0_envelope_parses_and_extracts_time_bounds() {
        let key = signing_key(2);
        let tx_v0 = TransactionV0 {
            source_account_ed25519: Uint256(key.verifying_key().to_bytes()),
            fee: 100,
            seq_num: SequenceNumber(7),
            time_bounds: Some(TimeBounds {
                min_time: TimePoint(100),
                max_time: TimePoint(200),
            }),
            memo: Memo::None,
            operations: vec![payment_operation([9u8; 32])].try_into().unwrap(),
            ext: TransactionV0Ext::V0,
        };
        let xdr = TransactionEnvelope::TxV0(TransactionV0Envelope {
            tx: tx_v0,
            signatures: VecM::default(),
        })
        .to_xdr_base64(Limits::none())
        .unwrap();

        let handler = handler();
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let params = handler.transaction_params(&tx).unwrap();
        assert_eq!(params, TxParams { min_time: 100, max_time: 200 });
        // V0 keeps its original bytes through serialize.
        assert_eq!(
            handler.serialize_transaction(&tx, Encoding::Base64).unwrap(),
            xdr
        );
    }

    #[test]
    fn test_key_validation() {
        let handler = handler();
        let valid = strkey_of(&signing_key(4));
        assert!(handler.is_valid_public_key(&valid));
        // Mixed case breaks the strkey checksum alphabet.
        let mixed = valid.to_lowercase();
        assert!(!handler.is_valid_public_key(&mixed));
        assert!(!handler.is_valid_public_key("GABC"));
        assert!(!handler.is_valid_public_key(""));
    }

    #[tokio::test]
    async fn test_signer_schema_from_static_source() {
        let source_key = signing_key(1);
        let co_key = signing_key(2);
        let account = strkey_of(&source_key);
        let schema = SignerSchema {
            signers: vec![
                WeightedSigner { key: account.clone(), weight: 1 },
                WeightedSigner { key: strkey_of(&co_key), weight: 1 },
            ],
            threshold: 2,
        };
        let handler = handler_with(vec![(account.clone(), schema.clone())]);
        let xdr = unsigned_envelope(&source_key, None);
        let tx = handler
            .parse_transaction(&xdr, Encoding::Base64, testnet())
            .unwrap();
        let fetched = handler.signer_schema(&tx, testnet()).await.unwrap();
        assert_eq!(fetched, schema);
        let signers = handler.potential_signers(&tx, testnet()).await.unwrap();
        assert_eq!(signers.len(), 2);
    }
}
