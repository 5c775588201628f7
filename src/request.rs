//! Request normalizer: folds the three accepted submission shapes into one
//! internal record.
//!
//! `POST /tx` accepts:
//!
//! 1. **URI** – `{txUri, …}`
//! 2. **Components** – `{blockchain, networkName, payload, encoding?, …}`
//! 3. **Legacy Stellar** – `{xdr, network, …}` where `network` is the
//!    historical numeric id (0 = public, 1 = testnet, 2 = futurenet) or its
//!    string form.
//!
//! Shapes are detected in that order; a body matching more than one shape is
//! ambiguous and rejected. Legacy submissions retain a sub-record so the
//! response can mirror the historical `xdr`/`network` fields byte-exactly.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

use crate::tx_uri::{self, UriFormat};
use crate::types::{Encoding, MAX_TIME_CEILING};
use crate::{registry, tx_uri::ParsedTxUri};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Ambiguous request: {0}")]
    Ambiguous(&'static str),
    #[error("Unrecognized request format: provide txUri, blockchain components, or legacy xdr")]
    Unrecognized,
    #[error(transparent)]
    Uri(#[from] tx_uri::TxUriError),
    #[error("Unknown blockchain: {0}")]
    UnknownBlockchain(String),
    #[error("Unknown network {network} for blockchain {blockchain}")]
    UnknownNetwork { blockchain: String, network: String },
    #[error("Missing network for blockchain {0}")]
    MissingNetwork(String),
    #[error("Unknown legacy network id: {0}")]
    UnknownLegacyNetwork(String),
    #[error("Invalid callback URL: {0}")]
    InvalidCallbackUrl(String),
    #[error("Invalid expires value: {0}")]
    InvalidExpires(i64),
    #[error("Transaction already expired (expires={0})")]
    AlreadyExpired(i64),
}

/// Raw `POST /tx` body. All fields optional; shape detection decides which
/// combination is meaningful.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSubmitRequest {
    pub tx_uri: Option<String>,
    pub blockchain: Option<String>,
    pub network_name: Option<String>,
    pub payload: Option<String>,
    pub encoding: Option<String>,
    /// Legacy Stellar envelope, base64 XDR.
    pub xdr: Option<String>,
    /// Legacy Stellar network id: integer 0/1/2 or string form.
    pub network: Option<serde_json::Value>,
    pub callback_url: Option<String>,
    #[serde(default)]
    pub submit: bool,
    #[serde(default)]
    pub desired_signers: Vec<String>,
    /// Requested expiration, unix seconds. Merged into `maxTime`.
    pub expires: Option<i64>,
}

/// Legacy identity retained for Stellar records created through the old API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStellar {
    /// Historical network id: 0 = public, 1 = testnet, 2 = futurenet.
    pub network_id: u8,
}

/// One normalized submission, independent of the shape it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub blockchain: String,
    pub network_name: String,
    pub payload: String,
    pub encoding: Encoding,
    pub tx_uri: Option<String>,
    pub callback_url: Option<Url>,
    pub submit: bool,
    pub desired_signers: Vec<String>,
    pub min_time: i64,
    pub max_time: i64,
    pub legacy: Option<LegacyStellar>,
}

/// Maps a canonical Stellar network name to its legacy numeric id.
pub fn legacy_network_id(network_name: &str) -> Option<u8> {
    match network_name {
        "public" => Some(0),
        "testnet" => Some(1),
        "futurenet" => Some(2),
        _ => None,
    }
}

fn legacy_network_name(value: &serde_json::Value) -> Result<&'static str, NormalizeError> {
    match value {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(0) => Ok("public"),
            Some(1) => Ok("testnet"),
            Some(2) => Ok("futurenet"),
            _ => Err(NormalizeError::UnknownLegacyNetwork(n.to_string())),
        },
        serde_json::Value::String(s) => match s.to_lowercase().as_str() {
            "public" => Ok("public"),
            "testnet" => Ok("testnet"),
            "futurenet" => Ok("futurenet"),
            other => Err(NormalizeError::UnknownLegacyNetwork(other.to_string())),
        },
        other => Err(NormalizeError::UnknownLegacyNetwork(other.to_string())),
    }
}

/// Normalizes a raw submission. `now` is the current unix time, used to
/// reject already-expired requests.
pub fn normalize(req: &TxSubmitRequest, now: i64) -> Result<NormalizedRequest, NormalizeError> {
    if req.tx_uri.is_some() && (req.xdr.is_some() || req.payload.is_some()) {
        return Err(NormalizeError::Ambiguous(
            "txUri can not be combined with payload or xdr",
        ));
    }
    if req.payload.is_some() && req.xdr.is_some() {
        return Err(NormalizeError::Ambiguous(
            "payload can not be combined with xdr",
        ));
    }

    let (blockchain, network_name, payload, encoding, tx_uri, legacy) =
        if let Some(uri) = &req.tx_uri {
            from_uri(req, uri)?
        } else if req.blockchain.is_some() {
            from_components(req)?
        } else if let Some(xdr) = &req.xdr {
            from_legacy(req, xdr)?
        } else if req
            .payload
            .as_deref()
            .is_some_and(tx_uri::is_legacy_stellar_payload)
        {
            // Bare Stellar envelope in `payload` with no blockchain marker.
            let xdr = req.payload.clone().expect("payload present");
            from_legacy(req, &xdr)?
        } else {
            return Err(NormalizeError::Unrecognized);
        };

    let callback_url = match &req.callback_url {
        Some(raw) => Some(parse_callback_url(raw)?),
        None => None,
    };

    let max_time = match req.expires {
        None => 0,
        Some(expires) => {
            if expires <= 0 || expires > MAX_TIME_CEILING {
                return Err(NormalizeError::InvalidExpires(expires));
            }
            if expires <= now {
                return Err(NormalizeError::AlreadyExpired(expires));
            }
            expires
        }
    };

    Ok(NormalizedRequest {
        blockchain,
        network_name,
        payload,
        encoding,
        tx_uri,
        callback_url,
        submit: req.submit,
        desired_signers: req.desired_signers.clone(),
        min_time: 0,
        max_time,
        legacy,
    })
}

type Shape = (
    String,
    String,
    String,
    Encoding,
    Option<String>,
    Option<LegacyStellar>,
);

fn from_uri(req: &TxSubmitRequest, uri: &str) -> Result<Shape, NormalizeError> {
    let parsed: ParsedTxUri = tx_uri::parse(uri)?;
    let blockchain = parsed.blockchain.clone();
    let network_name = match (&parsed.network, &req.network_name) {
        (Some(network), _) => network.clone(),
        (None, Some(network)) => {
            let network = network.to_lowercase();
            if !registry::is_valid_network(&blockchain, &network) {
                return Err(NormalizeError::UnknownNetwork {
                    blockchain,
                    network,
                });
            }
            network
        }
        (None, None) => return Err(NormalizeError::MissingNetwork(blockchain)),
    };
    let legacy = synthesize_legacy(&blockchain, &network_name);
    // Only simple-form URIs with the network inline round-trip exactly;
    // others are rebuilt canonically by the engine.
    let tx_uri = match (parsed.format, &parsed.network) {
        (UriFormat::Simple, Some(_)) | (UriFormat::Caip, _) => Some(uri.to_string()),
        _ => None,
    };
    Ok((
        blockchain,
        network_name,
        parsed.payload,
        parsed.encoding,
        tx_uri,
        legacy,
    ))
}

fn from_components(req: &TxSubmitRequest) -> Result<Shape, NormalizeError> {
    let blockchain = req
        .blockchain
        .as_deref()
        .expect("components shape requires blockchain")
        .to_lowercase();
    let spec = registry::get(&blockchain)
        .ok_or_else(|| NormalizeError::UnknownBlockchain(blockchain.clone()))?;

    let network_name = match (&req.network_name, &req.network) {
        (Some(network), _) => network.to_lowercase(),
        // Stellar components may carry a legacy id in `network`.
        (None, Some(value)) if blockchain == "stellar" => {
            legacy_network_name(value)?.to_string()
        }
        _ => return Err(NormalizeError::MissingNetwork(blockchain)),
    };
    if spec.network(&network_name).is_none() {
        return Err(NormalizeError::UnknownNetwork {
            blockchain,
            network: network_name,
        });
    }

    let payload = req
        .payload
        .clone()
        .ok_or(NormalizeError::Unrecognized)?;
    let encoding = match &req.encoding {
        Some(s) => Encoding::from_str(s)
            .map_err(|_| NormalizeError::Uri(tx_uri::TxUriError::UnknownEncoding(s.clone())))?,
        None => spec.default_encoding,
    };
    let legacy = synthesize_legacy(&blockchain, &network_name);
    Ok((blockchain, network_name, payload, encoding, None, legacy))
}

fn from_legacy(req: &TxSubmitRequest, xdr: &str) -> Result<Shape, NormalizeError> {
    let network_value = req
        .network
        .as_ref()
        .ok_or(NormalizeError::MissingNetwork("stellar".to_string()))?;
    let network_name = legacy_network_name(network_value)?;
    let legacy = synthesize_legacy("stellar", network_name);
    Ok((
        "stellar".to_string(),
        network_name.to_string(),
        xdr.to_string(),
        Encoding::Base64,
        None,
        legacy,
    ))
}

fn synthesize_legacy(blockchain: &str, network_name: &str) -> Option<LegacyStellar> {
    if blockchain != "stellar" {
        return None;
    }
    legacy_network_id(network_name).map(|network_id| LegacyStellar { network_id })
}

fn parse_callback_url(raw: &str) -> Result<Url, NormalizeError> {
    let url = Url::parse(raw).map_err(|e| NormalizeError::InvalidCallbackUrl(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(NormalizeError::InvalidCallbackUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Reproduces the legacy request fields from a normalized Stellar record.
pub fn to_legacy_format(normalized: &NormalizedRequest) -> Option<(String, u8)> {
    let legacy = normalized.legacy?;
    Some((normalized.payload.clone(), legacy.network_id))
}
