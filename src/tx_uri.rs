//! Transaction URI codec.
//!
//! Two surface forms are supported:
//!
//! - Simple: `tx:<blockchain>[:<network>];<encoding>,<payload>`
//! - CAIP: `blockchain://<namespace>:<reference>/tx/<encoding>;<payload>`
//!
//! [`format`] is the exact inverse of [`parse`]: for any valid canonical
//! (lowercase) URI, `format(parse(uri)) == uri` byte for byte. A legacy
//! detector additionally recognizes raw Stellar base64 envelopes submitted
//! without any URI wrapping.

use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

use crate::registry;
use crate::types::Encoding;

const SIMPLE_PREFIX: &str = "tx:";
const CAIP_PREFIX: &str = "blockchain://";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TxUriError {
    #[error("Unrecognized transaction URI: {0}")]
    InvalidFormat(String),
    #[error("Unknown blockchain: {0}")]
    UnknownBlockchain(String),
    #[error("Unknown network {network} for blockchain {blockchain}")]
    UnknownNetwork { blockchain: String, network: String },
    #[error("Unknown CAIP-2 chain {namespace}:{reference}")]
    UnknownCaip { namespace: String, reference: String },
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("Encoding {encoding} not supported by {blockchain}")]
    UnsupportedEncoding { blockchain: String, encoding: Encoding },
    #[error("Payload does not match {0} encoding")]
    InvalidPayload(Encoding),
    #[error("Empty payload")]
    EmptyPayload,
}

/// Which surface form a URI used; [`format`] reproduces the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriFormat {
    Simple,
    Caip,
}

/// CAIP-2 coordinates preserved from a parsed CAIP-form URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaipReference {
    pub namespace: String,
    pub reference: String,
}

/// Decoded components of a transaction URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTxUri {
    /// Registry key, lowercase. CAIP `eip155` URIs resolve to the specific
    /// family member via the chain id.
    pub blockchain: String,
    /// Canonical network name; `None` when the simple form omitted it.
    pub network: Option<String>,
    pub encoding: Encoding,
    pub payload: String,
    pub format: UriFormat,
    pub caip: Option<CaipReference>,
}

static BASE64_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("Invalid base64 regex"));
static HEX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x)?([0-9a-fA-F]{2})+$").expect("Invalid hex regex"));
static BASE58_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]+$").expect("Invalid base58 regex"));
static BASE32_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z2-7]+=*$").expect("Invalid base32 regex"));

/// Regex-level validation of a payload against its declared encoding.
///
/// Msgpack payloads are base64-wrapped on the wire, so they validate with
/// the base64 alphabet.
pub fn is_valid_payload(encoding: Encoding, payload: &str) -> bool {
    if payload.is_empty() {
        return false;
    }
    match encoding {
        Encoding::Base64 | Encoding::Msgpack => BASE64_REGEX.is_match(payload),
        Encoding::Hex => HEX_REGEX.is_match(payload),
        Encoding::Base58 => BASE58_REGEX.is_match(payload),
        Encoding::Base32 => BASE32_REGEX.is_match(payload),
    }
}

/// Recognizes a raw Stellar envelope passed without URI wrapping: XDR
/// envelopes start with four zero bytes (`AAAA` in base64) and any real
/// transaction is well over 100 characters.
///
/// Callers must supply the network separately for such payloads.
pub fn is_legacy_stellar_payload(payload: &str) -> bool {
    payload.starts_with("AAAA") && payload.len() >= 100 && BASE64_REGEX.is_match(payload)
}

/// Parses a simple or CAIP transaction URI.
pub fn parse(uri: &str) -> Result<ParsedTxUri, TxUriError> {
    if let Some(rest) = uri.strip_prefix(CAIP_PREFIX) {
        parse_caip(uri, rest)
    } else if let Some(rest) = uri.strip_prefix(SIMPLE_PREFIX) {
        parse_simple(uri, rest)
    } else {
        Err(TxUriError::InvalidFormat(truncate(uri)))
    }
}

fn parse_simple(uri: &str, rest: &str) -> Result<ParsedTxUri, TxUriError> {
    // tx:<blockchain>[:<network>];<encoding>,<payload>
    let (head, tail) = rest
        .split_once(';')
        .ok_or_else(|| TxUriError::InvalidFormat(truncate(uri)))?;
    let (encoding_str, payload) = tail
        .split_once(',')
        .ok_or_else(|| TxUriError::InvalidFormat(truncate(uri)))?;

    let (blockchain, network) = match head.split_once(':') {
        Some((chain, network)) => (chain.to_lowercase(), Some(network.to_lowercase())),
        None => (head.to_lowercase(), None),
    };

    let spec = registry::get(&blockchain)
        .ok_or_else(|| TxUriError::UnknownBlockchain(blockchain.clone()))?;
    if let Some(network) = &network {
        if spec.network(network).is_none() {
            return Err(TxUriError::UnknownNetwork {
                blockchain: blockchain.clone(),
                network: network.clone(),
            });
        }
    }

    let encoding = parse_encoding(spec, encoding_str)?;
    let payload = validated_payload(encoding, payload)?;

    Ok(ParsedTxUri {
        blockchain,
        network,
        encoding,
        payload,
        format: UriFormat::Simple,
        caip: None,
    })
}

fn parse_caip(uri: &str, rest: &str) -> Result<ParsedTxUri, TxUriError> {
    // blockchain://<namespace>:<reference>/tx/<encoding>;<payload>
    let (chain_part, tail) = rest
        .split_once("/tx/")
        .ok_or_else(|| TxUriError::InvalidFormat(truncate(uri)))?;
    let (namespace, reference) = chain_part
        .split_once(':')
        .ok_or_else(|| TxUriError::InvalidFormat(truncate(uri)))?;
    let (encoding_str, payload) = tail
        .split_once(';')
        .ok_or_else(|| TxUriError::InvalidFormat(truncate(uri)))?;

    let namespace = namespace.to_lowercase();
    let (blockchain, network) =
        registry::by_caip(&namespace, reference).ok_or_else(|| TxUriError::UnknownCaip {
            namespace: namespace.clone(),
            reference: reference.to_string(),
        })?;
    let spec = registry::get(blockchain).expect("registry CAIP entry resolves");

    let encoding = parse_encoding(spec, encoding_str)?;
    let payload = validated_payload(encoding, payload)?;

    Ok(ParsedTxUri {
        blockchain: blockchain.to_string(),
        network: Some(network.name.to_string()),
        encoding,
        payload,
        format: UriFormat::Caip,
        caip: Some(CaipReference {
            namespace,
            reference: reference.to_string(),
        }),
    })
}

fn parse_encoding(
    spec: &registry::BlockchainSpec,
    encoding_str: &str,
) -> Result<Encoding, TxUriError> {
    let encoding = Encoding::from_str(encoding_str)
        .map_err(|_| TxUriError::UnknownEncoding(encoding_str.to_string()))?;
    if !spec.supports_encoding(encoding) {
        return Err(TxUriError::UnsupportedEncoding {
            blockchain: spec.id.to_string(),
            encoding,
        });
    }
    Ok(encoding)
}

fn validated_payload(encoding: Encoding, payload: &str) -> Result<String, TxUriError> {
    if payload.is_empty() {
        return Err(TxUriError::EmptyPayload);
    }
    if !is_valid_payload(encoding, payload) {
        return Err(TxUriError::InvalidPayload(encoding));
    }
    Ok(payload.to_string())
}

/// Formats components back into a URI. Exact inverse of [`parse`] for valid
/// canonical input.
pub fn format(parsed: &ParsedTxUri) -> Result<String, TxUriError> {
    if parsed.payload.is_empty() {
        return Err(TxUriError::EmptyPayload);
    }
    match parsed.format {
        UriFormat::Simple => {
            let mut uri = String::from(SIMPLE_PREFIX);
            uri.push_str(&parsed.blockchain);
            if let Some(network) = &parsed.network {
                uri.push(':');
                uri.push_str(network);
            }
            uri.push(';');
            uri.push_str(parsed.encoding.as_str());
            uri.push(',');
            uri.push_str(&parsed.payload);
            Ok(uri)
        }
        UriFormat::Caip => {
            let caip = parsed
                .caip
                .as_ref()
                .ok_or_else(|| TxUriError::InvalidFormat("missing CAIP reference".to_string()))?;
            Ok(format!(
                "{}{}:{}/tx/{};{}",
                CAIP_PREFIX,
                caip.namespace,
                caip.reference,
                parsed.encoding.as_str(),
                parsed.payload
            ))
        }
    }
}

/// Builds the canonical simple-form URI for stored record fields.
pub fn canonical(blockchain: &str, network: &str, encoding: Encoding, payload: &str) -> String {
    format!("tx:{}:{};{},{}", blockchain, network, encoding.as_str(), payload)
}

fn truncate(s: &str) -> String {
    const LIMIT: usize = 48;
    if s.chars().count() <= LIMIT {
        s.to_string()
    } else {
        let head: String = s.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STELLAR_B64: &str = "AAAAAgAAAAB5uUoGJVyyW2EVRhQxkLfSlW9Y7wEqFo0g6mQLglBl9AAAAGQABGUW";

    #[test]
    fn test_parse_simple_with_network() {
        let uri = format!("tx:stellar:testnet;base64,{}", STELLAR_B64);
        let parsed = parse(&uri).unwrap();
        assert_eq!(parsed.blockchain, "stellar");
        assert_eq!(parsed.network.as_deref(), Some("testnet"));
        assert_eq!(parsed.encoding, Encoding::Base64);
        assert_eq!(parsed.payload, STELLAR_B64);
        assert_eq!(parsed.format, UriFormat::Simple);
    }

    #[test]
    fn test_parse_simple_without_network() {
        let uri = format!("tx:stellar;base64,{}", STELLAR_B64);
        let parsed = parse(&uri).unwrap();
        assert_eq!(parsed.blockchain, "stellar");
        assert_eq!(parsed.network, None);
    }

    #[test]
    fn test_parse_caip_eip155_routes_family_member() {
        let uri = "blockchain://eip155:137/tx/hex;0x02f86b";
        let parsed = parse(uri).unwrap();
        assert_eq!(parsed.blockchain, "polygon");
        assert_eq!(parsed.network.as_deref(), Some("mainnet"));
        assert_eq!(parsed.encoding, Encoding::Hex);
        let caip = parsed.caip.as_ref().unwrap();
        assert_eq!(caip.namespace, "eip155");
        assert_eq!(caip.reference, "137");
    }

    #[test]
    fn test_parse_caip_stellar() {
        let uri = format!("blockchain://stellar:pubnet/tx/base64;{}", STELLAR_B64);
        let parsed = parse(&uri).unwrap();
        assert_eq!(parsed.blockchain, "stellar");
        assert_eq!(parsed.network.as_deref(), Some("public"));
    }

    #[test]
    fn test_roundtrip_simple() {
        let uris = [
            format!("tx:stellar:testnet;base64,{}", STELLAR_B64),
            format!("tx:stellar;base64,{}", STELLAR_B64),
            "tx:ethereum:mainnet;hex,0x02f86b0180843b9aca00".to_string(),
        ];
        for uri in uris {
            let parsed = parse(&uri).unwrap();
            assert_eq!(format(&parsed).unwrap(), uri);
        }
    }

    #[test]
    fn test_roundtrip_caip() {
        let uris = [
            "blockchain://eip155:1/tx/hex;0x02f86b0180843b9aca00".to_string(),
            format!("blockchain://stellar:testnet/tx/base64;{}", STELLAR_B64),
        ];
        for uri in uris {
            let parsed = parse(&uri).unwrap();
            assert_eq!(format(&parsed).unwrap(), uri);
        }
    }

    #[test]
    fn test_rejects_unknown_blockchain() {
        let err = parse("tx:dogecoin;base64,AAAA").unwrap_err();
        assert_eq!(err, TxUriError::UnknownBlockchain("dogecoin".to_string()));
    }

    #[test]
    fn test_rejects_unknown_network() {
        let err = parse(&format!("tx:stellar:horizon;base64,{}", STELLAR_B64)).unwrap_err();
        assert!(matches!(err, TxUriError::UnknownNetwork { .. }));
    }

    #[test]
    fn test_rejects_unknown_caip() {
        let err = parse("blockchain://eip155:424242/tx/hex;0xff").unwrap_err();
        assert!(matches!(err, TxUriError::UnknownCaip { .. }));
    }

    #[test]
    fn test_rejects_empty_payload() {
        let err = parse("tx:stellar:testnet;base64,").unwrap_err();
        assert_eq!(err, TxUriError::EmptyPayload);
    }

    #[test]
    fn test_rejects_encoding_mismatch() {
        // Hex payload under a base64-only chain: unsupported encoding.
        let err = parse("tx:stellar:testnet;hex,0xdeadbeef").unwrap_err();
        assert!(matches!(err, TxUriError::UnsupportedEncoding { .. }));
        // Declared base64, body is not base64.
        let err = parse("tx:stellar:testnet;base64,not base64!").unwrap_err();
        assert_eq!(err, TxUriError::InvalidPayload(Encoding::Base64));
    }

    #[test]
    fn test_payload_encoding_regexes() {
        assert!(is_valid_payload(Encoding::Base64, "AQID"));
        assert!(is_valid_payload(Encoding::Base64, "AQ=="));
        assert!(!is_valid_payload(Encoding::Base64, "A Q"));
        assert!(is_valid_payload(Encoding::Hex, "deadbeef"));
        assert!(is_valid_payload(Encoding::Hex, "0xdeadbeef"));
        assert!(!is_valid_payload(Encoding::Hex, "0xdeadbee"));
        assert!(is_valid_payload(Encoding::Base58, "3yZe7d"));
        assert!(!is_valid_payload(Encoding::Base58, "0OIl"));
        assert!(is_valid_payload(Encoding::Base32, "MZXW6YTB"));
        assert!(is_valid_payload(Encoding::Base32, "MZXW6YQ="));
        assert!(!is_valid_payload(Encoding::Base32, "mzxw6ytb"));
        assert!(is_valid_payload(Encoding::Msgpack, "gaZhbW91bnQB"));
    }

    #[test]
    fn test_legacy_detector() {
        let long_envelope = format!("AAAA{}", "A".repeat(120));
        assert!(is_legacy_stellar_payload(&long_envelope));
        // Too short.
        assert!(!is_legacy_stellar_payload("AAAAxyz"));
        // Wrong prefix.
        let not_envelope = format!("BBBB{}", "A".repeat(120));
        assert!(!is_legacy_stellar_payload(&not_envelope));
        // Not base64.
        let garbage = format!("AAAA{}", "!".repeat(120));
        assert!(!is_legacy_stellar_payload(&garbage));
    }
}
