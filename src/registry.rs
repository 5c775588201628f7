//! Static catalog of known blockchains and their networks.
//!
//! The registry records, per blockchain: the canonical display name, the
//! default and supported payload encodings, the signer key format, and the
//! per-network parameters (passphrase or chain id, default endpoint, testnet
//! flag, CAIP-2 identity). Lookups are case-insensitive and fail closed:
//! unknown names return `None`, never panic.
//!
//! Being listed here does not imply a chain handler exists. The registry is
//! deliberately wider than the handler set, so a recognized-but-unhandled
//! blockchain can be reported as `501 Not Implemented` instead of a parse
//! error.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::Encoding;

/// Signer key format used by a blockchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// Stellar `G…` strkey (base32 + CRC16, ed25519).
    StellarStrkey,
    /// 0x-prefixed 20-byte EVM address.
    EvmAddress,
    /// 0x-prefixed 32-byte ed25519 public key.
    HexEd25519,
    /// Base58-encoded 32-byte ed25519 public key.
    Base58Ed25519,
    /// Catalogued chain without a native handler.
    Unspecified,
}

/// CAIP-2 identity of a network: `namespace:reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caip2 {
    pub namespace: &'static str,
    pub reference: &'static str,
}

/// One network of a blockchain (e.g. `stellar` → `testnet`).
#[derive(Debug, Clone)]
pub struct NetworkSpec {
    /// Canonical per-chain network id, lowercase.
    pub name: &'static str,
    /// Stellar-style network passphrase, if the chain uses one.
    pub passphrase: Option<&'static str>,
    /// EVM-style numeric chain id, if the chain uses one.
    pub chain_id: Option<u64>,
    /// Default submission endpoint (Horizon / JSON-RPC / REST).
    pub endpoint: Option<&'static str>,
    pub is_testnet: bool,
    pub caip: Option<Caip2>,
}

/// Registry entry for one blockchain.
#[derive(Debug, Clone)]
pub struct BlockchainSpec {
    /// Registry key, lowercase.
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    pub default_encoding: Encoding,
    pub supported_encodings: &'static [Encoding],
    pub key_format: KeyFormat,
    pub networks: &'static [NetworkSpec],
}

impl BlockchainSpec {
    pub fn network(&self, name: &str) -> Option<&NetworkSpec> {
        let name = name.to_lowercase();
        self.networks.iter().find(|n| n.name == name)
    }

    pub fn supports_encoding(&self, encoding: Encoding) -> bool {
        self.supported_encodings.contains(&encoding)
    }
}

pub const STELLAR_PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const STELLAR_TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const STELLAR_FUTURENET_PASSPHRASE: &str = "Test SDF Future Network ; October 2022";

static STELLAR_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "public",
        passphrase: Some(STELLAR_PUBLIC_PASSPHRASE),
        chain_id: None,
        endpoint: Some("https://horizon.stellar.org"),
        is_testnet: false,
        caip: Some(Caip2 { namespace: "stellar", reference: "pubnet" }),
    },
    NetworkSpec {
        name: "testnet",
        passphrase: Some(STELLAR_TESTNET_PASSPHRASE),
        chain_id: None,
        endpoint: Some("https://horizon-testnet.stellar.org"),
        is_testnet: true,
        caip: Some(Caip2 { namespace: "stellar", reference: "testnet" }),
    },
    NetworkSpec {
        name: "futurenet",
        passphrase: Some(STELLAR_FUTURENET_PASSPHRASE),
        chain_id: None,
        endpoint: Some("https://horizon-futurenet.stellar.org"),
        is_testnet: true,
        caip: Some(Caip2 { namespace: "stellar", reference: "futurenet" }),
    },
];

static ETHEREUM_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: Some(1),
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "eip155", reference: "1" }),
    },
    NetworkSpec {
        name: "sepolia",
        passphrase: None,
        chain_id: Some(11155111),
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "eip155", reference: "11155111" }),
    },
];

static POLYGON_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: Some(137),
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "eip155", reference: "137" }),
    },
    NetworkSpec {
        name: "amoy",
        passphrase: None,
        chain_id: Some(80002),
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "eip155", reference: "80002" }),
    },
];

static BASE_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: Some(8453),
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "eip155", reference: "8453" }),
    },
    NetworkSpec {
        name: "sepolia",
        passphrase: None,
        chain_id: Some(84532),
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "eip155", reference: "84532" }),
    },
];

static ONEMONEY_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: Some(21210),
        endpoint: Some("https://api.1money.network"),
        is_testnet: false,
        caip: Some(Caip2 { namespace: "onemoney", reference: "mainnet" }),
    },
    NetworkSpec {
        name: "testnet",
        passphrase: None,
        chain_id: Some(1212101),
        endpoint: Some("https://api.testnet.1money.network"),
        is_testnet: true,
        caip: Some(Caip2 { namespace: "onemoney", reference: "testnet" }),
    },
];

static SOLANA_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "solana", reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp" }),
    },
    NetworkSpec {
        name: "devnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "solana", reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1" }),
    },
];

static BITCOIN_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "bip122", reference: "000000000019d6689c085ae165831e93" }),
    },
    NetworkSpec {
        name: "testnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "bip122", reference: "000000000933ea01ad0ee984209779ba" }),
    },
];

static ALGORAND_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "algorand", reference: "wGHE2Pwdvd7S12BL5FaOP20EGYesN73k" }),
    },
    NetworkSpec {
        name: "testnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "algorand", reference: "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDe" }),
    },
];

static APTOS_NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        name: "mainnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: false,
        caip: Some(Caip2 { namespace: "aptos", reference: "1" }),
    },
    NetworkSpec {
        name: "testnet",
        passphrase: None,
        chain_id: None,
        endpoint: None,
        is_testnet: true,
        caip: Some(Caip2 { namespace: "aptos", reference: "2" }),
    },
];

static BASE64_ONLY: &[Encoding] = &[Encoding::Base64];
static HEX_ONLY: &[Encoding] = &[Encoding::Hex];
static MSGPACK_BASE64: &[Encoding] = &[Encoding::Msgpack, Encoding::Base64];
static BASE58_ONLY: &[Encoding] = &[Encoding::Base58];
static BASE64_BASE32: &[Encoding] = &[Encoding::Base64, Encoding::Base32];

static BLOCKCHAINS: Lazy<HashMap<&'static str, BlockchainSpec>> = Lazy::new(|| {
    let chains = [
        BlockchainSpec {
            id: "stellar",
            name: "Stellar",
            default_encoding: Encoding::Base64,
            supported_encodings: BASE64_ONLY,
            key_format: KeyFormat::StellarStrkey,
            networks: STELLAR_NETWORKS,
        },
        BlockchainSpec {
            id: "ethereum",
            name: "Ethereum",
            default_encoding: Encoding::Hex,
            supported_encodings: HEX_ONLY,
            key_format: KeyFormat::EvmAddress,
            networks: ETHEREUM_NETWORKS,
        },
        BlockchainSpec {
            id: "polygon",
            name: "Polygon",
            default_encoding: Encoding::Hex,
            supported_encodings: HEX_ONLY,
            key_format: KeyFormat::EvmAddress,
            networks: POLYGON_NETWORKS,
        },
        BlockchainSpec {
            id: "base",
            name: "Base",
            default_encoding: Encoding::Hex,
            supported_encodings: HEX_ONLY,
            key_format: KeyFormat::EvmAddress,
            networks: BASE_NETWORKS,
        },
        BlockchainSpec {
            id: "onemoney",
            name: "1Money",
            default_encoding: Encoding::Msgpack,
            supported_encodings: MSGPACK_BASE64,
            key_format: KeyFormat::HexEd25519,
            networks: ONEMONEY_NETWORKS,
        },
        BlockchainSpec {
            id: "solana",
            name: "Solana",
            default_encoding: Encoding::Base58,
            supported_encodings: BASE58_ONLY,
            key_format: KeyFormat::Base58Ed25519,
            networks: SOLANA_NETWORKS,
        },
        BlockchainSpec {
            id: "bitcoin",
            name: "Bitcoin",
            default_encoding: Encoding::Hex,
            supported_encodings: HEX_ONLY,
            key_format: KeyFormat::Unspecified,
            networks: BITCOIN_NETWORKS,
        },
        BlockchainSpec {
            id: "algorand",
            name: "Algorand",
            default_encoding: Encoding::Base64,
            supported_encodings: BASE64_BASE32,
            key_format: KeyFormat::Unspecified,
            networks: ALGORAND_NETWORKS,
        },
        BlockchainSpec {
            id: "aptos",
            name: "Aptos",
            default_encoding: Encoding::Hex,
            supported_encodings: HEX_ONLY,
            key_format: KeyFormat::Unspecified,
            networks: APTOS_NETWORKS,
        },
    ];
    chains.into_iter().map(|c| (c.id, c)).collect()
});

/// Looks up a blockchain by registry key, case-insensitively.
pub fn get(blockchain: &str) -> Option<&'static BlockchainSpec> {
    BLOCKCHAINS.get(blockchain.to_lowercase().as_str())
}

pub fn is_valid_blockchain(blockchain: &str) -> bool {
    get(blockchain).is_some()
}

pub fn is_valid_network(blockchain: &str, network: &str) -> bool {
    network_config(blockchain, network).is_some()
}

/// Network parameters for `blockchain`/`network`, or `None` if either is
/// unknown.
pub fn network_config(blockchain: &str, network: &str) -> Option<&'static NetworkSpec> {
    get(blockchain)?.network(network)
}

/// All registered blockchains, in unspecified order.
pub fn blockchains() -> impl Iterator<Item = &'static BlockchainSpec> {
    BLOCKCHAINS.values()
}

/// `(blockchain id, network)` pairs flagged as testnets.
pub fn testnets() -> Vec<(&'static str, &'static NetworkSpec)> {
    networks_where(|n| n.is_testnet)
}

/// `(blockchain id, network)` pairs for production networks.
pub fn prodnets() -> Vec<(&'static str, &'static NetworkSpec)> {
    networks_where(|n| !n.is_testnet)
}

fn networks_where(
    predicate: impl Fn(&NetworkSpec) -> bool,
) -> Vec<(&'static str, &'static NetworkSpec)> {
    let mut out = Vec::new();
    for chain in BLOCKCHAINS.values() {
        for network in chain.networks.iter().filter(|n| predicate(n)) {
            out.push((chain.id, network));
        }
    }
    out
}

/// Resolves a CAIP-2 `namespace:reference` pair to a registry entry.
///
/// For `eip155` the reference is the decimal chain id, which routes to the
/// specific EVM-family member (`eip155:137` → `polygon`/`mainnet`).
pub fn by_caip(namespace: &str, reference: &str) -> Option<(&'static str, &'static NetworkSpec)> {
    let namespace = namespace.to_lowercase();
    for chain in BLOCKCHAINS.values() {
        for network in chain.networks {
            if let Some(caip) = &network.caip {
                if caip.namespace == namespace && caip.reference == reference {
                    return Some((chain.id, network));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(is_valid_blockchain("stellar"));
        assert!(is_valid_blockchain("Stellar"));
        assert!(is_valid_blockchain("STELLAR"));
        assert!(is_valid_network("stellar", "TESTNET"));
    }

    #[test]
    fn test_unknown_names_fail_closed() {
        assert!(!is_valid_blockchain("dogecoin"));
        assert!(get("dogecoin").is_none());
        assert!(network_config("stellar", "horizon").is_none());
        assert!(network_config("dogecoin", "mainnet").is_none());
    }

    #[test]
    fn test_stellar_networks() {
        let public = network_config("stellar", "public").unwrap();
        assert_eq!(public.passphrase, Some(STELLAR_PUBLIC_PASSPHRASE));
        assert!(!public.is_testnet);
        assert!(public.endpoint.unwrap().contains("horizon.stellar.org"));

        let testnet = network_config("stellar", "testnet").unwrap();
        assert_eq!(testnet.passphrase, Some(STELLAR_TESTNET_PASSPHRASE));
        assert!(testnet.is_testnet);
    }

    #[test]
    fn test_evm_chain_ids() {
        assert_eq!(network_config("ethereum", "mainnet").unwrap().chain_id, Some(1));
        assert_eq!(network_config("polygon", "mainnet").unwrap().chain_id, Some(137));
        assert_eq!(network_config("base", "sepolia").unwrap().chain_id, Some(84532));
    }

    #[test]
    fn test_caip_routing() {
        let (chain, network) = by_caip("eip155", "137").unwrap();
        assert_eq!(chain, "polygon");
        assert_eq!(network.name, "mainnet");

        let (chain, network) = by_caip("stellar", "pubnet").unwrap();
        assert_eq!(chain, "stellar");
        assert_eq!(network.name, "public");

        assert!(by_caip("eip155", "999999").is_none());
        assert!(by_caip("cosmos", "hub").is_none());
    }

    #[test]
    fn test_testnet_enumeration() {
        let testnets = testnets();
        assert!(testnets.iter().any(|(c, n)| *c == "stellar" && n.name == "testnet"));
        assert!(testnets.iter().all(|(_, n)| n.is_testnet));
        let prodnets = prodnets();
        assert!(prodnets.iter().any(|(c, n)| *c == "ethereum" && n.name == "mainnet"));
        assert!(prodnets.iter().all(|(_, n)| !n.is_testnet));
    }

    #[test]
    fn test_encoding_support() {
        let stellar = get("stellar").unwrap();
        assert!(stellar.supports_encoding(crate::types::Encoding::Base64));
        assert!(!stellar.supports_encoding(crate::types::Encoding::Hex));
        let onemoney = get("onemoney").unwrap();
        assert!(onemoney.supports_encoding(crate::types::Encoding::Msgpack));
    }
}
