//! Configuration for the Refractor server.
//!
//! Everything is CLI-or-environment driven; `.env` values are loaded by the
//! entrypoint before parsing. Chain endpoint overrides use the pattern
//! `REFRACTOR_<BLOCKCHAIN>_<NETWORK>_ENDPOINT` (uppercase), e.g.
//! `REFRACTOR_STELLAR_TESTNET_ENDPOINT=http://localhost:8000`.

use clap::Parser;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

use crate::finalizer::FinalizerConfig;
use crate::queue::QueueConfig;
use crate::registry;

#[derive(Parser, Debug, Clone)]
#[command(name = "refractor")]
#[command(about = "Pending transaction store and multi-signature aggregator")]
pub struct Config {
    #[arg(long, env = "PORT", default_value_t = 4010)]
    pub port: u16,
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Postgres connection URL; the in-memory store is used when absent.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Key required (as `X-Api-Key`) by the monitoring POST endpoints.
    #[arg(long, env = "ADMIN_API_KEY")]
    pub admin_api_key: Option<String>,

    #[arg(long, env = "FINALIZER_TICK_SECS", default_value_t = 3)]
    pub finalizer_tick_secs: u64,
    #[arg(long, env = "TARGET_QUEUE_SIZE", default_value_t = 50)]
    pub target_queue_size: usize,
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "QUEUE_CONCURRENCY", default_value_t = 5)]
    pub queue_concurrency: usize,
    #[arg(long, env = "QUEUE_MIN_CONCURRENCY", default_value_t = 1)]
    pub queue_min_concurrency: usize,
    #[arg(long, env = "QUEUE_MAX_CONCURRENCY", default_value_t = 20)]
    pub queue_max_concurrency: usize,
    #[arg(long, env = "QUEUE_MAX_ATTEMPTS", default_value_t = 5)]
    pub queue_max_attempts: u32,
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value_t = 30)]
    pub metrics_interval_secs: u64,

    #[arg(long, env = "CALLBACK_TIMEOUT_SECS", default_value_t = 30)]
    pub callback_timeout_secs: u64,
    #[arg(long, env = "CHAIN_RPC_TIMEOUT_SECS", default_value_t = 30)]
    pub chain_rpc_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            initial_concurrency: self.queue_concurrency,
            min_concurrency: self.queue_min_concurrency,
            max_concurrency: self.queue_max_concurrency,
            max_attempts: self.queue_max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
        }
    }

    pub fn finalizer_config(&self) -> FinalizerConfig {
        FinalizerConfig {
            tick_interval: Duration::from_secs(self.finalizer_tick_secs),
            target_queue_size: self.target_queue_size,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn chain_rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.chain_rpc_timeout_secs)
    }
}

fn override_var(blockchain: &str, network: &str) -> String {
    format!(
        "REFRACTOR_{}_{}_ENDPOINT",
        blockchain.to_uppercase(),
        network.to_uppercase()
    )
}

/// Endpoint overrides for every catalogued network, read from the
/// environment.
pub fn endpoint_overrides() -> HashMap<(String, String), Url> {
    let mut overrides = HashMap::new();
    for chain in registry::blockchains() {
        for network in chain.networks {
            if let Ok(raw) = std::env::var(override_var(chain.id, network.name)) {
                match Url::parse(&raw) {
                    Ok(url) => {
                        overrides.insert((chain.id.to_string(), network.name.to_string()), url);
                    }
                    Err(err) => tracing::warn!(
                        blockchain = chain.id,
                        network = network.name,
                        error = %err,
                        "Ignoring invalid endpoint override"
                    ),
                }
            }
        }
    }
    overrides
}

/// The Stellar slice of [`endpoint_overrides`], keyed by network name, for
/// the Horizon schema source.
pub fn horizon_overrides() -> HashMap<String, Url> {
    endpoint_overrides()
        .into_iter()
        .filter(|((blockchain, _), _)| blockchain == "stellar")
        .map(|((_, network), url)| (network, url))
        .collect()
}
