//! virtual RF medium broker for etherwave
//!
//! Accepts node connections over TCP, keeps a registry of who sits where,
//! and routes every transmitted frame through the channel model: compute
//! the link budget, ask the drop oracle, then deliver after the modeled
//! delay. One reader task per connection, one delivery task per accepted
//! frame, everything sharing a single `Broker` value.

use std::time::Duration;

use thiserror::Error;

pub mod broker;
pub mod history;
pub mod inflight;
pub mod pipeline;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod server;

pub use broker::{Broker, BrokerStats};
pub use registry::{NodeEntry, Registry};
pub use server::BrokerServer;

pub const DEFAULT_PORT: u16 = 8765;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("socket io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: String,
    pub port: u16,
    /// Seeds the shared RNG so a run can be replayed exactly.
    pub rng_seed: Option<u64>,
    pub max_inflight: u64,
    pub write_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            rng_seed: None,
            max_inflight: etherwave_medium::MAX_INFLIGHT,
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl BrokerConfig {
    /// Read `ETHERWAVE_ADDR`, `ETHERWAVE_PORT` and `ETHERWAVE_SEED` on top
    /// of the defaults. Log level and destination stay with `RUST_LOG`.
    pub fn from_env() -> Result<Self, BrokerError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("ETHERWAVE_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(port) = std::env::var("ETHERWAVE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| BrokerError::Config(format!("bad ETHERWAVE_PORT: {}", port)))?;
        }
        if let Ok(seed) = std::env::var("ETHERWAVE_SEED") {
            config.rng_seed = Some(
                seed.parse()
                    .map_err(|_| BrokerError::Config(format!("bad ETHERWAVE_SEED: {}", seed)))?,
            );
        }
        Ok(config)
    }
}
