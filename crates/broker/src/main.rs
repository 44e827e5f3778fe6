//! etherwave broker binary
//!
//! Configuration comes from the environment (`ETHERWAVE_ADDR`,
//! `ETHERWAVE_PORT`, `ETHERWAVE_SEED`); logging from `RUST_LOG`. Exits
//! non-zero when the bind fails or the accept loop dies.

use anyhow::Result;
use etherwave_broker::{BrokerConfig, BrokerServer};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = BrokerConfig::from_env()?;
    let server = BrokerServer::bind(config).await?;

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
    }

    Ok(())
}
