//! TCP accept loop

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::TcpListener;

use crate::broker::Broker;
use crate::{pipeline, BrokerConfig, BrokerError};

/// A bound broker, ready to serve. Binding is separate from serving so
/// callers (and tests) can learn the listen address first.
pub struct BrokerServer {
    broker: Arc<Broker>,
    listener: TcpListener,
}

impl BrokerServer {
    pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let addr = format!("{}:{}", config.listen_addr, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| BrokerError::Bind { addr, source })?;
        let broker = Broker::new(config);
        Ok(Self { broker, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    pub async fn serve(self) -> Result<(), BrokerError> {
        info!("etherwave broker listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed for {}: {}", peer, e);
            }
            tokio::spawn(pipeline::handle_connection(self.broker.clone(), stream, peer));
        }
    }
}
