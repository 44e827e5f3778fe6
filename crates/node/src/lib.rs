//! client radio handle for the etherwave medium
//!
//! Wraps the broker's TCP wire protocol behind a send/receive API shaped
//! like a LoRa radio driver: register a position on connect, transmit with
//! per-frame options, read back payloads with RSSI/SNR telemetry. The
//! reliable-datagram helper layers the usual identifier/ACK-flag
//! convention on top; the broker itself treats ACKs as ordinary frames.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use etherwave_proto::{Frame, TxMeta};

/// Flag bit marking a frame as an acknowledgement.
pub const ACK_FLAG: u64 = 0x80;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("socket io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("disconnected from broker")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub node_id: u64,
    pub location: (f64, f64),
    pub write_timeout: Option<Duration>,
    pub ack_wait: Duration,
    pub ack_retries: u32,
    /// Hold each outgoing ACK back by this much, so it does not race the
    /// sender's own receive window.
    pub ack_delay: Option<Duration>,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, node_id: u64, location: (f64, f64)) -> Self {
        Self {
            host: host.into(),
            port,
            node_id,
            location,
            write_timeout: Some(Duration::from_secs(5)),
            ack_wait: Duration::from_millis(500),
            ack_retries: 5,
            ack_delay: None,
        }
    }
}

/// A payload received from the medium, with link telemetry and the
/// sender's meta echoed back by the broker.
#[derive(Debug, Clone)]
pub struct RxMessage {
    pub data: String,
    pub rssi: f64,
    pub snr: f64,
    pub from: Option<u64>,
    pub meta: Map<String, Value>,
}

impl RxMessage {
    pub fn identifier(&self) -> Option<u64> {
        self.meta.get("identifier").and_then(Value::as_u64)
    }

    pub fn flags(&self) -> u64 {
        self.meta.get("flags").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn is_ack(&self) -> bool {
        self.flags() & ACK_FLAG != 0
    }
}

pub struct RadioClient {
    node_id: u64,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    reader: Mutex<FramedRead<OwnedReadHalf, LinesCodec>>,
    telemetry: std::sync::Mutex<(f64, f64)>,
    sequence: std::sync::Mutex<u64>,
    write_timeout: Option<Duration>,
    ack_wait: Duration,
    ack_retries: u32,
    ack_delay: Option<Duration>,
}

impl RadioClient {
    /// Connect to the broker and announce this node's id and position.
    pub async fn connect(config: NodeConfig) -> Result<Self, NodeError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let client = Self {
            node_id: config.node_id,
            writer: Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            reader: Mutex::new(FramedRead::new(read_half, LinesCodec::new())),
            telemetry: std::sync::Mutex::new((-90.0, 0.0)),
            sequence: std::sync::Mutex::new(0),
            write_timeout: config.write_timeout,
            ack_wait: config.ack_wait,
            ack_retries: config.ack_retries,
            ack_delay: config.ack_delay,
        };
        client.register_at(config.location).await?;
        Ok(client)
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// RSSI of the last received frame, dBm.
    pub fn last_rssi(&self) -> f64 {
        self.telemetry.lock().expect("telemetry lock poisoned").0
    }

    /// SNR of the last received frame, dB.
    pub fn last_snr(&self) -> f64 {
        self.telemetry.lock().expect("telemetry lock poisoned").1
    }

    /// (Re-)announce this node's position. The broker replaces the old
    /// record in place.
    pub async fn register_at(&self, location: (f64, f64)) -> Result<(), NodeError> {
        let frame = Frame::Register { node_id: self.node_id, location };
        self.write_frame(&frame).await
    }

    /// Transmit with explicit per-frame options.
    pub async fn send(&self, data: &str, meta: TxMeta) -> Result<(), NodeError> {
        let frame = Frame::Tx {
            from: self.node_id,
            data: data.to_string(),
            meta,
        };
        self.write_frame(&frame).await
    }

    pub async fn send_to(&self, destination: u64, data: &str) -> Result<(), NodeError> {
        self.send(data, TxMeta { destination: Some(destination), ..TxMeta::default() })
            .await
    }

    pub async fn broadcast(&self, data: &str) -> Result<(), NodeError> {
        self.send(data, TxMeta { broadcast: true, ..TxMeta::default() }).await
    }

    /// Wait for the next payload. Blocks until a frame arrives or the
    /// connection drops.
    pub async fn recv(&self) -> Result<RxMessage, NodeError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(line)) => {
                    if let Some(msg) = self.decode_rx(&line) {
                        return Ok(msg);
                    }
                }
                Some(Err(e)) => return Err(NodeError::Protocol(e.to_string())),
                None => return Err(NodeError::Disconnected),
            }
        }
    }

    /// Like [`recv`](Self::recv), but gives up after `wait` and returns
    /// `None`, matching the polling style of radio driver loops.
    pub async fn recv_timeout(&self, wait: Duration) -> Result<Option<RxMessage>, NodeError> {
        match timeout(wait, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Acknowledge a reliable datagram, waiting out the configured ACK
    /// delay first.
    pub async fn send_ack(&self, to: u64, identifier: u64) -> Result<(), NodeError> {
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        let mut meta = TxMeta { destination: Some(to), ..TxMeta::default() };
        meta.extra.insert("node".into(), Value::from(self.node_id));
        meta.extra.insert("identifier".into(), Value::from(identifier));
        meta.extra.insert("flags".into(), Value::from(ACK_FLAG));
        self.send("!", meta).await
    }

    /// Send a unicast and wait for the matching ACK, retrying with a
    /// jittered backoff. Returns false when every attempt times out.
    pub async fn send_with_ack(&self, destination: u64, data: &str) -> Result<bool, NodeError> {
        let identifier = {
            let mut seq = self.sequence.lock().expect("sequence lock poisoned");
            *seq = (*seq + 1) & 0xFF;
            *seq
        };

        for _attempt in 0..self.ack_retries {
            let mut meta = TxMeta { destination: Some(destination), ..TxMeta::default() };
            meta.extra.insert("node".into(), Value::from(self.node_id));
            meta.extra.insert("identifier".into(), Value::from(identifier));
            meta.extra.insert("flags".into(), Value::from(0u64));
            self.send(data, meta).await?;

            let deadline = tokio::time::Instant::now() + self.ack_wait;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.recv_timeout(remaining).await? {
                    Some(msg) if msg.is_ack() && msg.identifier() == Some(identifier) => {
                        return Ok(true);
                    }
                    Some(_) => continue,
                    None => break,
                }
            }

            let jitter = rand::rng().random_range(0..100u64);
            tokio::time::sleep(self.ack_wait + Duration::from_millis(jitter)).await;
        }
        Ok(false)
    }

    fn decode_rx(&self, line: &str) -> Option<RxMessage> {
        match Frame::parse(line) {
            Ok(Frame::Rx { data, rssi, snr, meta }) => {
                *self.telemetry.lock().expect("telemetry lock poisoned") = (rssi, snr);
                let from = meta.get("from").and_then(Value::as_u64);
                Some(RxMessage { data, rssi, snr, from, meta })
            }
            Ok(_) => {
                log::warn!("ignoring non-rx frame from broker");
                None
            }
            Err(e) => {
                log::warn!("ignoring unparseable frame from broker: {}", e);
                None
            }
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), NodeError> {
        let line = frame.to_line();
        let mut writer = self.writer.lock().await;
        let fut = writer.send(line);
        match self.write_timeout {
            Some(d) => timeout(d, fut)
                .await
                .map_err(|_| NodeError::Timeout)?
                .map_err(|e| NodeError::Protocol(e.to_string())),
            None => fut.await.map_err(|e| NodeError::Protocol(e.to_string())),
        }
    }
}
