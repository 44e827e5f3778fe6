//! scenario walkthroughs against an in-process broker
//!
//! Each scenario binds a fresh broker on a loopback port, connects real
//! clients through the TCP path, and narrates what the medium did to the
//! traffic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use etherwave_broker::{Broker, BrokerConfig, BrokerServer};
use etherwave_node::{NodeConfig, RadioClient};

use crate::LinkPreset;

async fn start_broker(seed: Option<u64>) -> Result<(Arc<Broker>, u16)> {
    let config = BrokerConfig {
        listen_addr: "127.0.0.1".to_string(),
        port: 0,
        rng_seed: seed,
        ..BrokerConfig::default()
    };
    let server = BrokerServer::bind(config).await?;
    let port = server.local_addr()?.port();
    let broker = server.broker();
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            log::error!("broker exited: {}", e);
        }
    });
    Ok((broker, port))
}

async fn connect(port: u16, id: u64, location: (f64, f64)) -> Result<RadioClient> {
    Ok(RadioClient::connect(NodeConfig::new("127.0.0.1", port, id, location)).await?)
}

/// Two nodes, one unicast frame, full telemetry printout.
pub async fn point_to_point(preset: &LinkPreset, distance_km: f64) -> Result<()> {
    let (broker, port) = start_broker(None).await?;
    let sender = connect(port, 1, (0.0, 0.0)).await?;
    let receiver = connect(port, 2, (distance_km, 0.0)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!(
        "  SF{} over {:.1} km, weather {:?}, AQI {}",
        preset.sf, distance_km, preset.weather, preset.aqi
    );

    let started = Instant::now();
    sender.send("Hello from etherwave", preset.unicast_meta(2)).await?;

    match receiver.recv_timeout(Duration::from_secs(3)).await? {
        Some(msg) => println!(
            "  delivered in {:?}: '{}' (RSSI {:.1} dBm, SNR {:.1} dB)",
            started.elapsed(),
            msg.data,
            msg.rssi,
            msg.snr
        ),
        None => println!("  nothing arrived; the medium ate it"),
    }

    let stats = broker.stats();
    println!(
        "  broker stats: {} seen, {} delivered, {} dropped, {} in flight",
        stats.frames_seen, stats.delivered, stats.dropped, stats.in_flight
    );
    Ok(())
}

/// One sender, receivers fanned out at the given distances.
pub async fn broadcast_fanout(preset: &LinkPreset, distances_km: &[f64]) -> Result<()> {
    let (broker, port) = start_broker(None).await?;
    let sender = connect(port, 1, (0.0, 0.0)).await?;

    let mut receivers = Vec::new();
    for (i, d) in distances_km.iter().enumerate() {
        let id = i as u64 + 2;
        receivers.push((id, *d, connect(port, id, (*d, 0.0)).await?));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    sender.send("fan-out test", preset.broadcast_meta()).await?;

    for (id, d, rx) in &receivers {
        match rx.recv_timeout(Duration::from_secs(3)).await? {
            Some(msg) => println!(
                "  node {} at {:.1} km: got it (RSSI {:.1} dBm, SNR {:.1} dB)",
                id, d, msg.rssi, msg.snr
            ),
            None => println!("  node {} at {:.1} km: dropped", id, d),
        }
    }

    let stats = broker.stats();
    println!(
        "  broker stats: {} delivered, {} dropped",
        stats.delivered, stats.dropped
    );
    Ok(())
}

/// Walk a receiver outward and report the delivery rate at each step.
pub async fn range_sweep(preset: &LinkPreset, steps: &[f64], frames_per_step: usize) -> Result<()> {
    let (_broker, port) = start_broker(Some(1234)).await?;
    let sender = connect(port, 1, (0.0, 0.0)).await?;
    let receiver = connect(port, 2, (0.0, 0.0)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("  distance | delivered");
    for d in steps {
        receiver.register_at((*d, 0.0)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut delivered = 0;
        for _ in 0..frames_per_step {
            sender.send("ping", preset.unicast_meta(2)).await?;
            if receiver.recv_timeout(Duration::from_secs(2)).await?.is_some() {
                delivered += 1;
            }
        }
        println!("  {:>6.1} km | {:>2}/{}", d, delivered, frames_per_step);
    }
    Ok(())
}

/// Reliable datagrams: the receiver acks, the sender retries until it
/// hears one.
pub async fn reliable_datagram(distance_km: f64) -> Result<()> {
    let (_broker, port) = start_broker(None).await?;
    let sender = connect(port, 1, (0.0, 0.0)).await?;
    // The receiver holds its ACKs back briefly, like a radio that needs a
    // turnaround gap before replying.
    let mut receiver_config = NodeConfig::new("127.0.0.1", port, 2, (distance_km, 0.0));
    receiver_config.ack_delay = Some(Duration::from_millis(100));
    let receiver = Arc::new(RadioClient::connect(receiver_config).await?);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ack_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move {
            while let Ok(Some(msg)) = receiver.recv_timeout(Duration::from_secs(5)).await {
                if msg.is_ack() {
                    continue;
                }
                if let (Some(from), Some(identifier)) = (msg.from, msg.identifier()) {
                    let _ = receiver.send_ack(from, identifier).await;
                    return Some(msg.data);
                }
            }
            None
        })
    };

    let acked = sender.send_with_ack(2, "needs confirmation").await?;
    println!(
        "  sender: {}",
        if acked { "ACK received" } else { "gave up, no ACK" }
    );
    if let Ok(Some(data)) = ack_task.await {
        println!("  receiver saw: '{}'", data);
    }
    Ok(())
}
