//! end-to-end tests: real broker, real TCP, real clients

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedWrite, LinesCodec};

use etherwave_broker::{Broker, BrokerConfig, BrokerServer};
use etherwave_node::{NodeConfig, RadioClient};
use etherwave_proto::TxMeta;

async fn start_broker(seed: u64) -> (Arc<Broker>, u16) {
    let config = BrokerConfig {
        listen_addr: "127.0.0.1".to_string(),
        port: 0,
        rng_seed: Some(seed),
        ..BrokerConfig::default()
    };
    let server = BrokerServer::bind(config).await.expect("bind");
    let port = server.local_addr().expect("local addr").port();
    let broker = server.broker();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (broker, port)
}

async fn connect(port: u16, id: u64, location: (f64, f64)) -> RadioClient {
    let client = RadioClient::connect(NodeConfig::new("127.0.0.1", port, id, location))
        .await
        .expect("connect");
    // Give the broker a beat to process the registration.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
}

async fn wait_until(mut condition: impl FnMut() -> bool, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn co_located_pair_relays_hello() {
    let (broker, port) = start_broker(7).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (0.0, 0.0)).await;

    sender.send_to(2, "Hello").await.expect("send");
    let msg = receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .expect("co-located frame must arrive");

    assert_eq!(msg.data, "Hello");
    assert_eq!(msg.from, Some(1));
    assert!(msg.rssi > -40.0, "rssi {}", msg.rssi);
    assert_eq!(receiver.last_rssi(), msg.rssi);

    assert!(wait_until(|| broker.stats().in_flight == 0, Duration::from_secs(2)).await);
    let stats = broker.stats();
    assert_eq!(stats.frames_seen, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn sf7_past_range_is_dropped() {
    let (broker, port) = start_broker(8).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (5.1, 0.0)).await;

    sender.send_to(2, "too far").await.expect("send");

    assert!(receiver
        .recv_timeout(Duration::from_millis(800))
        .await
        .expect("recv")
        .is_none());
    let stats = broker.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
    let (broker, port) = start_broker(21).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let rx_a = connect(port, 2, (0.1, 0.0)).await;
    let rx_b = connect(port, 3, (0.0, 0.2)).await;
    let rx_c = connect(port, 4, (0.2, 0.2)).await;

    sender.broadcast("fan out").await.expect("send");

    for rx in [&rx_a, &rx_b, &rx_c] {
        let msg = rx
            .recv_timeout(Duration::from_secs(3))
            .await
            .expect("recv")
            .expect("close-range broadcast must arrive");
        assert_eq!(msg.data, "fan out");
        assert_eq!(msg.from, Some(1));
    }

    // A broadcast never loops back.
    assert!(sender
        .recv_timeout(Duration::from_millis(300))
        .await
        .expect("recv")
        .is_none());

    assert!(wait_until(|| broker.stats().in_flight == 0, Duration::from_secs(2)).await);
    assert_eq!(broker.stats().delivered, 3);
}

#[tokio::test]
async fn unicast_to_unknown_node_is_discarded() {
    let (broker, port) = start_broker(3).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;

    sender.send_to(99, "anyone there?").await.expect("send");

    assert!(wait_until(|| broker.stats().dropped == 1, Duration::from_secs(1)).await);
    assert_eq!(broker.stats().delivered, 0);
    assert_eq!(broker.stats().in_flight, 0);
}

#[tokio::test]
async fn tx_before_register_is_discarded() {
    let (broker, port) = start_broker(4).await;
    let receiver = connect(port, 2, (0.0, 0.0)).await;

    // A bare connection that transmits without registering first.
    let stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let mut raw = FramedWrite::new(stream, LinesCodec::new());
    raw.send(r#"{"type":"tx","from":1,"data":"ghost","meta":{"destination":2}}"#.to_string())
        .await
        .expect("raw send");

    assert!(receiver
        .recv_timeout(Duration::from_millis(500))
        .await
        .expect("recv")
        .is_none());
    assert_eq!(broker.stats().delivered, 0);
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_alive() {
    let (_broker, port) = start_broker(5).await;
    let receiver = connect(port, 2, (0.0, 0.0)).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let mut raw = FramedWrite::new(stream, LinesCodec::new());
    raw.send("this is not json".to_string()).await.expect("raw send");
    raw.send(r#"{"type":"warp","factor":9}"#.to_string()).await.expect("raw send");
    // The same connection can still register and transmit.
    raw.send(r#"{"type":"register","node_id":7,"location":[0.0,0.0]}"#.to_string())
        .await
        .expect("raw send");
    tokio::time::sleep(Duration::from_millis(50)).await;
    raw.send(r#"{"type":"tx","from":7,"data":"still here","meta":{"destination":2}}"#.to_string())
        .await
        .expect("raw send");

    let msg = receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .expect("frame after garbage must arrive");
    assert_eq!(msg.data, "still here");
    assert_eq!(msg.from, Some(7));
}

#[tokio::test]
async fn re_register_moves_the_node_into_range() {
    let (broker, port) = start_broker(6).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (10.0, 0.0)).await;

    // 10 km on SF7 is far past range: hard drop.
    sender.send_to(2, "first").await.expect("send");
    assert!(receiver
        .recv_timeout(Duration::from_millis(500))
        .await
        .expect("recv")
        .is_none());

    receiver.register_at((0.05, 0.0)).await.expect("re-register");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.node_count().await, 2);

    sender.send_to(2, "second").await.expect("send");
    let msg = receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .expect("in-range frame must arrive");
    assert_eq!(msg.data, "second");
}

#[tokio::test]
async fn streak_grows_on_drops_and_resets_on_delivery() {
    let (broker, port) = start_broker(10).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (6.0, 0.0)).await;

    // 6 km on SF7: every frame is out of range, the streak climbs.
    for _ in 0..5 {
        sender.send_to(2, "void").await.expect("send");
    }
    assert!(wait_until(|| broker.stats().dropped == 5, Duration::from_secs(1)).await);
    assert_eq!(broker.pair_streak(1, 2), 5);

    receiver.register_at((0.05, 0.0)).await.expect("re-register");
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send_to(2, "back in range").await.expect("send");
    assert!(receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .is_some());

    // The broker records the delivery right after the write lands.
    assert!(wait_until(|| broker.pair_streak(1, 2) == 0, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn same_receiver_frames_arrive_in_delay_order() {
    let (broker, port) = start_broker(12).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (0.1, 0.0)).await;

    // SF8 spends roughly twice as long on the air as SF7 for the same
    // payload, so the second frame overtakes the first.
    let payload = "x".repeat(32);
    let slow = TxMeta { destination: Some(2), sf: Some(8), ..TxMeta::default() };
    let fast = TxMeta { destination: Some(2), sf: Some(7), ..TxMeta::default() };
    sender.send(&payload, slow).await.expect("send slow");
    sender.send(&payload, fast).await.expect("send fast");

    let first = receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .expect("fast frame");
    let second = receiver
        .recv_timeout(Duration::from_secs(3))
        .await
        .expect("recv")
        .expect("slow frame");

    assert_eq!(first.meta.get("sf").and_then(serde_json::Value::as_u64), Some(7));
    assert_eq!(second.meta.get("sf").and_then(serde_json::Value::as_u64), Some(8));

    assert!(wait_until(|| broker.stats().in_flight == 0, Duration::from_secs(2)).await);
    assert_eq!(broker.stats().delivered, 2);
}

#[tokio::test]
async fn same_sf_burst_sheds_load() {
    let (broker, port) = start_broker(14).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    let receiver = connect(port, 2, (0.1, 0.0)).await;

    // Ten frames at the same SF, all decided while the first is still on
    // the air: the interference term has to kill at least one.
    for i in 0..10 {
        sender.send_to(2, &format!("burst {}", i)).await.expect("send");
    }

    assert!(wait_until(|| broker.stats().in_flight == 0, Duration::from_secs(3)).await);
    let stats = broker.stats();
    assert_eq!(stats.frames_seen, 10);
    assert_eq!(stats.delivered + stats.dropped, 10);
    assert!(stats.dropped >= 1, "burst should shed load, stats {:?}", stats);

    let mut received = 0;
    while receiver
        .recv_timeout(Duration::from_millis(200))
        .await
        .expect("recv")
        .is_some()
    {
        received += 1;
    }
    assert_eq!(received, stats.delivered);
}

#[tokio::test]
async fn disconnect_removes_the_node() {
    let (broker, port) = start_broker(13).await;
    let sender = connect(port, 1, (0.0, 0.0)).await;
    {
        let _receiver = connect(port, 2, (0.0, 0.0)).await;
        assert_eq!(broker.node_count().await, 2);
    }
    // Receiver dropped; its connection closes and the registry shrinks.
    assert!(
        wait_until_async(&broker, 1, Duration::from_secs(2)).await,
        "node 2 should be removed after disconnect"
    );

    // A unicast to the departed node is now NO_ROUTE.
    sender.send_to(2, "anyone?").await.expect("send");
    assert!(wait_until(|| broker.stats().dropped >= 1, Duration::from_secs(1)).await);
}

async fn wait_until_async(broker: &Arc<Broker>, count: usize, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if broker.node_count().await == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    broker.node_count().await == count
}
