use crate::{
    connection::{ChannelSink, ConnectionConfig, OverflowPolicy},
    hub::SubscriptionHub,
    message::ServerMessage,
    subject::{EventType, EventTypeSet, Subject},
};
use std::{sync::Arc, time::Duration};
use terrapin_integration::{
    clock::{LiveClock, MockClock},
    id::IdGenerator,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn hub() -> SubscriptionHub {
    let clock = LiveClock::shared();
    let ids = Arc::new(IdGenerator::new(Arc::clone(&clock)));
    SubscriptionHub::new(clock, ids, ConnectionConfig::default())
}

fn mock_hub() -> (SubscriptionHub, MockClock) {
    let (clock, handle) = MockClock::shared(chrono::Utc::now());
    let ids = Arc::new(IdGenerator::new(Arc::clone(&clock)));
    (
        SubscriptionHub::new(clock, ids, ConnectionConfig::default()),
        handle,
    )
}

async fn recv_event(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    loop {
        let message = rx.recv().await.expect("hub closed connection");
        // Heartbeats are incidental to most tests.
        if !matches!(message, ServerMessage::Ping { .. }) {
            return message;
        }
    }
}

#[tokio::test]
async fn test_publish_reaches_only_subscribers_of_subject_and_type() {
    let hub = hub();

    let (sink_a, mut rx_a) = ChannelSink::new();
    let (sink_b, mut rx_b) = ChannelSink::new();
    let conn_a = hub.connect(Arc::new(sink_a));
    let conn_b = hub.connect(Arc::new(sink_b));

    hub.subscribe(
        &conn_a,
        [Subject::symbol("AAPL")],
        EventTypeSet::EMPTY.with(EventType::PriceUpdate),
    );
    hub.subscribe(&conn_b, [Subject::symbol("MSFT")], EventTypeSet::all());

    let delivered = hub.publish(
        &Subject::symbol("AAPL"),
        EventType::PriceUpdate,
        serde_json::json!({"px": "150"}),
    );
    assert_eq!(delivered, 1);

    let message = recv_event(&mut rx_a).await;
    assert!(matches!(message, ServerMessage::PriceUpdate { .. }));
    assert_eq!(
        message.subject(),
        Some(&Subject::symbol("AAPL")),
        "delivered on the published subject"
    );

    // conn_a is not subscribed to order events on AAPL.
    assert_eq!(
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::OrderEvent,
            serde_json::json!({})
        ),
        0
    );

    // conn_b never sees AAPL traffic.
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn test_per_subject_delivery_preserves_publish_order() {
    let hub = hub();
    let (sink, mut rx) = ChannelSink::new();
    let conn = hub.connect(Arc::new(sink));
    hub.subscribe(&conn, [Subject::symbol("AAPL")], EventTypeSet::all());

    for n in 0..20u64 {
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::PriceUpdate,
            serde_json::json!({"seq": n}),
        );
    }

    let mut seqs = Vec::new();
    for _ in 0..20 {
        if let ServerMessage::PriceUpdate { data, .. } = recv_event(&mut rx).await {
            seqs.push(data["seq"].as_u64().unwrap());
        }
    }
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_backpressure_drop_oldest_delivers_last_four() {
    let hub = hub();
    let (sink, mut rx) = ChannelSink::new();

    // Queue capacity 4, DropOldest. Publishing runs synchronously on this
    // task, so the drain task cannot interleave until we await.
    let conn = hub.connect_with(
        Arc::new(sink),
        ConnectionConfig {
            queue_capacity: 4,
            overflow: OverflowPolicy::DropOldest,
            message_rate_per_second: 1000,
            ..ConnectionConfig::default()
        },
    );
    hub.subscribe(&conn, [Subject::symbol("AAPL")], EventTypeSet::all());

    for n in 0..10u64 {
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::PriceUpdate,
            serde_json::json!({"seq": n}),
        );
    }

    assert_eq!(hub.connection_dropped(&conn), 6);
    assert_eq!(hub.dropped_total(), 6);

    let mut seqs = Vec::new();
    for _ in 0..4 {
        if let ServerMessage::PriceUpdate { data, .. } = recv_event(&mut rx).await {
            seqs.push(data["seq"].as_u64().unwrap());
        }
    }
    assert_eq!(seqs, vec![6, 7, 8, 9]);
}

#[tokio::test]
async fn test_disconnect_policy_closes_connection_on_overflow() {
    let hub = hub();
    let (sink, _rx) = ChannelSink::new();
    let conn = hub.connect_with(
        Arc::new(sink),
        ConnectionConfig {
            queue_capacity: 1,
            overflow: OverflowPolicy::Disconnect,
            message_rate_per_second: 1000,
            ..ConnectionConfig::default()
        },
    );
    hub.subscribe(&conn, [Subject::symbol("AAPL")], EventTypeSet::all());

    hub.publish(
        &Subject::symbol("AAPL"),
        EventType::PriceUpdate,
        serde_json::json!({"seq": 0}),
    );
    hub.publish(
        &Subject::symbol("AAPL"),
        EventType::PriceUpdate,
        serde_json::json!({"seq": 1}),
    );

    assert_eq!(hub.connection_count(), 0, "overflow disconnected the client");
}

#[tokio::test]
async fn test_unsubscribe_leaves_no_residual_deliveries() {
    let hub = hub();
    let (sink, mut rx) = ChannelSink::new();
    let conn = hub.connect(Arc::new(sink));

    hub.subscribe(&conn, [Subject::symbol("AAPL")], EventTypeSet::all());
    hub.unsubscribe(&conn, [Subject::symbol("AAPL")]);

    assert!(hub.subscriptions(&conn).is_empty());
    assert_eq!(
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::PriceUpdate,
            serde_json::json!({})
        ),
        0
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_removes_subscriptions_atomically() {
    let hub = hub();
    let (sink, _rx) = ChannelSink::new();
    let conn = hub.connect(Arc::new(sink));

    hub.subscribe(
        &conn,
        [Subject::symbol("AAPL"), Subject::scanner("scan-1")],
        EventTypeSet::all(),
    );
    hub.disconnect(&conn);

    assert_eq!(hub.connection_count(), 0);
    assert_eq!(
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::PriceUpdate,
            serde_json::json!({})
        ),
        0
    );
    assert_eq!(
        hub.publish(
            &Subject::scanner("scan-1"),
            EventType::ScannerResult,
            serde_json::json!({})
        ),
        0
    );
}

#[tokio::test]
async fn test_commands_subscribe_ping_list() {
    let hub = hub();
    let (sink, mut rx) = ChannelSink::new();
    let conn = hub.connect(Arc::new(sink));

    hub.handle_command(
        &conn,
        r#"{"type": "subscribe", "symbols": ["aapl"], "scanner_id": "scan-1"}"#,
    );

    // Reply is a list of normalized subjects.
    let reply = recv_event(&mut rx).await;
    let ServerMessage::List { data, .. } = reply else {
        panic!("expected list reply, got {reply:?}");
    };
    let subjects = data["subjects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value.as_str().unwrap().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(subjects, vec!["AAPL", "scanner:scan-1"]);

    hub.handle_command(&conn, r#"{"type": "ping"}"#);
    assert!(matches!(
        recv_event(&mut rx).await,
        ServerMessage::Pong { .. }
    ));

    // Symbol was normalized, so publishes on the uppercase subject land.
    assert_eq!(
        hub.publish(
            &Subject::symbol("AAPL"),
            EventType::PriceUpdate,
            serde_json::json!({})
        ),
        1
    );
}

#[tokio::test]
async fn test_malformed_command_yields_typed_error_not_disconnect() {
    let hub = hub();
    let (sink, mut rx) = ChannelSink::new();
    let conn = hub.connect(Arc::new(sink));

    hub.handle_command(&conn, "not json at all");

    let reply = recv_event(&mut rx).await;
    let ServerMessage::Error { code, .. } = reply else {
        panic!("expected error reply, got {reply:?}");
    };
    assert_eq!(code, crate::message::StreamErrorCode::BadCommand);
    assert_eq!(hub.connection_count(), 1, "connection survives bad commands");

    // Subscribe with no subjects is also a BadCommand.
    hub.handle_command(&conn, r#"{"type": "subscribe"}"#);
    assert!(matches!(
        recv_event(&mut rx).await,
        ServerMessage::Error { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_missed_heartbeats_terminate_connection() {
    let (hub, clock) = mock_hub();
    let (sink, _rx) = ChannelSink::new();
    let conn = hub.connect_with(
        Arc::new(sink),
        ConnectionConfig {
            heartbeat_interval: Duration::from_secs(5),
            missed_heartbeat_limit: 2,
            ..ConnectionConfig::default()
        },
    );
    assert_eq!(hub.connection_count(), 1);

    // Idle the connection past interval * limit on the injected clock, then
    // let the (paused, auto-advanced) heartbeat ticker fire.
    clock.advance(Duration::from_secs(31));
    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    assert_eq!(hub.connection_count(), 0, "idle connection terminated");
    let _ = conn;
}

#[tokio::test]
async fn test_publish_to_unknown_subject_is_noop() {
    let (hub, _clock) = mock_hub();
    assert_eq!(
        hub.publish(
            &Subject::symbol("NOPE"),
            EventType::PriceUpdate,
            serde_json::json!({})
        ),
        0
    );
}
