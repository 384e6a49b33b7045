use crate::{
    message::ServerMessage,
    subject::{ConnectionId, EventTypeSet, Subject},
};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use terrapin_integration::{clock::SharedClock, limit::TokenBucket};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Transport-facing sender for one streaming client, in the manner of a
/// channel `Tx`. The hub drains each connection's queue into its sink.
pub trait ClientSink: Send + Sync {
    fn send(&self, message: ServerMessage) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Error)]
#[error("client sink closed")]
pub struct SinkError;

/// [`ClientSink`] over an unbounded tokio channel; the transport side owns
/// the receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<ServerMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, message: ServerMessage) -> Result<(), SinkError> {
        self.tx.send(message).map_err(|_| SinkError)
    }
}

/// What to do when a connection's outbound queue is full.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    Disconnect,
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub message_rate_per_second: u32,
    pub min_subject_spacing: Duration,
    pub heartbeat_interval: Duration,
    pub missed_heartbeat_limit: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::default(),
            message_rate_per_second: 100,
            min_subject_spacing: Duration::ZERO,
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeat_limit: 3,
        }
    }
}

/// Outcome of attempting to enqueue a message for delivery.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Rate limit or spacing dropped the message.
    RateDropped,
    /// Queue was full; the oldest message was evicted to make room.
    DroppedOldest,
    /// Queue was full and the policy demands disconnection.
    MustDisconnect,
}

/// One streaming client: its sink, bounded outbound queue and subscriptions.
pub struct Connection {
    pub id: ConnectionId,
    pub(crate) sink: Arc<dyn ClientSink>,
    pub(crate) config: ConnectionConfig,
    clock: SharedClock,
    queue: Mutex<VecDeque<ServerMessage>>,
    pub(crate) notify: Notify,
    closed: AtomicBool,
    bucket: TokenBucket,
    last_delivery: Mutex<FnvHashMap<Subject, Duration>>,
    pub(crate) subscriptions: RwLock<FnvHashMap<Subject, EventTypeSet>>,
    dropped: AtomicU64,
    last_activity: Mutex<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("queued", &self.queue.lock().len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        sink: Arc<dyn ClientSink>,
        clock: SharedClock,
        config: ConnectionConfig,
    ) -> Self {
        let bucket = TokenBucket::per_second(Arc::clone(&clock), config.message_rate_per_second);
        let now = clock.monotonic();
        Self {
            id,
            sink,
            config,
            bucket,
            clock,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            last_delivery: Mutex::new(FnvHashMap::default()),
            subscriptions: RwLock::new(FnvHashMap::default()),
            dropped: AtomicU64::new(0),
            last_activity: Mutex::new(now),
        }
    }

    /// Messages dropped on this connection (rate limit + overflow).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn touch_activity(&self) {
        *self.last_activity.lock() = self.clock.monotonic();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.clock
            .monotonic()
            .saturating_sub(*self.last_activity.lock())
    }

    /// Enqueue a fan-out event, applying rate limits and the overflow policy.
    pub(crate) fn enqueue_event(&self, subject: &Subject, message: ServerMessage) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::RateDropped;
        }

        if !self.bucket.try_acquire() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::RateDropped;
        }

        if !self.config.min_subject_spacing.is_zero() {
            let now = self.clock.monotonic();
            let mut last_delivery = self.last_delivery.lock();
            if let Some(last) = last_delivery.get(subject)
                && now.saturating_sub(*last) < self.config.min_subject_spacing
            {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return EnqueueOutcome::RateDropped;
            }
            last_delivery.insert(subject.clone(), now);
        }

        self.enqueue_direct(message)
    }

    /// Enqueue bypassing rate limits (heartbeats, command replies).
    pub(crate) fn enqueue_direct(&self, message: ServerMessage) -> EnqueueOutcome {
        let mut queue = self.queue.lock();

        let outcome = if queue.len() >= self.config.queue_capacity {
            match self.config.overflow {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    queue.push_back(message);
                    EnqueueOutcome::DroppedOldest
                }
                OverflowPolicy::Disconnect => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    EnqueueOutcome::MustDisconnect
                }
            }
        } else {
            queue.push_back(message);
            EnqueueOutcome::Enqueued
        };
        drop(queue);

        self.notify.notify_one();
        outcome
    }

    pub(crate) fn pop(&self) -> Option<ServerMessage> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Single consumer loop draining the queue into the sink. Per-subject
    /// delivery order is the enqueue order because there is exactly one queue
    /// and one drainer.
    pub(crate) async fn drain(self: Arc<Self>) {
        loop {
            match self.pop() {
                Some(message) => {
                    if self.sink.send(message).is_err() {
                        debug!(connection = %self.id, "client sink closed, stopping drain");
                        self.close();
                        return;
                    }
                }
                None => {
                    if self.is_closed() {
                        return;
                    }
                    self.notify.notified().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::EventType;
    use chrono::Utc;
    use terrapin_integration::clock::MockClock;

    fn message(n: u64) -> ServerMessage {
        ServerMessage::event(
            EventType::PriceUpdate,
            Subject::symbol("AAPL"),
            serde_json::json!({"seq": n}),
            Utc::now(),
        )
    }

    fn connection(config: ConnectionConfig) -> (Arc<Connection>, MockClock) {
        let (clock, handle) = MockClock::shared(Utc::now());
        let (sink, _rx) = ChannelSink::new();
        (
            Arc::new(Connection::new(
                ConnectionId::from("con_1"),
                Arc::new(sink),
                clock,
                config,
            )),
            handle,
        )
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let (connection, _) = connection(ConnectionConfig {
            queue_capacity: 4,
            message_rate_per_second: 1000,
            ..ConnectionConfig::default()
        });

        for n in 0..10 {
            let outcome = connection.enqueue_event(&Subject::symbol("AAPL"), message(n));
            assert_ne!(outcome, EnqueueOutcome::MustDisconnect);
        }

        assert_eq!(connection.dropped_count(), 6);
        assert_eq!(connection.queued(), 4);

        // The last 4 survive, in order.
        let mut seqs = Vec::new();
        while let Some(message) = connection.pop() {
            if let ServerMessage::PriceUpdate { data, .. } = message {
                seqs.push(data["seq"].as_u64().unwrap());
            }
        }
        assert_eq!(seqs, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_disconnect_policy_reports_must_disconnect() {
        let (connection, _) = connection(ConnectionConfig {
            queue_capacity: 1,
            overflow: OverflowPolicy::Disconnect,
            message_rate_per_second: 1000,
            ..ConnectionConfig::default()
        });

        assert_eq!(
            connection.enqueue_event(&Subject::symbol("AAPL"), message(0)),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            connection.enqueue_event(&Subject::symbol("AAPL"), message(1)),
            EnqueueOutcome::MustDisconnect
        );
    }

    #[test]
    fn test_message_rate_ceiling_drops() {
        let (connection, clock) = connection(ConnectionConfig {
            message_rate_per_second: 2,
            ..ConnectionConfig::default()
        });

        let subject = Subject::symbol("AAPL");
        assert_eq!(
            connection.enqueue_event(&subject, message(0)),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            connection.enqueue_event(&subject, message(1)),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            connection.enqueue_event(&subject, message(2)),
            EnqueueOutcome::RateDropped
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            connection.enqueue_event(&subject, message(3)),
            EnqueueOutcome::Enqueued
        );
    }

    #[test]
    fn test_min_subject_spacing() {
        let (connection, clock) = connection(ConnectionConfig {
            min_subject_spacing: Duration::from_millis(100),
            message_rate_per_second: 1000,
            ..ConnectionConfig::default()
        });

        let aapl = Subject::symbol("AAPL");
        let msft = Subject::symbol("MSFT");

        assert_eq!(
            connection.enqueue_event(&aapl, message(0)),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            connection.enqueue_event(&aapl, message(1)),
            EnqueueOutcome::RateDropped,
            "same subject inside the spacing window"
        );
        assert_eq!(
            connection.enqueue_event(&msft, message(2)),
            EnqueueOutcome::Enqueued,
            "spacing is per subject"
        );

        clock.advance(Duration::from_millis(150));
        assert_eq!(
            connection.enqueue_event(&aapl, message(3)),
            EnqueueOutcome::Enqueued
        );
    }
}
