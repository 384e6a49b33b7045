use crate::{
    connection::{ClientSink, Connection, ConnectionConfig, EnqueueOutcome},
    message::{ClientCommand, ServerMessage, StreamErrorCode},
    subject::{ConnectionId, EventType, EventTypeSet, Subject},
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use terrapin_integration::{clock::SharedClock, id::IdGenerator};
use tracing::{debug, info, warn};

/// Connection registry and rate-limited, ordered fan-out.
///
/// The subscriber index is copy-on-write at the subject level: publishers
/// snapshot an `Arc<[ConnectionId]>` and never block subscribers of other
/// subjects. Membership is re-checked against the connection's live
/// subscription table at delivery time, so an unsubscribe that lands between
/// snapshot and delivery suppresses the event.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    clock: SharedClock,
    ids: Arc<IdGenerator>,
    config: ConnectionConfig,
    connections: RwLock<FnvHashMap<ConnectionId, Arc<Connection>>>,
    index: RwLock<FnvHashMap<Subject, Arc<Vec<ConnectionId>>>>,
    drops: AtomicU64,
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("connections", &self.inner.connections.read().len())
            .field("subjects", &self.inner.index.read().len())
            .field("drops", &self.inner.drops.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SubscriptionHub {
    pub fn new(clock: SharedClock, ids: Arc<IdGenerator>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clock,
                ids,
                config,
                connections: RwLock::new(FnvHashMap::default()),
                index: RwLock::new(FnvHashMap::default()),
                drops: AtomicU64::new(0),
            }),
        }
    }

    /// Register a client connection; spawns its drain and heartbeat tasks.
    pub fn connect(&self, sink: Arc<dyn ClientSink>) -> ConnectionId {
        self.connect_with(sink, self.inner.config.clone())
    }

    /// Register with per-connection overrides (queue capacity, overflow
    /// policy, limits).
    pub fn connect_with(&self, sink: Arc<dyn ClientSink>, config: ConnectionConfig) -> ConnectionId {
        let id = ConnectionId(self.inner.ids.connection_id());
        let connection = Arc::new(Connection::new(
            id.clone(),
            sink,
            Arc::clone(&self.inner.clock),
            config,
        ));

        self.inner
            .connections
            .write()
            .insert(id.clone(), Arc::clone(&connection));

        tokio::spawn(Arc::clone(&connection).drain());
        tokio::spawn(Self::heartbeat_task(self.clone(), Arc::clone(&connection)));

        info!(connection = %id, "client connected");
        id
    }

    /// Terminate a connection: cancel its tasks and remove every
    /// subscription atomically with respect to publishers.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let Some(connection) = self.inner.connections.write().remove(connection_id) else {
            return;
        };

        let subjects = connection
            .subscriptions
            .read()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        {
            let mut index = self.inner.index.write();
            for subject in subjects {
                remove_from_index(&mut index, &subject, connection_id);
            }
        }

        connection.close();
        info!(connection = %connection_id, dropped = connection.dropped_count(), "client disconnected");
    }

    /// Subscribe `connection_id` to `subjects` for the given event types.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        subjects: impl IntoIterator<Item = Subject>,
        types: EventTypeSet,
    ) -> bool {
        let Some(connection) = self.connection(connection_id) else {
            return false;
        };

        let subjects = subjects.into_iter().collect::<Vec<_>>();
        {
            let mut table = connection.subscriptions.write();
            for subject in &subjects {
                table
                    .entry(subject.clone())
                    .and_modify(|mask| *mask = mask.union(types))
                    .or_insert(types);
            }
        }

        let mut index = self.inner.index.write();
        for subject in subjects {
            let entry = index.entry(subject).or_default();
            if !entry.contains(connection_id) {
                let mut updated = entry.as_ref().clone();
                updated.push(connection_id.clone());
                *entry = Arc::new(updated);
            }
        }
        true
    }

    /// Remove the connection's subscriptions for `subjects`.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        subjects: impl IntoIterator<Item = Subject>,
    ) -> bool {
        let Some(connection) = self.connection(connection_id) else {
            return false;
        };

        let subjects = subjects.into_iter().collect::<Vec<_>>();
        {
            let mut table = connection.subscriptions.write();
            for subject in &subjects {
                table.remove(subject);
            }
        }

        let mut index = self.inner.index.write();
        for subject in &subjects {
            remove_from_index(&mut index, subject, connection_id);
        }
        true
    }

    /// Fan an event out to every live subscriber of `subject` whose type
    /// mask includes `event_type`.
    ///
    /// Returns the number of connections the event was enqueued for.
    pub fn publish(
        &self,
        subject: &Subject,
        event_type: EventType,
        data: serde_json::Value,
    ) -> usize {
        let Some(snapshot) = self.inner.index.read().get(subject).cloned() else {
            return 0;
        };

        let message = ServerMessage::event(
            event_type,
            subject.clone(),
            data,
            self.inner.clock.now(),
        );

        let mut delivered = 0;
        let mut to_disconnect = Vec::new();

        for connection_id in snapshot.iter() {
            let Some(connection) = self.connection(connection_id) else {
                continue;
            };

            // Membership re-check at delivery time.
            let subscribed = connection
                .subscriptions
                .read()
                .get(subject)
                .is_some_and(|mask| mask.contains(event_type));
            if !subscribed {
                continue;
            }

            match connection.enqueue_event(subject, message.clone()) {
                EnqueueOutcome::Enqueued => delivered += 1,
                EnqueueOutcome::DroppedOldest => {
                    self.inner.drops.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                }
                EnqueueOutcome::RateDropped => {
                    self.inner.drops.fetch_add(1, Ordering::Relaxed);
                }
                EnqueueOutcome::MustDisconnect => {
                    self.inner.drops.fetch_add(1, Ordering::Relaxed);
                    to_disconnect.push(connection_id.clone());
                }
            }
        }

        for connection_id in to_disconnect {
            warn!(connection = %connection_id, %subject, "outbound queue overflow, disconnecting");
            self.disconnect(&connection_id);
        }

        delivered
    }

    /// Handle one client command, replying on the connection's own queue.
    /// Malformed or unauthorized commands yield a typed error message and
    /// never drop the connection.
    pub fn handle_command(&self, connection_id: &ConnectionId, raw: &str) {
        let Some(connection) = self.connection(connection_id) else {
            return;
        };
        connection.touch_activity();

        let command = match ClientCommand::parse(raw) {
            Ok(command) => command,
            Err(error) => {
                debug!(connection = %connection_id, %error, "bad client command");
                connection.enqueue_direct(ServerMessage::error(
                    StreamErrorCode::BadCommand,
                    format!("unparseable command: {error}"),
                    self.inner.clock.now(),
                ));
                return;
            }
        };

        match command {
            ClientCommand::Subscribe {
                symbols,
                scanner_id,
                data_types,
            } => {
                let types = data_types
                    .map(|types| types.into_iter().collect::<EventTypeSet>())
                    .unwrap_or_default();
                let subjects = command_subjects(symbols, scanner_id);
                if subjects.is_empty() {
                    connection.enqueue_direct(ServerMessage::error(
                        StreamErrorCode::BadCommand,
                        "subscribe requires symbols or scanner_id",
                        self.inner.clock.now(),
                    ));
                    return;
                }
                self.subscribe(connection_id, subjects, types);
                self.reply_list(&connection);
            }
            ClientCommand::Unsubscribe { symbols, scanner_id } => {
                let subjects = command_subjects(symbols, scanner_id);
                self.unsubscribe(connection_id, subjects);
                self.reply_list(&connection);
            }
            ClientCommand::Ping => {
                connection.enqueue_direct(ServerMessage::Pong {
                    timestamp: self.inner.clock.now(),
                });
            }
            ClientCommand::List => self.reply_list(&connection),
        }
    }

    fn reply_list(&self, connection: &Connection) {
        let mut subjects = connection
            .subscriptions
            .read()
            .keys()
            .map(|subject| subject.to_string())
            .collect::<Vec<_>>();
        subjects.sort_unstable();

        connection.enqueue_direct(ServerMessage::List {
            data: serde_json::json!({ "subjects": subjects }),
            timestamp: self.inner.clock.now(),
        });
    }

    /// Subjects the connection currently holds.
    pub fn subscriptions(&self, connection_id: &ConnectionId) -> Vec<Subject> {
        self.connection(connection_id)
            .map(|connection| connection.subscriptions.read().keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Total messages dropped across all connections (operational metric).
    pub fn dropped_total(&self) -> u64 {
        self.inner.drops.load(Ordering::Relaxed)
    }

    pub fn connection_dropped(&self, connection_id: &ConnectionId) -> u64 {
        self.connection(connection_id)
            .map(|connection| connection.dropped_count())
            .unwrap_or(0)
    }

    fn connection(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner.connections.read().get(connection_id).cloned()
    }

    /// Schedule heartbeats and terminate on missed-heartbeat.
    async fn heartbeat_task(hub: SubscriptionHub, connection: Arc<Connection>) {
        let interval = connection.config.heartbeat_interval;
        let limit = connection.config.missed_heartbeat_limit;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if connection.is_closed() {
                return;
            }

            if connection.idle_for() > interval * limit {
                warn!(connection = %connection.id, "missed heartbeats, terminating connection");
                hub.disconnect(&connection.id);
                return;
            }

            connection.enqueue_direct(ServerMessage::Ping {
                timestamp: hub.inner.clock.now(),
            });
        }
    }
}

fn command_subjects(symbols: Vec<SmolStr>, scanner_id: Option<SmolStr>) -> Vec<Subject> {
    let mut subjects = symbols
        .into_iter()
        .map(|symbol| Subject::Symbol(normalize_symbol(&symbol)))
        .collect::<Vec<_>>();
    if let Some(scanner_id) = scanner_id {
        subjects.push(Subject::Scanner(scanner_id));
    }
    subjects
}

fn normalize_symbol(symbol: &str) -> SmolStr {
    SmolStr::new(symbol.trim().to_ascii_uppercase())
}

fn remove_from_index(
    index: &mut FnvHashMap<Subject, Arc<Vec<ConnectionId>>>,
    subject: &Subject,
    connection_id: &ConnectionId,
) {
    if let Some(entry) = index.get_mut(subject) {
        if entry.contains(connection_id) {
            let updated = entry
                .iter()
                .filter(|id| *id != connection_id)
                .cloned()
                .collect::<Vec<_>>();
            if updated.is_empty() {
                index.remove(subject);
            } else {
                *entry = Arc::new(updated);
            }
        } else if entry.is_empty() {
            index.remove(subject);
        }
    }
}
