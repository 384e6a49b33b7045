use crate::{
    BrokerKind,
    adapter::BrokerAdapter,
    error::{BrokerError, LifecycleError},
    lifecycle::OrderLifecycle,
    model::{
        event::OrderEvent,
        fill::Fill,
        id::FillId,
    },
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use terrapin_integration::{cache::TtlCache, clock::SharedClock, hash::sha256_hex, id::IdGenerator};
use tracing::{debug, info, warn};

/// Outcome of one inbound webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeReceipt {
    pub webhook_id: SmolStr,
    pub duplicate: bool,
    pub events: Vec<OrderEvent>,
    /// Immutable fill records materialised from fill-bearing transitions.
    pub fills: Vec<Fill>,
}

const SEEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Inbound broker webhook pipeline: verify signature, dedup, translate into
/// transition intents via the adapter's status map, feed the lifecycle.
///
/// Brokers deliver at-least-once; the seen-set plus the lifecycle's declared
/// transitions make application at-most-once. Transition failures are logged
/// and counted, never surfaced to the delivering broker.
pub struct WebhookIntake {
    clock: SharedClock,
    ids: Arc<IdGenerator>,
    lifecycle: Arc<OrderLifecycle>,
    adapters: RwLock<FnvHashMap<BrokerKind, Arc<dyn BrokerAdapter>>>,
    seen: TtlCache<SmolStr, ()>,
    duplicates: AtomicU64,
    failed_transitions: AtomicU64,
}

impl std::fmt::Debug for WebhookIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIntake")
            .field("seen", &self.seen.len())
            .field("duplicates", &self.duplicates.load(Ordering::Relaxed))
            .field(
                "failed_transitions",
                &self.failed_transitions.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl WebhookIntake {
    pub fn new(
        clock: SharedClock,
        ids: Arc<IdGenerator>,
        lifecycle: Arc<OrderLifecycle>,
    ) -> Self {
        Self {
            seen: TtlCache::new(Arc::clone(&clock), SEEN_TTL),
            clock,
            ids,
            lifecycle,
            adapters: RwLock::new(FnvHashMap::default()),
            duplicates: AtomicU64::new(0),
            failed_transitions: AtomicU64::new(0),
        }
    }

    /// Register the adapter whose signature scheme and status map serve this
    /// broker kind.
    pub fn register(&self, adapter: Arc<dyn BrokerAdapter>) {
        self.adapters.write().insert(adapter.kind(), adapter);
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn failed_transition_count(&self) -> u64 {
        self.failed_transitions.load(Ordering::Relaxed)
    }

    /// Process one raw webhook delivery.
    ///
    /// Signature and dedup failures are the only caller-visible errors; a
    /// verified duplicate is a successful no-op, and transition failures
    /// inside the payload never propagate.
    pub fn process(
        &self,
        kind: BrokerKind,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<IntakeReceipt, BrokerError> {
        let adapter = self
            .adapters
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| BrokerError::Validation(format!("unsupported broker kind: {kind}")))?;

        if !adapter.signature_scheme().verify(raw_body, signature) {
            warn!(broker = %kind, "webhook signature verification failed");
            return Err(BrokerError::Authentication(
                "invalid webhook signature".into(),
            ));
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|error| BrokerError::Validation(format!("malformed webhook body: {error}")))?;

        let webhook_id = payload
            .get("webhook_id")
            .and_then(|id| id.as_str())
            .map(SmolStr::new)
            .unwrap_or_else(|| SmolStr::new(sha256_hex(raw_body)));

        if self.seen.contains(&webhook_id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(broker = %kind, %webhook_id, "duplicate webhook, no-op");
            return Ok(IntakeReceipt {
                webhook_id,
                duplicate: true,
                events: Vec::new(),
                fills: Vec::new(),
            });
        }
        self.seen.insert(webhook_id.clone(), ());

        let attempts = adapter.translate_webhook(&payload)?;
        let mut events = Vec::with_capacity(attempts.len());
        let mut fills = Vec::new();

        for attempt in attempts {
            let order_id = attempt.order_id.clone();
            match self.lifecycle.transition(attempt) {
                Ok(event) => {
                    if let Some(fill) = self.materialize_fill(&event) {
                        fills.push(fill);
                    }
                    events.push(event);
                }
                Err(LifecycleError::InvalidTransition { from, to, .. }) => {
                    // Out-of-order or replayed broker event; reconciliation
                    // consumes it silently.
                    self.failed_transitions.fetch_add(1, Ordering::Relaxed);
                    debug!(broker = %kind, %order_id, %from, %to, "webhook transition ignored");
                }
                Err(error) => {
                    self.failed_transitions.fetch_add(1, Ordering::Relaxed);
                    warn!(broker = %kind, %order_id, ?error, "webhook transition failed");
                }
            }
        }

        info!(
            broker = %kind,
            %webhook_id,
            events = events.len(),
            fills = fills.len(),
            "processed webhook"
        );

        Ok(IntakeReceipt {
            webhook_id,
            duplicate: false,
            events,
            fills,
        })
    }

    /// Build the immutable fill record for a fill-bearing transition. The
    /// owning order exists and was fillable when the transition applied.
    fn materialize_fill(&self, event: &OrderEvent) -> Option<Fill> {
        let quantity = event.quantity?;
        let price = event.price?;
        let order = self.lifecycle.get(&event.order_id)?;

        Some(Fill {
            id: FillId(self.ids.fill_id()),
            order_id: event.order_id.clone(),
            symbol: order.symbol,
            side: order.side,
            quantity,
            price,
            commission: rust_decimal::Decimal::ZERO,
            time: self.clock.now(),
            venue: None,
        })
    }
}
