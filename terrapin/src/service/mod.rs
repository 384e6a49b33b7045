use crate::{
    api::{AllowAll, FeatureGate},
    idempotency::IdempotencyStore,
};
use std::{sync::Arc, time::Duration};
use terrapin_execution::{
    adapter::BrokerAdapter,
    lifecycle::{OrderEventListener, OrderLifecycle, TransitionAttempt},
    model::{Order, event::OrderEvent},
    webhook::WebhookIntake,
};
use terrapin_integration::{clock::SharedClock, id::IdGenerator};
use terrapin_scanner::{aggregate::AggregationService, engine::ScannerEngine};
use terrapin_stream::{
    connection::ConnectionConfig,
    hub::SubscriptionHub,
    subject::{EventType, Subject},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Order placement, cancellation, modification and queries.
pub mod orders;

/// Inbound broker webhook handling.
pub mod webhooks;

/// Scanner runs, streaming subscriptions and aggregation.
pub mod scanners;

pub use orders::OrderService;
pub use scanners::ScannerService;
pub use webhooks::WebhookService;

const IDEMPOTENCY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const ORDER_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const ORDER_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The assembled order and market-data plane.
///
/// Components are constructed once at startup and passed by reference; tests
/// build a system around a mock clock and inject alternate adapters, gates
/// and stores.
#[derive(Debug)]
pub struct TradingSystem {
    pub clock: SharedClock,
    pub ids: Arc<IdGenerator>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub hub: SubscriptionHub,
    pub intake: Arc<WebhookIntake>,
    pub idempotency: Arc<IdempotencyStore>,
    pub orders: OrderService,
    pub webhooks: WebhookService,
    pub scanners: ScannerService,
}

impl TradingSystem {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_gate(clock, Arc::new(AllowAll))
    }

    pub fn with_gate(clock: SharedClock, gate: Arc<dyn FeatureGate>) -> Self {
        let ids = Arc::new(IdGenerator::new(Arc::clone(&clock)));
        let lifecycle = Arc::new(OrderLifecycle::new(Arc::clone(&clock), Arc::clone(&ids)));
        let hub = SubscriptionHub::new(
            Arc::clone(&clock),
            Arc::clone(&ids),
            ConnectionConfig::default(),
        );
        let intake = Arc::new(WebhookIntake::new(
            Arc::clone(&clock),
            Arc::clone(&ids),
            Arc::clone(&lifecycle),
        ));
        let idempotency = Arc::new(IdempotencyStore::new(Arc::clone(&clock)));
        let engine = Arc::new(ScannerEngine::new(Arc::clone(&clock)));
        let aggregation = Arc::new(AggregationService::new(Arc::clone(&clock)));

        // Every lifecycle transition fans out on the order's symbol subject,
        // regardless of whether it came from a client call, a webhook or the
        // paper fill pipeline.
        lifecycle.add_listener(Arc::new(HubBroadcast { hub: hub.clone() }));

        let orders = OrderService::new(
            Arc::clone(&clock),
            Arc::clone(&ids),
            Arc::clone(&lifecycle),
            Arc::clone(&idempotency),
            Arc::clone(&gate),
        );
        let webhooks = WebhookService::new(Arc::clone(&intake));
        let scanners = ScannerService::new(
            Arc::clone(&clock),
            engine,
            aggregation,
            hub.clone(),
            Arc::clone(&gate),
        );

        Self {
            clock,
            ids,
            lifecycle,
            hub,
            intake,
            idempotency,
            orders,
            webhooks,
            scanners,
        }
    }

    /// Register a broker adapter with both the order router and the webhook
    /// intake.
    pub fn register_adapter(&self, adapter: Arc<dyn BrokerAdapter>) {
        self.intake.register(Arc::clone(&adapter));
        self.orders.register_adapter(adapter);
    }

    /// Pump the paper venue's simulated fill intents through the lifecycle.
    /// Transition failures follow webhook semantics: logged, never raised.
    pub fn attach_fill_intents(
        &self,
        mut intents: mpsc::UnboundedReceiver<TransitionAttempt>,
    ) -> tokio::task::JoinHandle<()> {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            while let Some(attempt) = intents.recv().await {
                let order_id = attempt.order_id.clone();
                if let Err(error) = lifecycle.transition(attempt) {
                    debug!(%order_id, ?error, "fill intent transition ignored");
                }
            }
        })
    }

    /// Start the periodic sweepers: expired idempotency records, and
    /// terminal orders older than the retention window.
    pub fn spawn_maintenance(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let idempotency_sweeper = self.idempotency.spawn_sweeper(IDEMPOTENCY_SWEEP_INTERVAL);

        let lifecycle = Arc::clone(&self.lifecycle);
        let clock = Arc::clone(&self.clock);
        let retention_sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ORDER_RETENTION_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cutoff = clock.now()
                    - chrono::TimeDelta::from_std(ORDER_RETENTION)
                        .unwrap_or(chrono::TimeDelta::hours(24));
                let removed = lifecycle.purge_terminal(cutoff);
                if removed > 0 {
                    debug!(removed, "swept terminal orders past retention");
                }
            }
        });

        vec![idempotency_sweeper, retention_sweeper]
    }

    /// Forward a venue's streaming quotes onto the hub's symbol plane as
    /// `price_update` events. Venues without streaming support return the
    /// adapter's `Validation` error.
    pub async fn stream_quotes_to_hub(
        &self,
        adapter: Arc<dyn BrokerAdapter>,
        symbols: Vec<smol_str::SmolStr>,
    ) -> Result<tokio::task::JoinHandle<()>, terrapin_execution::error::BrokerError> {
        use futures::StreamExt;

        let mut quotes = adapter.stream_quotes(&symbols).await?;
        let hub = self.hub.clone();

        Ok(tokio::spawn(async move {
            while let Some(quote) = quotes.next().await {
                match serde_json::to_value(&quote) {
                    Ok(data) => {
                        hub.publish(
                            &Subject::Symbol(quote.symbol.clone()),
                            EventType::PriceUpdate,
                            data,
                        );
                    }
                    Err(error) => {
                        warn!(symbol = %quote.symbol, %error, "failed to serialize quote");
                    }
                }
            }
        }))
    }
}

/// Publishes every order event on its symbol subject.
struct HubBroadcast {
    hub: SubscriptionHub,
}

impl OrderEventListener for HubBroadcast {
    fn on_event(&self, order: &Order, event: &OrderEvent) {
        let data = match serde_json::to_value(event) {
            Ok(data) => data,
            Err(error) => {
                warn!(order_id = %event.order_id, %error, "failed to serialize order event");
                return;
            }
        };

        self.hub.publish(
            &Subject::Symbol(order.symbol.clone()),
            EventType::OrderEvent,
            data,
        );
    }
}
