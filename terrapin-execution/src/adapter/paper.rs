use crate::{
    BrokerKind,
    adapter::{AdapterConfig, AdapterCore, BrokerAdapter},
    error::BrokerError,
    lifecycle::{TransitionAttempt, TransitionCtx},
    model::{
        Account, Order, OrderFilter, OrderKind, OrderStatus, OrderUpdate, Position, Side,
        account::AccountKind,
        fill::Fill,
        id::{AccountId, FillId, OrderId},
        position::PositionSide,
        quote::Quote,
    },
};
use async_trait::async_trait;
use chrono::{Datelike, NaiveTime};
use fnv::FnvHashMap;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use terrapin_integration::{
    clock::SharedClock, id::IdGenerator, signature::SignatureScheme,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Paper venue tuning knobs.
///
/// `price_drift` is off by default so simulated fills are reproducible; turn
/// it on for demo realism.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub account_id: AccountId,
    pub initial_cash: Decimal,
    pub market_hours_only: bool,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub fill_latency: Duration,
    pub slippage_bps: u32,
    pub partial_fill_probability: f64,
    pub rejection_probability: f64,
    pub price_drift: bool,
    pub webhook_secret: Option<String>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            account_id: AccountId::from("PAPER_ACCOUNT_001"),
            initial_cash: Decimal::new(100_000, 0),
            market_hours_only: true,
            market_open: NaiveTime::from_hms_opt(9, 30, 0).expect("valid market open"),
            market_close: NaiveTime::from_hms_opt(16, 0, 0).expect("valid market close"),
            fill_latency: Duration::from_millis(100),
            slippage_bps: 5,
            partial_fill_probability: 0.0,
            rejection_probability: 0.0,
            price_drift: false,
            webhook_secret: None,
        }
    }
}

#[derive(Debug)]
struct PaperState {
    orders: FnvHashMap<OrderId, Order>,
    positions: FnvHashMap<SmolStr, Position>,
    account: Account,
    fills: Vec<Fill>,
    prices: FnvHashMap<SmolStr, Decimal>,
}

/// Simulated broker venue.
///
/// Fills are produced asynchronously after `fill_latency` and surfaced as
/// lifecycle transition attempts over the channel returned by
/// [`PaperAdapter::new`], so paper orders travel the same reconciliation path
/// as webhook-delivered fills from a real venue.
#[derive(Debug)]
pub struct PaperAdapter {
    core: Arc<AdapterCore>,
    config: PaperConfig,
    state: Arc<Mutex<PaperState>>,
    intents_tx: mpsc::UnboundedSender<TransitionAttempt>,
    connected: AtomicBool,
    venue_sequence: AtomicU64,
}

impl PaperAdapter {
    pub fn new(
        clock: SharedClock,
        ids: Arc<IdGenerator>,
        adapter_config: AdapterConfig,
        config: PaperConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransitionAttempt>) {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let now = clock.now();

        let account = Account {
            id: config.account_id.clone(),
            kind: AccountKind::Margin,
            cash: config.initial_cash,
            buying_power: config.initial_cash * Decimal::TWO,
            equity: config.initial_cash,
            portfolio_value: config.initial_cash,
            long_market_value: Decimal::ZERO,
            short_market_value: Decimal::ZERO,
            day_trade_count: 0,
            restricted: false,
            updated_at: now,
        };

        let adapter = Self {
            core: Arc::new(AdapterCore::new(clock, ids, adapter_config)),
            config,
            state: Arc::new(Mutex::new(PaperState {
                orders: FnvHashMap::default(),
                positions: FnvHashMap::default(),
                account,
                fills: Vec::new(),
                prices: seed_prices(),
            })),
            intents_tx,
            connected: AtomicBool::new(false),
            venue_sequence: AtomicU64::new(0),
        };

        (adapter, intents_rx)
    }

    /// Seed or override the simulated price for a symbol.
    pub fn set_price(&self, symbol: impl Into<SmolStr>, price: Decimal) {
        self.state.lock().prices.insert(symbol.into(), price);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Fills recorded by the venue so far.
    pub fn fills(&self) -> Vec<Fill> {
        self.state.lock().fills.clone()
    }

    fn market_price(&self, symbol: &str) -> Decimal {
        let mut state = self.state.lock();
        let price = *state
            .prices
            .entry(SmolStr::new(symbol))
            .or_insert_with(|| Decimal::new(100, 0));

        if !self.config.price_drift {
            return price;
        }

        let variation = rand::rng().random_range(-0.02..0.02);
        let factor = Decimal::ONE + Decimal::from_f64(variation).unwrap_or(Decimal::ZERO);
        let drifted = (price * factor).round_dp(2);
        state.prices.insert(SmolStr::new(symbol), drifted);
        drifted
    }

    fn market_open_now(&self) -> bool {
        if !self.config.market_hours_only {
            return true;
        }
        let now = self.core.clock.now();
        if now.weekday().number_from_monday() > 5 {
            return false;
        }
        let time = now.time();
        self.config.market_open <= time && time <= self.config.market_close
    }

    fn validate_buying_power(&self, order: &Order) -> Result<(), BrokerError> {
        let state = self.state.lock();
        match order.side {
            Side::Buy => {
                let estimated_price = order
                    .limit_price
                    .unwrap_or_else(|| *state.prices.get(&order.symbol).unwrap_or(&Decimal::new(100, 0)));
                let estimated_value = order.quantity * estimated_price;
                if estimated_value > state.account.buying_power {
                    return Err(BrokerError::InsufficientFunds(format!(
                        "need {estimated_value}, buying power {}",
                        state.account.buying_power
                    )));
                }
            }
            Side::Sell => {
                let held = state
                    .positions
                    .get(&order.symbol)
                    .map(|position| position.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held < order.quantity {
                    return Err(BrokerError::Validation(format!(
                        "insufficient shares to sell: need {}, have {held}",
                        order.quantity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drive the asynchronous fill pipeline for an accepted order.
    fn spawn_fill_pipeline(&self, order: Order) {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        let intents_tx = self.intents_tx.clone();
        let config = self.config.clone();
        let fill_price = self.pipeline_fill_price(&order);

        tokio::spawn(async move {
            tokio::time::sleep(config.fill_latency).await;

            if rand::rng().random_bool(config.rejection_probability.clamp(0.0, 1.0)) {
                apply_status(&state, &order.id, OrderStatus::Rejected, core.clock.now());
                emit(
                    &intents_tx,
                    TransitionAttempt::new(order.id.clone(), OrderStatus::Rejected)
                        .with_ctx(TransitionCtx::reason("simulated venue rejection")),
                );
                return;
            }

            apply_status(&state, &order.id, OrderStatus::Accepted, core.clock.now());
            emit(
                &intents_tx,
                TransitionAttempt::new(order.id.clone(), OrderStatus::Accepted)
                    .with_expected(OrderStatus::Submitted),
            );

            // Limit/stop orders that cannot cross stay working.
            let Some(price) = fill_price else {
                debug!(order_id = %order.id, "paper order working, no crossable price");
                return;
            };

            let remaining = order.remaining_quantity();
            let partial =
                rand::rng().random_bool(config.partial_fill_probability.clamp(0.0, 1.0));

            if partial {
                let fraction = rand::rng().random_range(0.5..0.95);
                let quantity = (remaining
                    * Decimal::from_f64(fraction).unwrap_or(Decimal::new(75, 2)))
                .round_dp(0)
                .max(Decimal::ONE)
                .min(remaining);
                let commission = core.commission(quantity);
                record_fill(core.as_ref(), &state, &order, quantity, price, commission);
                emit(
                    &intents_tx,
                    TransitionAttempt::new(order.id.clone(), OrderStatus::PartiallyFilled).with_ctx(
                        TransitionCtx::fill(quantity, price).with_commission(commission),
                    ),
                );
            } else {
                let commission = core.commission(remaining);
                record_fill(core.as_ref(), &state, &order, remaining, price, commission);
                emit(
                    &intents_tx,
                    TransitionAttempt::new(order.id.clone(), OrderStatus::Filled)
                        .with_ctx(TransitionCtx::fill(remaining, price).with_commission(commission)),
                );
            }
        });
    }

    /// Fill price for the pipeline, or `None` when the order stays working.
    fn pipeline_fill_price(&self, order: &Order) -> Option<Decimal> {
        let market = self.market_price(&order.symbol);
        let slippage =
            Decimal::from(self.config.slippage_bps) / Decimal::new(10_000, 0);

        match order.kind {
            OrderKind::Market => Some(match order.side {
                Side::Buy => market * (Decimal::ONE + slippage),
                Side::Sell => market * (Decimal::ONE - slippage),
            }),
            OrderKind::Limit => {
                let limit = order.limit_price?;
                let crossable = match order.side {
                    Side::Buy => market <= limit,
                    Side::Sell => market >= limit,
                };
                crossable.then_some(limit)
            }
            OrderKind::Stop | OrderKind::StopLimit => {
                let stop = order.stop_price?;
                let triggered = match order.side {
                    Side::Buy => market >= stop,
                    Side::Sell => market <= stop,
                };
                triggered.then_some(market)
            }
            // Trailing stops stay working until the simulated tick stream
            // moves through the trail, which the paper venue does not model.
            OrderKind::TrailingStop => None,
        }
    }
}

fn emit(tx: &mpsc::UnboundedSender<TransitionAttempt>, attempt: TransitionAttempt) {
    if tx.send(attempt).is_err() {
        warn!("paper venue intent receiver dropped");
    }
}

fn apply_status(
    state: &Arc<Mutex<PaperState>>,
    order_id: &OrderId,
    status: OrderStatus,
    now: chrono::DateTime<chrono::Utc>,
) {
    let mut state = state.lock();
    if let Some(order) = state.orders.get_mut(order_id) {
        order.status = status;
        order.updated_at = now;
        if status == OrderStatus::Canceled {
            order.canceled_at = Some(now);
        }
    }
}

/// Record a fill against venue state: order accounting, position, account.
fn record_fill(
    core: &AdapterCore,
    state: &Arc<Mutex<PaperState>>,
    order: &Order,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
) {
    let now = core.clock.now();
    let mut state = state.lock();

    let fill = Fill {
        id: FillId(core.ids.fill_id()),
        order_id: order.id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        quantity,
        price,
        commission,
        time: now,
        venue: Some(SmolStr::new("PAPER_EXCHANGE")),
    };

    if let Some(stored) = state.orders.get_mut(&order.id) {
        let previous_filled = stored.filled_quantity;
        let new_filled = previous_filled + quantity;
        let previous_value =
            stored.average_fill_price.unwrap_or(Decimal::ZERO) * previous_filled;
        stored.average_fill_price = Some((previous_value + price * quantity) / new_filled);
        stored.filled_quantity = new_filled;
        stored.commission += commission;
        stored.updated_at = now;
        stored.status = if stored.filled_quantity >= stored.quantity {
            stored.filled_at = Some(now);
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    update_position(&mut state, order, &fill, now);
    update_account(&mut state, order, &fill, now);
    state.fills.push(fill);
}

fn update_position(
    state: &mut PaperState,
    order: &Order,
    fill: &Fill,
    now: chrono::DateTime<chrono::Utc>,
) {
    let signed_quantity = match order.side {
        Side::Buy => fill.quantity,
        Side::Sell => -fill.quantity,
    };

    match state.positions.get_mut(&order.symbol) {
        None => {
            let position = Position {
                account: order.account.clone(),
                symbol: order.symbol.clone(),
                side: if signed_quantity >= Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                quantity: signed_quantity,
                average_cost: fill.price,
                cost_basis: signed_quantity * fill.price + fill.commission,
                market_value: fill.quantity * fill.price,
                unrealized_pnl: Decimal::ZERO,
                unrealized_pnl_percent: Decimal::ZERO,
                current_price: fill.price,
                updated_at: now,
            };
            state.positions.insert(order.symbol.clone(), position);
        }
        Some(position) => {
            position.quantity += signed_quantity;
            position.cost_basis += signed_quantity * fill.price
                + match order.side {
                    Side::Buy => fill.commission,
                    Side::Sell => -fill.commission,
                };
            if position.quantity.is_zero() {
                state.positions.remove(&order.symbol);
            } else {
                position.average_cost = (position.cost_basis / position.quantity).abs();
                position.side = if position.quantity >= Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                position.mark(fill.price, now);
            }
        }
    }
}

fn update_account(
    state: &mut PaperState,
    order: &Order,
    fill: &Fill,
    now: chrono::DateTime<chrono::Utc>,
) {
    let value = fill.value();
    match order.side {
        Side::Buy => state.account.cash -= value + fill.commission,
        Side::Sell => state.account.cash += value - fill.commission,
    }
    recompute_account(state, now);
}

/// Recompute derived account values from cash and marked positions. Buying
/// power is 2x cash (margin account).
fn recompute_account(state: &mut PaperState, now: chrono::DateTime<chrono::Utc>) {
    let mut long_value = Decimal::ZERO;
    let mut short_value = Decimal::ZERO;

    let prices = state.prices.clone();
    for position in state.positions.values_mut() {
        if let Some(price) = prices.get(&position.symbol) {
            position.mark(*price, now);
        }
        if position.quantity >= Decimal::ZERO {
            long_value += position.market_value;
        } else {
            short_value += position.market_value;
        }
    }

    state.account.long_market_value = long_value;
    state.account.short_market_value = short_value;
    state.account.portfolio_value = state.account.cash + long_value - short_value;
    state.account.equity = state.account.portfolio_value;
    state.account.buying_power = state.account.cash * Decimal::TWO;
    state.account.updated_at = now;
}

fn seed_prices() -> FnvHashMap<SmolStr, Decimal> {
    [
        ("AAPL", Decimal::new(15_000, 2)),
        ("MSFT", Decimal::new(30_000, 2)),
        ("GOOGL", Decimal::new(12_000, 2)),
        ("AMZN", Decimal::new(14_000, 2)),
        ("TSLA", Decimal::new(20_000, 2)),
        ("META", Decimal::new(35_000, 2)),
        ("NVDA", Decimal::new(45_000, 2)),
        ("SPY", Decimal::new(43_000, 2)),
        ("QQQ", Decimal::new(36_000, 2)),
    ]
    .into_iter()
    .map(|(symbol, price)| (SmolStr::new(symbol), price))
    .collect()
}

#[async_trait]
impl BrokerAdapter for PaperAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Paper
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::Release);
        info!(venue = %self.kind(), "connected to paper venue");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::Release);
        info!(venue = %self.kind(), "disconnected from paper venue");
        Ok(())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        Ok(self.market_open_now())
    }

    fn validate(&self, order: &Order) -> Result<(), BrokerError> {
        self.core.validate_order(order)?;
        self.validate_buying_power(order)
    }

    async fn place_order(&self, order: &Order) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        self.core.validate_order(order)?;

        if !order.extended_hours && !self.market_open_now() {
            return Err(BrokerError::Validation(
                "market is closed and extended hours not enabled".into(),
            ));
        }

        self.validate_buying_power(order)?;

        let sequence = self.venue_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.core.clock.now();

        let mut submitted = order.clone();
        submitted.status = OrderStatus::Submitted;
        submitted.submitted_at = Some(now);
        submitted.updated_at = now;
        submitted
            .broker_meta
            .insert(SmolStr::new("venue_order_id"), format_smolstr!("PAPER_{sequence:08}"));
        submitted
            .broker_meta
            .insert(SmolStr::new("paper_trading"), SmolStr::new("true"));

        self.state
            .lock()
            .orders
            .insert(submitted.id.clone(), submitted.clone());
        self.core.invalidate_order(&submitted);

        self.spawn_fill_pipeline(submitted.clone());

        Ok(submitted)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;

        let now = self.core.clock.now();
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))?;

        if order.status.is_terminal() {
            return Err(BrokerError::Validation(format!(
                "cannot cancel order in status {}",
                order.status
            )));
        }

        order.status = OrderStatus::Canceled;
        order.canceled_at = Some(now);
        order.updated_at = now;
        let canceled = order.clone();
        drop(state);

        self.core.invalidate_order(&canceled);
        Ok(canceled)
    }

    async fn modify_order(&self, update: &OrderUpdate) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;

        let now = self.core.clock.now();
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(&update.order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(update.order_id.clone()))?;

        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::Accepted
        ) {
            return Err(BrokerError::Validation(format!(
                "cannot modify order in status {}",
                order.status
            )));
        }

        if let Some(limit_price) = update.limit_price {
            order.limit_price = Some(limit_price);
        }
        if let Some(stop_price) = update.stop_price {
            order.stop_price = Some(stop_price);
        }
        if let Some(quantity) = update.quantity {
            order.quantity = quantity;
        }
        if let Some(time_in_force) = update.time_in_force {
            order.time_in_force = time_in_force;
        }
        order.updated_at = now;

        let modified = order.clone();
        drop(state);

        self.core.invalidate_order(&modified);
        Ok(modified)
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        if let Some(order) = self.core.order_cache.get(order_id) {
            return Ok(order);
        }

        let order = self
            .state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))?;

        self.core.order_cache.insert(order_id.clone(), order.clone());
        Ok(order)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, BrokerError> {
        let state = self.state.lock();
        let mut orders = state
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn get_positions(
        &self,
        account: &AccountId,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, BrokerError> {
        let now = self.core.clock.now();
        let mut state = self.state.lock();

        let prices = state.prices.clone();
        for position in state.positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.mark(*price, now);
            }
        }

        Ok(state
            .positions
            .values()
            .filter(|position| &position.account == account)
            .filter(|position| symbol.is_none_or(|symbol| position.symbol == symbol))
            .cloned()
            .collect())
    }

    async fn get_account(&self, account: &AccountId) -> Result<Account, BrokerError> {
        if let Some(account) = self.core.account_cache.get(account) {
            return Ok(account);
        }

        let now = self.core.clock.now();
        let mut state = self.state.lock();
        recompute_account(&mut state, now);
        let snapshot = state.account.clone();
        drop(state);

        self.core
            .account_cache
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn stream_quotes(
        &self,
        symbols: &[SmolStr],
    ) -> Result<BoxStream<'static, Quote>, BrokerError> {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.core.clock);
        let symbols = symbols.to_vec();

        let stream = futures::stream::unfold(0usize, move |tick| {
            let state = Arc::clone(&state);
            let clock = Arc::clone(&clock);
            let symbols = symbols.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let now = clock.now();
                let quotes = {
                    let state = state.lock();
                    symbols
                        .iter()
                        .filter_map(|symbol| {
                            state.prices.get(symbol).map(|price| {
                                let spread = *price * Decimal::new(1, 4);
                                Quote::new(
                                    symbol.clone(),
                                    *price - spread,
                                    *price + spread,
                                    *price,
                                    now,
                                )
                            })
                        })
                        .collect::<Vec<_>>()
                };
                Some((futures::stream::iter(quotes), tick + 1))
            }
        })
        .flatten();

        Ok(Box::pin(stream))
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::Optional {
            secret: self.config.webhook_secret.clone().unwrap_or_default(),
            production: self.core.config.production,
        }
    }

    fn translate_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<TransitionAttempt>, BrokerError> {
        let webhook: PaperWebhook = serde_json::from_value(payload.clone())
            .map_err(|error| BrokerError::Validation(format!("malformed paper webhook: {error}")))?;

        Ok(webhook
            .events
            .into_iter()
            .map(|event| {
                let mut attempt = TransitionAttempt::new(event.order_id, event.status);
                if let Some(fill) = event.fill {
                    attempt = attempt.with_ctx(
                        TransitionCtx::fill(fill.quantity, fill.price)
                            .with_commission(fill.commission.unwrap_or(Decimal::ZERO)),
                    );
                } else if let Some(reason) = event.reason {
                    attempt = attempt.with_ctx(TransitionCtx::reason(reason));
                }
                attempt
            })
            .collect())
    }
}

/// Paper webhooks carry native statuses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperWebhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<SmolStr>,
    pub events: Vec<PaperWebhookEvent>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperWebhookEvent {
    pub order_id: OrderId,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<PaperWebhookFill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperWebhookFill {
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission: Option<Decimal>,
}
