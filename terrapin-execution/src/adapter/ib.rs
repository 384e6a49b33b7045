use crate::{
    BrokerKind,
    adapter::{AdapterConfig, AdapterCore, BrokerAdapter},
    error::BrokerError,
    lifecycle::{TransitionAttempt, TransitionCtx},
    model::{
        Account, Order, OrderFilter, OrderKind, OrderStatus, OrderUpdate, Position, Side,
        TimeInForce,
        account::AccountKind,
        id::{AccountId, OrderId},
        position::PositionSide,
    },
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};
use terrapin_integration::{
    clock::SharedClock,
    id::IdGenerator,
    signature::{SignatureScheme, Verifier},
};
use tracing::{debug, warn};

/// Persistent session to the local IB-style gateway.
///
/// The gateway mints numeric order ids; the adapter owns the mapping to
/// normalised plane ids. Re-placing with an existing gateway id modifies the
/// working order, which is how the venue expresses order modification.
#[async_trait]
pub trait IbGateway: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Place (no id) or modify (existing id) an order. Returns the gateway
    /// order id.
    async fn place_order(
        &self,
        gateway_id: Option<i64>,
        order: GatewayOrder,
    ) -> Result<i64, BrokerError>;

    async fn cancel_order(&self, gateway_id: i64) -> Result<(), BrokerError>;

    async fn order_status(&self, gateway_id: i64) -> Result<GatewayOrderStatus, BrokerError>;

    async fn positions(&self, account: &str) -> Result<Vec<GatewayPosition>, BrokerError>;

    async fn account_summary(&self, account: &str) -> Result<GatewayAccountSummary, BrokerError>;

    /// Start a market-data subscription tracked by `req_id`.
    async fn subscribe_market_data(&self, req_id: i64, symbol: &str) -> Result<(), BrokerError>;

    async fn unsubscribe_market_data(&self, req_id: i64) -> Result<(), BrokerError>;

    async fn market_open(&self) -> Result<bool, BrokerError>;
}

/// Venue-facing order payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub symbol: SmolStr,
    pub action: &'static str,
    pub quantity: Decimal,
    pub order_type: &'static str,
    pub limit_price: Option<Decimal>,
    pub aux_price: Option<Decimal>,
    pub tif: &'static str,
    pub account: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrderStatus {
    pub status: SmolStr,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average_fill_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPosition {
    pub symbol: SmolStr,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAccountSummary {
    pub account: SmolStr,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub net_liquidation: Decimal,
    pub gross_position_value: Decimal,
}

/// IB-like venue driven through an injected [`IbGateway`] session.
pub struct IbAdapter {
    core: AdapterCore,
    gateway: Arc<dyn IbGateway>,
    webhook_verifier: Option<Arc<dyn Verifier>>,
    /// Plane id <-> gateway numeric id, both directions.
    gateway_ids: RwLock<FnvHashMap<OrderId, i64>>,
    plane_ids: RwLock<FnvHashMap<i64, OrderId>>,
    /// Working orders by plane id, refreshed from gateway status polls.
    orders: RwLock<FnvHashMap<OrderId, Order>>,
    /// Market-data subscriptions tracked by request id.
    subscriptions: RwLock<FnvHashMap<i64, SmolStr>>,
    req_id_sequence: AtomicI64,
}

impl std::fmt::Debug for IbAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbAdapter")
            .field("orders", &self.orders.read().len())
            .field("subscriptions", &self.subscriptions.read().len())
            .finish_non_exhaustive()
    }
}

impl IbAdapter {
    pub fn new(
        clock: SharedClock,
        ids: Arc<IdGenerator>,
        adapter_config: AdapterConfig,
        gateway: Arc<dyn IbGateway>,
        webhook_verifier: Option<Arc<dyn Verifier>>,
    ) -> Self {
        Self {
            core: AdapterCore::new(clock, ids, adapter_config),
            gateway,
            webhook_verifier,
            gateway_ids: RwLock::new(FnvHashMap::default()),
            plane_ids: RwLock::new(FnvHashMap::default()),
            orders: RwLock::new(FnvHashMap::default()),
            subscriptions: RwLock::new(FnvHashMap::default()),
            req_id_sequence: AtomicI64::new(1),
        }
    }

    fn next_req_id(&self) -> i64 {
        self.req_id_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Begin a market-data subscription, returning its request id.
    pub async fn subscribe_symbol(&self, symbol: &str) -> Result<i64, BrokerError> {
        let req_id = self.next_req_id();
        self.gateway.subscribe_market_data(req_id, symbol).await?;
        self.subscriptions
            .write()
            .insert(req_id, SmolStr::new(symbol));
        Ok(req_id)
    }

    pub async fn unsubscribe_symbol(&self, req_id: i64) -> Result<(), BrokerError> {
        self.gateway.unsubscribe_market_data(req_id).await?;
        self.subscriptions.write().remove(&req_id);
        Ok(())
    }

    fn gateway_id(&self, order_id: &OrderId) -> Result<i64, BrokerError> {
        self.gateway_ids
            .read()
            .get(order_id)
            .copied()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))
    }

    fn link_ids(&self, order_id: &OrderId, gateway_id: i64) {
        self.gateway_ids
            .write()
            .insert(order_id.clone(), gateway_id);
        self.plane_ids.write().insert(gateway_id, order_id.clone());
    }

    fn refresh_from_status(&self, order: &mut Order, status: &GatewayOrderStatus) {
        if let Some(mapped) = status_from_gateway(&status.status) {
            order.status = mapped;
        } else {
            warn!(gateway_status = %status.status, "unmapped gateway order status");
        }
        order.filled_quantity = status.filled;
        if status.average_fill_price.is_some() {
            order.average_fill_price = status.average_fill_price;
        }
        order.updated_at = self.core.clock.now();
    }
}

#[async_trait]
impl BrokerAdapter for IbAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Ib
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.core
            .with_retry(|| self.gateway.connect())
            .await
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let req_ids = self.subscriptions.read().keys().copied().collect::<Vec<_>>();
        for req_id in req_ids {
            if let Err(error) = self.unsubscribe_symbol(req_id).await {
                warn!(req_id, ?error, "failed to tear down market-data subscription");
            }
        }
        self.gateway.disconnect().await
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        self.gateway.market_open().await
    }

    fn validate(&self, order: &Order) -> Result<(), BrokerError> {
        self.core.validate_order(order)
    }

    async fn place_order(&self, order: &Order) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        self.core.validate_order(order)?;

        let gateway_order = to_gateway_order(order);
        let gateway_id = self
            .core
            .with_retry(|| self.gateway.place_order(None, gateway_order.clone()))
            .await?;

        self.link_ids(&order.id, gateway_id);

        let now = self.core.clock.now();
        let mut placed = order.clone();
        placed.status = OrderStatus::Submitted;
        placed.submitted_at = Some(now);
        placed.updated_at = now;
        placed.broker_meta.insert(
            SmolStr::new("gateway_order_id"),
            SmolStr::new(gateway_id.to_string()),
        );

        self.orders.write().insert(order.id.clone(), placed.clone());
        self.core.invalidate_order(&placed);

        debug!(order_id = %order.id, gateway_id, "placed order at gateway");
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        let gateway_id = self.gateway_id(order_id)?;

        self.core
            .with_retry(|| self.gateway.cancel_order(gateway_id))
            .await?;

        let now = self.core.clock.now();
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))?;
        order.status = OrderStatus::Canceled;
        order.canceled_at = Some(now);
        order.updated_at = now;
        let canceled = order.clone();
        drop(orders);

        self.core.invalidate_order(&canceled);
        Ok(canceled)
    }

    async fn modify_order(&self, update: &OrderUpdate) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        let gateway_id = self.gateway_id(&update.order_id)?;

        let mut modified = self
            .orders
            .read()
            .get(&update.order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(update.order_id.clone()))?;

        if let Some(limit_price) = update.limit_price {
            modified.limit_price = Some(limit_price);
        }
        if let Some(stop_price) = update.stop_price {
            modified.stop_price = Some(stop_price);
        }
        if let Some(quantity) = update.quantity {
            modified.quantity = quantity;
        }
        if let Some(time_in_force) = update.time_in_force {
            modified.time_in_force = time_in_force;
        }
        modified.updated_at = self.core.clock.now();

        // Same gateway id: the venue treats this as an order replacement.
        let gateway_order = to_gateway_order(&modified);
        self.core
            .with_retry(|| self.gateway.place_order(Some(gateway_id), gateway_order.clone()))
            .await?;

        self.orders
            .write()
            .insert(modified.id.clone(), modified.clone());
        self.core.invalidate_order(&modified);
        Ok(modified)
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        if let Some(order) = self.core.order_cache.get(order_id) {
            return Ok(order);
        }

        let gateway_id = self.gateway_id(order_id)?;
        let status = self.gateway.order_status(gateway_id).await?;

        let mut orders = self.orders.write();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))?;
        self.refresh_from_status(order, &status);
        let refreshed = order.clone();
        drop(orders);

        self.core
            .order_cache
            .insert(order_id.clone(), refreshed.clone());
        Ok(refreshed)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, BrokerError> {
        let mut orders = self
            .orders
            .read()
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
        if let Some(symbol) = symbol
            && let Some(position) = self.core.position_cache.get(symbol)
        {
            return Ok(vec![position]);
        }

        self.core.check_rate_limit()?;
        let now = self.core.clock.now();

        let gateway_positions = self
            .core
            .with_retry(|| self.gateway.positions(account.as_str()))
            .await?;

        let positions = gateway_positions
            .into_iter()
            .map(|position| {
                let cost_basis = position.quantity * position.average_cost;
                Position {
                    account: account.clone(),
                    symbol: position.symbol,
                    side: if position.quantity >= Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    quantity: position.quantity,
                    average_cost: position.average_cost,
                    cost_basis,
                    market_value: position.market_value,
                    unrealized_pnl: position.unrealized_pnl,
                    unrealized_pnl_percent: if cost_basis.is_zero() {
                        Decimal::ZERO
                    } else {
                        position.unrealized_pnl / cost_basis.abs() * Decimal::ONE_HUNDRED
                    },
                    current_price: position.market_price,
                    updated_at: now,
                }
            })
            .collect::<Vec<_>>();

        for position in &positions {
            self.core
                .position_cache
                .insert(position.symbol.clone(), position.clone());
        }

        Ok(positions
            .into_iter()
            .filter(|position| symbol.is_none_or(|symbol| position.symbol == symbol))
            .collect())
    }

    async fn get_account(&self, account: &AccountId) -> Result<Account, BrokerError> {
        if let Some(account) = self.core.account_cache.get(account) {
            return Ok(account);
        }

        self.core.check_rate_limit()?;
        let summary = self
            .core
            .with_retry(|| self.gateway.account_summary(account.as_str()))
            .await?;

        let account = Account {
            id: AccountId(summary.account.clone()),
            kind: AccountKind::Margin,
            cash: summary.cash,
            buying_power: summary.buying_power,
            equity: summary.net_liquidation,
            portfolio_value: summary.net_liquidation,
            long_market_value: summary.gross_position_value.max(Decimal::ZERO),
            short_market_value: Decimal::ZERO,
            day_trade_count: 0,
            restricted: false,
            updated_at: self.core.clock.now(),
        };

        self.core
            .account_cache
            .insert(account.id.clone(), account.clone());
        Ok(account)
    }

    fn signature_scheme(&self) -> SignatureScheme {
        // Vendor signature scheme is unpublished: pluggable, rejecting when
        // nothing is configured.
        match &self.webhook_verifier {
            Some(verifier) => SignatureScheme::Pluggable(Arc::clone(verifier)),
            None => SignatureScheme::Unconfigured,
        }
    }

    fn translate_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<TransitionAttempt>, BrokerError> {
        let update: GatewayWebhook = serde_json::from_value(payload.clone())
            .map_err(|error| BrokerError::Validation(format!("malformed gateway webhook: {error}")))?;

        let Some(order_id) = self.plane_ids.read().get(&update.order_id).cloned() else {
            warn!(gateway_id = update.order_id, "webhook for unknown gateway order");
            return Ok(Vec::new());
        };

        let Some(target) = status_from_gateway(&update.status) else {
            debug!(status = %update.status, "unmapped gateway webhook status");
            return Ok(Vec::new());
        };

        let mut attempt = TransitionAttempt::new(order_id, target);
        if matches!(target, OrderStatus::PartiallyFilled | OrderStatus::Filled)
            && let (Some(quantity), Some(price)) = (update.last_fill_quantity, update.last_fill_price)
        {
            attempt = attempt.with_ctx(TransitionCtx::fill(quantity, price));
        }

        Ok(vec![attempt])
    }
}

fn to_gateway_order(order: &Order) -> GatewayOrder {
    GatewayOrder {
        symbol: order.symbol.clone(),
        action: match order.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        },
        quantity: order.quantity,
        order_type: match order.kind {
            OrderKind::Market => "MKT",
            OrderKind::Limit => "LMT",
            OrderKind::Stop => "STP",
            OrderKind::StopLimit => "STP LMT",
            OrderKind::TrailingStop => "TRAIL",
        },
        limit_price: order.limit_price,
        aux_price: order.stop_price.or(order.trail_amount),
        tif: match order.time_in_force {
            TimeInForce::Day => "DAY",
            TimeInForce::GoodTilCanceled => "GTC",
            TimeInForce::ImmediateOrCancel => "IOC",
            TimeInForce::FillOrKill => "FOK",
        },
        account: SmolStr::new(order.account.as_str()),
    }
}

/// Gateway status strings normalised to [`OrderStatus`]. Both `cancelled`
/// spellings map to `Canceled`.
fn status_from_gateway(status: &str) -> Option<OrderStatus> {
    match status.to_ascii_lowercase().as_str() {
        "pendingsubmit" => Some(OrderStatus::Pending),
        "presubmitted" | "submitted" => Some(OrderStatus::Submitted),
        "accepted" => Some(OrderStatus::Accepted),
        "partiallyfilled" | "partially_filled" => Some(OrderStatus::PartiallyFilled),
        "filled" => Some(OrderStatus::Filled),
        "cancelled" | "canceled" | "apicancelled" | "apicanceled" => Some(OrderStatus::Canceled),
        "inactive" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct GatewayWebhook {
    order_id: i64,
    status: SmolStr,
    #[serde(default)]
    last_fill_quantity: Option<Decimal>,
    #[serde(default)]
    last_fill_price: Option<Decimal>,
}
