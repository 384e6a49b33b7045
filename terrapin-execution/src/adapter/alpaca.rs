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
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use terrapin_integration::{clock::SharedClock, id::IdGenerator, signature::SignatureScheme};
use tracing::{debug, warn};

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
}

/// Alpaca-like HTTP venue: bearer-style header pair, JSON bodies, and
/// bidirectional status/TIF/order-type mapping tables.
#[derive(Debug)]
pub struct AlpacaAdapter {
    core: AdapterCore,
    config: AlpacaConfig,
    http: reqwest::Client,
    /// Plane order id -> venue order id, learnt from placements and lookups.
    venue_ids: RwLock<FnvHashMap<OrderId, SmolStr>>,
}

impl AlpacaAdapter {
    pub fn new(
        clock: SharedClock,
        ids: Arc<IdGenerator>,
        adapter_config: AdapterConfig,
        config: AlpacaConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(adapter_config.request_timeout)
            .build()
            .expect("reqwest client construction is infallible with static config");

        Self {
            core: AdapterCore::new(clock, ids, adapter_config),
            config,
            http,
            venue_ids: RwLock::new(FnvHashMap::default()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(KEY_HEADER, &self.config.api_key)
            .header(SECRET_HEADER, &self.config.api_secret)
    }

    async fn execute<T>(&self, builder: reqwest::RequestBuilder) -> Result<T, BrokerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = builder.send().await.map_err(BrokerError::from)?;
        let status = response.status();
        let body = response.bytes().await.map_err(BrokerError::from)?;

        if status.is_success() {
            serde_json::from_slice(&body).map_err(|error| {
                BrokerError::Internal(format!("malformed venue response: {error}"))
            })
        } else {
            Err(parse_venue_error(status, &body))
        }
    }

    fn venue_order_id(&self, order_id: &OrderId) -> Result<SmolStr, BrokerError> {
        self.venue_ids
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.clone()))
    }

    fn remember_order(&self, order: &Order, venue: &VenueOrder) {
        self.venue_ids
            .write()
            .insert(order.id.clone(), venue.id.clone());
    }

    /// Overlay the venue's view onto the plane order.
    fn merge_venue_order(&self, mut order: Order, venue: &VenueOrder) -> Order {
        if let Some(status) = status_from_venue(&venue.status) {
            order.status = status;
        } else {
            warn!(venue_status = %venue.status, "unmapped venue order status");
        }
        order.filled_quantity = venue.filled_qty.unwrap_or(order.filled_quantity);
        order.average_fill_price = venue.filled_avg_price.or(order.average_fill_price);
        order.submitted_at = venue.submitted_at.or(order.submitted_at);
        order.filled_at = venue.filled_at.or(order.filled_at);
        order.canceled_at = venue.canceled_at.or(order.canceled_at);
        order.updated_at = venue.updated_at.unwrap_or_else(|| self.core.clock.now());
        order
            .broker_meta
            .insert(SmolStr::new("venue_order_id"), venue.id.clone());
        order
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaAdapter {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Alpaca
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        // Credential check: an authenticated account fetch.
        let request = self.authed(self.http.get(self.url("/v2/account")));
        let _: VenueAccount = self.execute(request).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        let request = self.authed(self.http.get(self.url("/v2/clock")));
        let clock: VenueClock = self.execute(request).await?;
        Ok(clock.is_open)
    }

    fn validate(&self, order: &Order) -> Result<(), BrokerError> {
        self.core.validate_order(order)
    }

    async fn place_order(&self, order: &Order) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        self.core.validate_order(order)?;

        let body = PlaceOrderBody::from_order(order);
        let venue: VenueOrder = self
            .core
            .with_retry(|| {
                let request = self
                    .authed(self.http.post(self.url("/v2/orders")))
                    .json(&body);
                self.execute(request)
            })
            .await?;

        self.remember_order(order, &venue);
        self.core.invalidate_order(order);

        let mut placed = self.merge_venue_order(order.clone(), &venue);
        if placed.status == OrderStatus::Pending {
            placed.status = OrderStatus::Submitted;
        }
        if placed.submitted_at.is_none() {
            placed.submitted_at = Some(self.core.clock.now());
        }
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        let venue_id = self.venue_order_id(order_id)?;

        let request = self.authed(
            self.http
                .delete(self.url(&format!("/v2/orders/{venue_id}"))),
        );
        let response = request.send().await.map_err(BrokerError::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(parse_venue_error(status, &body));
        }

        let order = self.get_order(order_id).await?;
        self.core.invalidate_order(&order);
        Ok(order)
    }

    async fn modify_order(&self, update: &OrderUpdate) -> Result<Order, BrokerError> {
        self.core.check_rate_limit()?;
        let venue_id = self.venue_order_id(&update.order_id)?;

        let body = PatchOrderBody::from_update(update);
        let _: VenueOrder = self
            .execute(
                self.authed(
                    self.http
                        .patch(self.url(&format!("/v2/orders/{venue_id}"))),
                )
                .json(&body),
            )
            .await?;

        let order = self.get_order(&update.order_id).await?;
        self.core.invalidate_order(&order);
        Ok(order)
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, BrokerError> {
        if let Some(order) = self.core.order_cache.get(order_id) {
            return Ok(order);
        }

        // Orders are placed with the plane id as the venue client order id,
        // so lookups work even before the venue id is learnt.
        let request = self.authed(
            self.http
                .get(self.url("/v2/orders:by_client_order_id"))
                .query(&[("client_order_id", order_id.as_str())]),
        );
        let venue: VenueOrder = self.execute(request).await?;

        let order = venue.to_order(order_id.clone());
        self.venue_ids
            .write()
            .insert(order_id.clone(), venue.id.clone());
        self.core.order_cache.insert(order_id.clone(), order.clone());
        Ok(order)
    }

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, BrokerError> {
        self.core.check_rate_limit()?;

        let mut query: Vec<(&str, String)> = vec![("status", "all".into())];
        if let Some(symbol) = &filter.symbol {
            query.push(("symbols", symbol.to_string()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }

        let request = self.authed(self.http.get(self.url("/v2/orders")).query(&query));
        let venue_orders: Vec<VenueOrder> = self.execute(request).await?;

        Ok(venue_orders
            .into_iter()
            .map(|venue| {
                let plane_id = venue
                    .client_order_id
                    .clone()
                    .map(OrderId)
                    .unwrap_or_else(|| OrderId(venue.id.clone()));
                venue.to_order(plane_id)
            })
            .filter(|order| filter.matches(order))
            .collect())
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

        let request = self.authed(self.http.get(self.url("/v2/positions")));
        let venue_positions: Vec<VenuePosition> = self.execute(request).await?;

        let positions = venue_positions
            .into_iter()
            .map(|position| position.to_position(account.clone(), self.core.clock.now()))
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
        let request = self.authed(self.http.get(self.url("/v2/account")));
        let venue: VenueAccount = self.execute(request).await?;

        let account = venue.to_account(self.core.clock.now());
        self.core
            .account_cache
            .insert(account.id.clone(), account.clone());
        Ok(account)
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::HmacSha256 {
            secret: self.config.webhook_secret.clone(),
        }
    }

    fn translate_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<TransitionAttempt>, BrokerError> {
        let update: VenueTradeUpdate = serde_json::from_value(payload.clone())
            .map_err(|error| BrokerError::Validation(format!("malformed venue webhook: {error}")))?;

        let order_id = update
            .order
            .client_order_id
            .clone()
            .map(OrderId)
            .unwrap_or_else(|| OrderId(update.order.id.clone()));

        let target = match event_status(&update.event, &update.order.status) {
            Some(status) => status,
            None => {
                debug!(event = %update.event, "venue webhook event carries no status change");
                return Ok(Vec::new());
            }
        };

        let mut attempt = TransitionAttempt::new(order_id, target);
        if matches!(
            target,
            OrderStatus::PartiallyFilled | OrderStatus::Filled
        ) && let (Some(quantity), Some(price)) = (update.qty, update.price)
        {
            attempt = attempt.with_ctx(TransitionCtx::fill(quantity, price));
        }

        Ok(vec![attempt])
    }
}

/// Venue order status -> normalised [`OrderStatus`].
fn status_from_venue(status: &str) -> Option<OrderStatus> {
    match status {
        "new" | "pending_new" => Some(OrderStatus::Submitted),
        "accepted" => Some(OrderStatus::Accepted),
        "partial_fill" | "partially_filled" => Some(OrderStatus::PartiallyFilled),
        "filled" => Some(OrderStatus::Filled),
        "canceled" | "pending_cancel" => Some(OrderStatus::Canceled),
        "rejected" => Some(OrderStatus::Rejected),
        "done_for_day" | "expired" => Some(OrderStatus::Expired),
        _ => None,
    }
}

/// Webhook event name -> normalised status, falling back to the embedded
/// order status for plain `order_update`s.
fn event_status(event: &str, order_status: &str) -> Option<OrderStatus> {
    match event {
        "new" => Some(OrderStatus::Submitted),
        "accepted" => Some(OrderStatus::Accepted),
        "partial_fill" => Some(OrderStatus::PartiallyFilled),
        "fill" => Some(OrderStatus::Filled),
        "canceled" => Some(OrderStatus::Canceled),
        "rejected" => Some(OrderStatus::Rejected),
        "expired" | "done_for_day" => Some(OrderStatus::Expired),
        _ => status_from_venue(order_status),
    }
}

fn kind_to_venue(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "market",
        OrderKind::Limit => "limit",
        OrderKind::Stop => "stop",
        OrderKind::StopLimit => "stop_limit",
        OrderKind::TrailingStop => "trailing_stop",
    }
}

fn kind_from_venue(kind: &str) -> OrderKind {
    match kind {
        "limit" => OrderKind::Limit,
        "stop" => OrderKind::Stop,
        "stop_limit" => OrderKind::StopLimit,
        "trailing_stop" => OrderKind::TrailingStop,
        _ => OrderKind::Market,
    }
}

fn tif_to_venue(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "day",
        TimeInForce::GoodTilCanceled => "gtc",
        TimeInForce::ImmediateOrCancel => "ioc",
        TimeInForce::FillOrKill => "fok",
    }
}

fn tif_from_venue(tif: &str) -> TimeInForce {
    match tif {
        "gtc" => TimeInForce::GoodTilCanceled,
        "ioc" => TimeInForce::ImmediateOrCancel,
        "fok" => TimeInForce::FillOrKill,
        _ => TimeInForce::Day,
    }
}

fn parse_venue_error(status: reqwest::StatusCode, body: &[u8]) -> BrokerError {
    let message = serde_json::from_slice::<VenueError>(body)
        .map(|error| error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

    match status.as_u16() {
        401 | 403 if message.to_lowercase().contains("insufficient") => {
            BrokerError::InsufficientFunds(message)
        }
        401 | 403 => BrokerError::Authentication(message),
        404 => BrokerError::OrderNotFound(OrderId::from("unknown")),
        422 => BrokerError::Validation(message),
        429 => BrokerError::RateLimit,
        status if status >= 500 => BrokerError::Connection(message),
        _ => BrokerError::Internal(message),
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody {
    symbol: SmolStr,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail_percent: Option<String>,
    extended_hours: bool,
    client_order_id: String,
}

impl PlaceOrderBody {
    fn from_order(order: &Order) -> Self {
        Self {
            symbol: order.symbol.clone(),
            qty: order.quantity.to_string(),
            side: match order.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            },
            kind: kind_to_venue(order.kind),
            time_in_force: tif_to_venue(order.time_in_force),
            limit_price: order.limit_price.map(|price| price.to_string()),
            stop_price: order.stop_price.map(|price| price.to_string()),
            trail_price: order.trail_amount.map(|amount| amount.to_string()),
            trail_percent: order.trail_percent.map(|percent| percent.to_string()),
            extended_hours: order.extended_hours,
            client_order_id: order.id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PatchOrderBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_in_force: Option<&'static str>,
}

impl PatchOrderBody {
    fn from_update(update: &OrderUpdate) -> Self {
        Self {
            qty: update.quantity.map(|quantity| quantity.to_string()),
            limit_price: update.limit_price.map(|price| price.to_string()),
            stop_price: update.stop_price.map(|price| price.to_string()),
            time_in_force: update.time_in_force.map(tif_to_venue),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct VenueOrder {
    id: SmolStr,
    #[serde(default)]
    client_order_id: Option<SmolStr>,
    symbol: SmolStr,
    side: SmolStr,
    #[serde(rename = "type")]
    kind: SmolStr,
    time_in_force: SmolStr,
    status: SmolStr,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    filled_qty: Option<Decimal>,
    #[serde(default)]
    filled_avg_price: Option<Decimal>,
    #[serde(default)]
    limit_price: Option<Decimal>,
    #[serde(default)]
    stop_price: Option<Decimal>,
    #[serde(default)]
    extended_hours: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    filled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    canceled_at: Option<DateTime<Utc>>,
}

impl VenueOrder {
    fn to_order(&self, plane_id: OrderId) -> Order {
        let created_at = self.created_at.unwrap_or_default();
        let mut broker_meta = FnvHashMap::default();
        broker_meta.insert(SmolStr::new("venue_order_id"), self.id.clone());

        Order {
            id: plane_id,
            client_order_id: self.client_order_id.clone().map(Into::into),
            account: AccountId::from("alpaca"),
            symbol: self.symbol.clone(),
            side: if self.side == "sell" {
                Side::Sell
            } else {
                Side::Buy
            },
            quantity: self.qty.unwrap_or(Decimal::ZERO),
            kind: kind_from_venue(&self.kind),
            time_in_force: tif_from_venue(&self.time_in_force),
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            trail_amount: None,
            trail_percent: None,
            extended_hours: self.extended_hours,
            status: status_from_venue(&self.status).unwrap_or(OrderStatus::Pending),
            filled_quantity: self.filled_qty.unwrap_or(Decimal::ZERO),
            average_fill_price: self.filled_avg_price,
            commission: Decimal::ZERO,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            submitted_at: self.submitted_at,
            filled_at: self.filled_at,
            canceled_at: self.canceled_at,
            broker_meta,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VenuePosition {
    symbol: SmolStr,
    qty: Decimal,
    side: SmolStr,
    avg_entry_price: Decimal,
    market_value: Decimal,
    cost_basis: Decimal,
    unrealized_pl: Decimal,
    unrealized_plpc: Decimal,
    current_price: Decimal,
}

impl VenuePosition {
    fn to_position(&self, account: AccountId, now: DateTime<Utc>) -> Position {
        Position {
            account,
            symbol: self.symbol.clone(),
            side: if self.side == "short" {
                PositionSide::Short
            } else {
                PositionSide::Long
            },
            quantity: self.qty,
            average_cost: self.avg_entry_price,
            cost_basis: self.cost_basis,
            market_value: self.market_value,
            unrealized_pnl: self.unrealized_pl,
            unrealized_pnl_percent: self.unrealized_plpc * Decimal::ONE_HUNDRED,
            current_price: self.current_price,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VenueAccount {
    id: SmolStr,
    cash: Decimal,
    buying_power: Decimal,
    equity: Decimal,
    portfolio_value: Decimal,
    #[serde(default)]
    long_market_value: Option<Decimal>,
    #[serde(default)]
    short_market_value: Option<Decimal>,
    #[serde(default)]
    daytrade_count: u32,
    #[serde(default)]
    trading_blocked: bool,
}

impl VenueAccount {
    fn to_account(&self, now: DateTime<Utc>) -> Account {
        Account {
            id: AccountId(self.id.clone()),
            kind: AccountKind::Margin,
            cash: self.cash,
            buying_power: self.buying_power,
            equity: self.equity,
            portfolio_value: self.portfolio_value,
            long_market_value: self.long_market_value.unwrap_or(Decimal::ZERO),
            short_market_value: self.short_market_value.unwrap_or(Decimal::ZERO),
            day_trade_count: self.daytrade_count,
            restricted: self.trading_blocked,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VenueClock {
    is_open: bool,
}

#[derive(Debug, Deserialize)]
struct VenueError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct VenueTradeUpdate {
    event: SmolStr,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    order: VenueOrder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use terrapin_integration::clock::LiveClock;

    fn adapter() -> AlpacaAdapter {
        let clock = LiveClock::shared();
        let ids = Arc::new(IdGenerator::new(Arc::clone(&clock)));
        AlpacaAdapter::new(
            clock,
            ids,
            AdapterConfig::default(),
            AlpacaConfig {
                base_url: "https://paper-api.example.test".into(),
                api_key: "key".into(),
                api_secret: "secret".into(),
                webhook_secret: "hook-secret".into(),
            },
        )
    }

    #[test]
    fn test_status_map_round_trip() {
        #[derive(Debug)]
        struct TestCase {
            venue: &'static str,
            expected: OrderStatus,
        }

        let cases = vec![
            TestCase { venue: "new", expected: OrderStatus::Submitted },
            TestCase { venue: "accepted", expected: OrderStatus::Accepted },
            TestCase { venue: "partial_fill", expected: OrderStatus::PartiallyFilled },
            TestCase { venue: "partially_filled", expected: OrderStatus::PartiallyFilled },
            TestCase { venue: "filled", expected: OrderStatus::Filled },
            TestCase { venue: "canceled", expected: OrderStatus::Canceled },
            TestCase { venue: "rejected", expected: OrderStatus::Rejected },
            TestCase { venue: "done_for_day", expected: OrderStatus::Expired },
        ];

        for (index, test) in cases.iter().enumerate() {
            assert_eq!(
                status_from_venue(test.venue),
                Some(test.expected),
                "TC{index} ({})",
                test.venue
            );
        }

        assert_eq!(status_from_venue("held"), None);
    }

    #[test]
    fn test_tif_and_kind_tables_bidirectional() {
        for tif in [
            TimeInForce::Day,
            TimeInForce::GoodTilCanceled,
            TimeInForce::ImmediateOrCancel,
            TimeInForce::FillOrKill,
        ] {
            assert_eq!(tif_from_venue(tif_to_venue(tif)), tif);
        }

        for kind in [
            OrderKind::Market,
            OrderKind::Limit,
            OrderKind::Stop,
            OrderKind::StopLimit,
            OrderKind::TrailingStop,
        ] {
            assert_eq!(kind_from_venue(kind_to_venue(kind)), kind);
        }
    }

    #[test]
    fn test_translate_webhook_fill_event() {
        let adapter = adapter();
        let payload = serde_json::json!({
            "event": "partial_fill",
            "qty": "3",
            "price": "10.00",
            "order": {
                "id": "venue-1",
                "client_order_id": "ord_1",
                "symbol": "AAPL",
                "side": "buy",
                "type": "market",
                "time_in_force": "day",
                "status": "partially_filled"
            }
        });

        let attempts = adapter.translate_webhook(&payload).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].order_id, OrderId::from("ord_1"));
        assert_eq!(attempts[0].target, OrderStatus::PartiallyFilled);
        assert_eq!(attempts[0].ctx.fill_quantity, Some(dec!(3)));
        assert_eq!(attempts[0].ctx.fill_price, Some(dec!(10.00)));
    }

    #[test]
    fn test_translate_webhook_rejects_malformed_payload() {
        let adapter = adapter();
        let payload = serde_json::json!({"unexpected": true});
        assert!(matches!(
            adapter.translate_webhook(&payload),
            Err(BrokerError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_venue_error_taxonomy() {
        let body = br#"{"message": "insufficient buying power"}"#;
        assert!(matches!(
            parse_venue_error(reqwest::StatusCode::FORBIDDEN, body),
            BrokerError::InsufficientFunds(_)
        ));

        let body = br#"{"message": "unauthorized"}"#;
        assert!(matches!(
            parse_venue_error(reqwest::StatusCode::UNAUTHORIZED, body),
            BrokerError::Authentication(_)
        ));

        let body = br#"{"message": "qty must be > 0"}"#;
        assert!(matches!(
            parse_venue_error(reqwest::StatusCode::UNPROCESSABLE_ENTITY, body),
            BrokerError::Validation(_)
        ));

        assert!(matches!(
            parse_venue_error(reqwest::StatusCode::TOO_MANY_REQUESTS, b""),
            BrokerError::RateLimit
        ));

        assert!(matches!(
            parse_venue_error(reqwest::StatusCode::BAD_GATEWAY, b""),
            BrokerError::Connection(_)
        ));
    }

    #[test]
    fn test_place_order_body_wire_shape() {
        let order = Order::from_request(
            OrderId::from("ord_1"),
            AccountId::from("acct_1"),
            &crate::model::OrderRequest {
                symbol: "AAPL".into(),
                side: Side::Buy,
                quantity: dec!(10),
                kind: OrderKind::Limit,
                time_in_force: TimeInForce::GoodTilCanceled,
                limit_price: Some(dec!(150.25)),
                stop_price: None,
                trail_amount: None,
                trail_percent: None,
                extended_hours: false,
                client_order_id: None,
            },
            Utc::now(),
        );

        let body = serde_json::to_value(PlaceOrderBody::from_order(&order)).unwrap();
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["qty"], "10");
        assert_eq!(body["type"], "limit");
        assert_eq!(body["time_in_force"], "gtc");
        assert_eq!(body["limit_price"], "150.25");
        assert_eq!(body["client_order_id"], "ord_1");
        assert!(body.get("stop_price").is_none());
    }
}
