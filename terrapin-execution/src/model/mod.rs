use crate::model::id::{AccountId, ClientOrderId, OrderId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// `Order`, `Fill`, `Event` and `Account` identifiers.
pub mod id;

/// Execution fills.
pub mod fill;

/// Broker-maintained positions.
pub mod position;
pub use position::Position;

/// Broker-authoritative account state.
pub mod account;
pub use account::Account;

/// Order lifecycle events.
pub mod event;

/// Streaming quotes.
pub mod quote;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    #[serde(rename = "gtc")]
    #[display("gtc")]
    GoodTilCanceled,
    #[serde(rename = "ioc")]
    #[display("ioc")]
    ImmediateOrCancel,
    #[serde(rename = "fok")]
    #[display("fok")]
    FillOrKill,
}

/// Normalised order status.
///
/// `Filled`, `Canceled`, `Rejected` and `Expired` are terminal: the lifecycle
/// declares no transition out of them.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// States a fill may legally land in.
    pub fn is_fillable(&self) -> bool {
        matches!(self, Self::Accepted | Self::PartiallyFilled)
    }
}

/// Client intent to buy or sell, before the order plane assigns identity and
/// lifecycle state.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderRequest {
    pub symbol: SmolStr,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
    #[serde(default = "TimeInForce::default_day")]
    pub time_in_force: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trail_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trail_percent: Option<Decimal>,
    #[serde(default)]
    pub extended_hours: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
}

impl TimeInForce {
    fn default_day() -> Self {
        Self::Day
    }
}

/// Normalised order: the client intent plus lifecycle state, fill accounting
/// and broker metadata. Mutated only by the lifecycle.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
    pub account: AccountId,
    pub symbol: SmolStr,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trail_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trail_percent: Option<Decimal>,
    #[serde(default)]
    pub extended_hours: bool,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Decimal>,
    pub commission: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub broker_meta: FnvHashMap<SmolStr, SmolStr>,
}

impl Order {
    /// Build a `Pending` order from a client request.
    pub fn from_request(
        id: OrderId,
        account: AccountId,
        request: &OrderRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_order_id: request.client_order_id.clone(),
            account,
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            kind: request.kind,
            time_in_force: request.time_in_force,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            trail_amount: request.trail_amount,
            trail_percent: request.trail_percent,
            extended_hours: request.extended_hours,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            commission: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            filled_at: None,
            canceled_at: None,
            broker_meta: FnvHashMap::default(),
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

/// Requested modifications to a working order.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

/// Filter for order listings.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }
        if let Some(symbol) = &self.symbol
            && &order.symbol != symbol
        {
            return false;
        }
        if let Some(account) = &self.account
            && &order.account != account
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        let terminal = [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ];
        let active = [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Accepted,
            OrderStatus::PartiallyFilled,
        ];

        assert!(terminal.iter().all(OrderStatus::is_terminal));
        assert!(active.iter().all(|status| !status.is_terminal()));
    }

    #[test]
    fn test_status_serde_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(),
            r#""partially_filled""#
        );
        assert_eq!(
            serde_json::to_string(&TimeInForce::GoodTilCanceled).unwrap(),
            r#""gtc""#
        );
        assert_eq!(
            serde_json::to_string(&OrderKind::StopLimit).unwrap(),
            r#""stop_limit""#
        );
    }
}
