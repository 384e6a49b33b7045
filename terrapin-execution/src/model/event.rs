use crate::model::{
    OrderStatus,
    id::{EventId, OrderId},
};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Append-only record of a single order status transition.
///
/// For every event, `(old_status, new_status)` is a pair the lifecycle
/// declares; listeners and the streaming hub consume these after the
/// per-order lock is released.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct OrderEvent {
    pub id: EventId,
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub meta: FnvHashMap<SmolStr, SmolStr>,
}
