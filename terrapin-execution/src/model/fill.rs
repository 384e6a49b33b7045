use crate::model::{
    Side,
    id::{FillId, OrderId},
};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Execution report: some quantity of an order traded at a price.
///
/// Fills are immutable once created; order fill accounting folds them into
/// the owning order under the lifecycle's per-order lock.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Fill {
    pub id: FillId,
    pub order_id: OrderId,
    pub symbol: SmolStr,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<SmolStr>,
}

impl Fill {
    /// Gross traded value, excluding commission.
    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }
}
