use crate::model::id::AccountId;
use chrono::{DateTime, Utc};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

/// Broker-maintained position, authoritative at the venue (derived locally by
/// the paper adapter).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub account: AccountId,
    pub symbol: SmolStr,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub cost_basis: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub current_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Re-mark the position against a fresh market price.
    pub fn mark(&mut self, price: Decimal, now: DateTime<Utc>) {
        self.current_price = price;
        self.market_value = self.quantity.abs() * price;
        let current_value = self.quantity * price;
        self.unrealized_pnl = current_value - self.cost_basis;
        if !self.cost_basis.is_zero() {
            self.unrealized_pnl_percent =
                self.unrealized_pnl / self.cost_basis.abs() * Decimal::ONE_HUNDRED;
        }
        self.updated_at = now;
    }
}
