use crate::model::id::AccountId;
use chrono::{DateTime, Utc};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Cash,
    Margin,
    #[serde(rename = "pdt")]
    #[display("pdt")]
    PatternDayTrader,
}

/// Broker-authoritative account state, cached locally with a TTL.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub kind: AccountKind,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
    pub portfolio_value: Decimal,
    pub long_market_value: Decimal,
    pub short_market_value: Decimal,
    pub day_trade_count: u32,
    pub restricted: bool,
    pub updated_at: DateTime<Utc>,
}
