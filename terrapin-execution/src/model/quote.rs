use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Streaming market quote produced by adapters that support
/// `stream_quotes`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Quote {
    pub symbol: SmolStr,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub time: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / rust_decimal::Decimal::TWO
    }
}
