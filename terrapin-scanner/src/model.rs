use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHashMap;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Stock,
    Crypto,
    Forex,
    Index,
    Etf,
}

impl AssetType {
    /// Symbol-shape heuristics, used when a universe entry carries no
    /// explicit type.
    pub fn infer(symbol: &str) -> Self {
        if symbol.ends_with("-USD") || symbol.ends_with("USDT") {
            Self::Crypto
        } else if symbol.contains('=') {
            Self::Forex
        } else if symbol.starts_with('^') {
            Self::Index
        } else {
            Self::Stock
        }
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    #[display("1m")]
    Minute1,
    #[serde(rename = "5m")]
    #[display("5m")]
    Minute5,
    #[serde(rename = "15m")]
    #[display("15m")]
    Minute15,
    #[serde(rename = "1h")]
    #[display("1h")]
    Hour1,
    #[serde(rename = "1d")]
    #[display("1d")]
    Day1,
    #[serde(rename = "1w")]
    #[display("1w")]
    Week1,
}

/// A candle pattern detected on the snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatternMatch {
    pub kind: SmolStr,
    /// Detection confidence in [0, 100].
    pub confidence: f64,
}

/// Heterogeneous snapshot field reachable through a dotted path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(SmolStr),
    Bool(bool),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// One asset's OHLCV + indicator snapshot, the unit scanner filters evaluate
/// against.
///
/// `history` optionally carries recent per-field values (oldest first) so
/// `crosses_above` / `crosses_below` can compare against the previous bar;
/// snapshots without history degrade those operators to plain comparisons.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssetSnapshot {
    pub symbol: SmolStr,
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub change: Decimal,
    #[serde(default)]
    pub change_percent: Decimal,
    #[serde(default)]
    pub volume: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub indicators: FnvHashMap<SmolStr, f64>,
    #[serde(default)]
    pub fundamentals: FnvHashMap<SmolStr, FieldValue>,
    #[serde(default)]
    pub patterns: Vec<PatternMatch>,
    #[serde(default)]
    pub history: FnvHashMap<SmolStr, Vec<f64>>,
    pub time: DateTime<Utc>,
}

impl AssetSnapshot {
    pub fn new(symbol: impl Into<SmolStr>, price: Decimal, time: DateTime<Utc>) -> Self {
        let symbol = symbol.into();
        Self {
            asset_type: AssetType::infer(&symbol),
            symbol,
            name: None,
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: 0,
            average_volume: None,
            high: None,
            low: None,
            indicators: FnvHashMap::default(),
            fundamentals: FnvHashMap::default(),
            patterns: Vec::new(),
            history: FnvHashMap::default(),
            time,
        }
    }

    /// Resolve a dotted-path accessor, eg/ `price`, `indicators.rsi`,
    /// `fundamentals.sector`.
    pub fn field(&self, path: &str) -> Option<FieldValue> {
        match path.split_once('.') {
            None => match path {
                "symbol" => Some(FieldValue::Text(self.symbol.clone())),
                "price" => self.price.to_f64().map(FieldValue::Number),
                "change" => self.change.to_f64().map(FieldValue::Number),
                "change_percent" => self.change_percent.to_f64().map(FieldValue::Number),
                "volume" => Some(FieldValue::Number(self.volume as f64)),
                "average_volume" => self
                    .average_volume
                    .map(|volume| FieldValue::Number(volume as f64)),
                "high" => self.high.and_then(|high| high.to_f64()).map(FieldValue::Number),
                "low" => self.low.and_then(|low| low.to_f64()).map(FieldValue::Number),
                "volume_ratio" => self.volume_ratio().map(FieldValue::Number),
                _ => None,
            },
            Some(("indicators", name)) => self
                .indicators
                .get(name)
                .map(|value| FieldValue::Number(*value)),
            Some(("fundamentals", name)) => self.fundamentals.get(name).cloned(),
            _ => None,
        }
    }

    /// Previous value of a field, when a history buffer is present.
    pub fn previous(&self, path: &str) -> Option<f64> {
        let history = self.history.get(path)?;
        match history.len() {
            0 => None,
            // A single entry is the current bar; no previous value exists.
            1 => None,
            n => Some(history[n - 2]),
        }
    }

    pub fn volume_ratio(&self) -> Option<f64> {
        let average = self.average_volume?;
        if average == 0 {
            return None;
        }
        Some(self.volume as f64 / average as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_type_inference() {
        assert_eq!(AssetType::infer("AAPL"), AssetType::Stock);
        assert_eq!(AssetType::infer("BTC-USD"), AssetType::Crypto);
        assert_eq!(AssetType::infer("ETHUSDT"), AssetType::Crypto);
        assert_eq!(AssetType::infer("EURUSD=X"), AssetType::Forex);
        assert_eq!(AssetType::infer("^GSPC"), AssetType::Index);
    }

    #[test]
    fn test_dotted_field_access() {
        let mut snapshot = AssetSnapshot::new("AAPL", dec!(150.25), Utc::now());
        snapshot.volume = 2_000_000;
        snapshot.average_volume = Some(1_000_000);
        snapshot.indicators.insert("rsi".into(), 61.5);
        snapshot
            .fundamentals
            .insert("sector".into(), FieldValue::Text("technology".into()));

        assert_eq!(snapshot.field("price"), Some(FieldValue::Number(150.25)));
        assert_eq!(
            snapshot.field("indicators.rsi"),
            Some(FieldValue::Number(61.5))
        );
        assert_eq!(
            snapshot.field("fundamentals.sector"),
            Some(FieldValue::Text("technology".into()))
        );
        assert_eq!(
            snapshot.field("volume_ratio"),
            Some(FieldValue::Number(2.0))
        );
        assert_eq!(snapshot.field("indicators.macd"), None);
        assert_eq!(snapshot.field("nope.nope"), None);
    }

    #[test]
    fn test_previous_requires_at_least_two_bars() {
        let mut snapshot = AssetSnapshot::new("AAPL", dec!(100), Utc::now());
        assert_eq!(snapshot.previous("indicators.rsi"), None);

        snapshot
            .history
            .insert("indicators.rsi".into(), vec![55.0]);
        assert_eq!(snapshot.previous("indicators.rsi"), None);

        snapshot
            .history
            .insert("indicators.rsi".into(), vec![48.0, 55.0]);
        assert_eq!(snapshot.previous("indicators.rsi"), Some(48.0));
    }
}
