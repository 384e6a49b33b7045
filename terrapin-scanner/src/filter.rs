use crate::model::{AssetSnapshot, FieldValue};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

const NUMERIC_EPSILON: f64 = 1e-10;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    #[serde(rename = "eq")]
    Eq,
    #[serde(rename = "ne")]
    Ne,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "gte")]
    Ge,
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "lte")]
    Le,
    Between,
    NotBetween,
    In,
    NotIn,
    Contains,
    CrossesAbove,
    CrossesBelow,
}

/// Right-hand side of a condition, parsed into a typed variant at the
/// configuration boundary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(SmolStr),
    Bool(bool),
    Numbers(Vec<f64>),
    Texts(Vec<SmolStr>),
}

/// Leaf predicate: `(field, op, value)` over a snapshot's dotted-path
/// accessors.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterCondition {
    pub field: SmolStr,
    pub op: ComparisonOp,
    pub value: ConditionValue,
}

impl FilterCondition {
    pub fn new(field: impl Into<SmolStr>, op: ComparisonOp, value: ConditionValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate against a snapshot. Missing fields and type mismatches are
    /// non-matches, never errors.
    pub fn evaluate(&self, snapshot: &AssetSnapshot) -> bool {
        let Some(field_value) = snapshot.field(&self.field) else {
            return false;
        };

        match self.op {
            ComparisonOp::Eq => compare_equal(&field_value, &self.value),
            ComparisonOp::Ne => !compare_equal(&field_value, &self.value),
            ComparisonOp::Gt => compare_numeric(&field_value, &self.value, |a, b| a > b),
            ComparisonOp::Ge => compare_numeric(&field_value, &self.value, |a, b| a >= b),
            ComparisonOp::Lt => compare_numeric(&field_value, &self.value, |a, b| a < b),
            ComparisonOp::Le => compare_numeric(&field_value, &self.value, |a, b| a <= b),
            ComparisonOp::Between => compare_between(&field_value, &self.value),
            ComparisonOp::NotBetween => {
                field_value.as_number().is_some() && !compare_between(&field_value, &self.value)
            }
            ComparisonOp::In => compare_in(&field_value, &self.value),
            ComparisonOp::NotIn => !compare_in(&field_value, &self.value),
            ComparisonOp::Contains => compare_contains(&field_value, &self.value),
            ComparisonOp::CrossesAbove => self.crosses(snapshot, &field_value, true),
            ComparisonOp::CrossesBelow => self.crosses(snapshot, &field_value, false),
        }
    }

    /// True crossing when history is present (`previous ≤ threshold <
    /// current`); otherwise a degraded current-value comparison.
    fn crosses(&self, snapshot: &AssetSnapshot, field_value: &FieldValue, above: bool) -> bool {
        let (Some(current), ConditionValue::Number(threshold)) =
            (field_value.as_number(), &self.value)
        else {
            return false;
        };

        match snapshot.previous(&self.field) {
            Some(previous) if above => previous <= *threshold && current > *threshold,
            Some(previous) => previous >= *threshold && current < *threshold,
            None if above => current > *threshold,
            None => current < *threshold,
        }
    }
}

fn compare_equal(field: &FieldValue, target: &ConditionValue) -> bool {
    match (field, target) {
        (FieldValue::Number(a), ConditionValue::Number(b)) => (a - b).abs() < NUMERIC_EPSILON,
        (FieldValue::Text(a), ConditionValue::Text(b)) => a.eq_ignore_ascii_case(b),
        (FieldValue::Bool(a), ConditionValue::Bool(b)) => a == b,
        _ => false,
    }
}

fn compare_numeric(
    field: &FieldValue,
    target: &ConditionValue,
    compare: impl Fn(f64, f64) -> bool,
) -> bool {
    match (field.as_number(), target) {
        (Some(a), ConditionValue::Number(b)) => compare(a, *b),
        _ => false,
    }
}

fn compare_between(field: &FieldValue, target: &ConditionValue) -> bool {
    match (field.as_number(), target) {
        (Some(value), ConditionValue::Numbers(range)) if range.len() == 2 => {
            range[0] <= value && value <= range[1]
        }
        _ => false,
    }
}

fn compare_in(field: &FieldValue, target: &ConditionValue) -> bool {
    match (field, target) {
        (FieldValue::Number(value), ConditionValue::Numbers(values)) => values
            .iter()
            .any(|candidate| (candidate - value).abs() < NUMERIC_EPSILON),
        (FieldValue::Text(value), ConditionValue::Texts(values)) => values
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(value)),
        _ => false,
    }
}

fn compare_contains(field: &FieldValue, target: &ConditionValue) -> bool {
    match (field, target) {
        (FieldValue::Text(value), ConditionValue::Text(needle)) => value
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase()),
        _ => false,
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOp {
    And,
    Or,
}

/// Recursive condition tree: leaves are [`FilterCondition`]s, branches
/// combine with `AND`/`OR`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterGroup {
    pub op: GroupOp,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub groups: Vec<FilterGroup>,
}

impl FilterGroup {
    pub fn all(conditions: Vec<FilterCondition>) -> Self {
        Self {
            op: GroupOp::And,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn any(conditions: Vec<FilterCondition>) -> Self {
        Self {
            op: GroupOp::Or,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn evaluate(&self, snapshot: &AssetSnapshot) -> bool {
        let conditions = self
            .conditions
            .iter()
            .map(|condition| condition.evaluate(snapshot));
        let groups = self.groups.iter().map(|group| group.evaluate(snapshot));
        let mut results = conditions.chain(groups);

        match self.op {
            GroupOp::And => results.all(|result| result),
            GroupOp::Or => results.any(|result| result),
        }
    }
}

/// Price-based screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PriceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// Minimum absolute change percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above_vwap: Option<bool>,
    /// Maximum distance from the session high, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_high: Option<f64>,
    /// Maximum distance from the session low, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_low: Option<f64>,
}

impl PriceFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        let Some(price) = snapshot.field("price").and_then(|value| value.as_number()) else {
            return false;
        };

        if let Some(min_price) = self.min_price
            && price < min_price
        {
            return false;
        }
        if let Some(max_price) = self.max_price
            && price > max_price
        {
            return false;
        }
        if let Some(threshold) = self.price_change_percent {
            let change = snapshot
                .field("change_percent")
                .and_then(|value| value.as_number())
                .unwrap_or(0.0);
            if change.abs() < threshold {
                return false;
            }
        }
        if let Some(above_vwap) = self.above_vwap {
            let vwap = snapshot
                .indicators
                .get("vwap")
                .copied()
                .unwrap_or(price);
            if above_vwap && price <= vwap {
                return false;
            }
            if !above_vwap && price >= vwap {
                return false;
            }
        }
        if let Some(near_high) = self.near_high {
            let high = snapshot
                .high
                .and_then(|high| rust_decimal::prelude::ToPrimitive::to_f64(&high))
                .unwrap_or(price);
            if high > 0.0 && (high - price) / high * 100.0 > near_high {
                return false;
            }
        }
        if let Some(near_low) = self.near_low {
            let low = snapshot
                .low
                .and_then(|low| rust_decimal::prelude::ToPrimitive::to_f64(&low))
                .unwrap_or(price);
            if low > 0.0 && (price - low) / low * 100.0 > near_low {
                return false;
            }
        }
        true
    }
}

/// Volume-based screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VolumeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_volume: Option<u64>,
    /// Minimum volume / average-volume ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ratio: Option<f64>,
    /// Minimum traded dollar volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dollar_volume: Option<f64>,
}

impl VolumeFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        if let Some(min_volume) = self.min_volume
            && snapshot.volume < min_volume
        {
            return false;
        }
        if let Some(max_volume) = self.max_volume
            && snapshot.volume > max_volume
        {
            return false;
        }
        if let Some(threshold) = self.volume_ratio {
            match snapshot.volume_ratio() {
                Some(ratio) if ratio >= threshold => {}
                _ => return false,
            }
        }
        if let Some(threshold) = self.dollar_volume {
            let price = snapshot
                .field("price")
                .and_then(|value| value.as_number())
                .unwrap_or(0.0);
            if snapshot.volume as f64 * price < threshold {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdSignal {
    Bullish,
    Bearish,
}

/// Technical-indicator screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TechnicalFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macd_signal: Option<MacdSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adx_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bollinger_position: Option<SmolStr>,
}

impl TechnicalFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        if let Some(rsi) = snapshot.indicators.get("rsi") {
            if let Some(rsi_min) = self.rsi_min
                && *rsi < rsi_min
            {
                return false;
            }
            if let Some(rsi_max) = self.rsi_max
                && *rsi > rsi_max
            {
                return false;
            }
        }
        if let Some(signal) = self.macd_signal {
            let histogram = snapshot
                .indicators
                .get("macd_histogram")
                .copied()
                .unwrap_or(0.0);
            match signal {
                MacdSignal::Bullish if histogram <= 0.0 => return false,
                MacdSignal::Bearish if histogram >= 0.0 => return false,
                _ => {}
            }
        }
        if let Some(adx_min) = self.adx_min {
            let adx = snapshot.indicators.get("adx").copied().unwrap_or(0.0);
            if adx < adx_min {
                return false;
            }
        }
        if let Some(expected) = &self.bollinger_position {
            let position = snapshot
                .fundamentals
                .get("bollinger_position")
                .and_then(|value| value.as_text().map(SmolStr::new))
                .unwrap_or_else(|| SmolStr::new("middle"));
            if &position != expected {
                return false;
            }
        }
        true
    }
}

/// Fundamental screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FundamentalFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe_ratio_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe_ratio_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sectors: Option<Vec<SmolStr>>,
}

impl FundamentalFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        if let Some(market_cap) = snapshot
            .fundamentals
            .get("market_cap")
            .and_then(FieldValue::as_number)
        {
            if let Some(market_cap_min) = self.market_cap_min
                && market_cap < market_cap_min
            {
                return false;
            }
            if let Some(market_cap_max) = self.market_cap_max
                && market_cap > market_cap_max
            {
                return false;
            }
        }
        if let Some(pe_ratio) = snapshot
            .fundamentals
            .get("pe_ratio")
            .and_then(FieldValue::as_number)
        {
            if let Some(pe_ratio_min) = self.pe_ratio_min
                && pe_ratio < pe_ratio_min
            {
                return false;
            }
            if let Some(pe_ratio_max) = self.pe_ratio_max
                && pe_ratio > pe_ratio_max
            {
                return false;
            }
        }
        if let Some(sectors) = &self.sectors {
            let sector = snapshot
                .fundamentals
                .get("sector")
                .and_then(|value| value.as_text().map(SmolStr::new));
            match sector {
                Some(sector) if sectors.iter().any(|s| s.eq_ignore_ascii_case(&sector)) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Momentum screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MomentumFilter {
    /// Minimum absolute rate of change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_of_change: Option<f64>,
    /// Minimum relative strength (0-100 percentile).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_strength: Option<f64>,
}

impl MomentumFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        if let Some(threshold) = self.rate_of_change {
            let roc = snapshot
                .indicators
                .get("rate_of_change")
                .copied()
                .unwrap_or(0.0);
            if roc.abs() < threshold {
                return false;
            }
        }
        if let Some(threshold) = self.relative_strength {
            let strength = snapshot
                .indicators
                .get("relative_strength")
                .copied()
                .unwrap_or(50.0);
            if strength < threshold {
                return false;
            }
        }
        true
    }
}

/// Pattern screening.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PatternFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_kinds: Option<Vec<SmolStr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_min: Option<f64>,
}

impl PatternFilter {
    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        if let Some(kinds) = &self.pattern_kinds {
            let detected = snapshot
                .patterns
                .iter()
                .any(|pattern| kinds.contains(&pattern.kind));
            if !detected {
                return false;
            }
        }
        if let Some(confidence_min) = self.confidence_min {
            let best = snapshot
                .patterns
                .iter()
                .map(|pattern| pattern.confidence)
                .fold(0.0f64, f64::max);
            if best < confidence_min {
                return false;
            }
        }
        true
    }
}

/// Fixed evaluation order, short-circuiting on the first rejection:
/// price -> volume -> technical -> fundamental -> momentum -> pattern ->
/// custom condition tree.
pub const FILTER_ORDER: [&str; 7] = [
    "price",
    "volume",
    "technical",
    "fundamental",
    "momentum",
    "pattern",
    "custom",
];
