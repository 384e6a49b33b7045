use crate::{
    filter::{
        FilterGroup, FundamentalFilter, MomentumFilter, PatternFilter, PriceFilter,
        TechnicalFilter, VolumeFilter,
    },
    model::{AssetType, TimeFrame},
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub const MAX_RESULT_LIMIT: usize = 1000;
pub const DEFAULT_RESULT_LIMIT: usize = 100;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// User-defined scanner: universe, filter pipeline, ranking.
///
/// Configurations are content-addressed: the canonical hash of the
/// serialized form keys the engine's result cache.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScannerConfig {
    pub name: String,
    #[serde(default)]
    pub asset_types: Vec<AssetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe: Option<Vec<SmolStr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_symbols: Option<Vec<SmolStr>>,
    pub time_frame: TimeFrame,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_filter: Option<PriceFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_filter: Option<VolumeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_filter: Option<TechnicalFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fundamental_filter: Option<FundamentalFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum_filter: Option<MomentumFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_filter: Option<PatternFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_conditions: Option<FilterGroup>,
    /// Sort key: a result field or dotted snapshot path. Falls back to
    /// `match_score` descending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SmolStr>,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

impl ScannerConfig {
    pub fn new(name: impl Into<String>, time_frame: TimeFrame) -> Self {
        Self {
            name: name.into(),
            asset_types: Vec::new(),
            universe: None,
            exclude_symbols: None,
            time_frame,
            price_filter: None,
            volume_filter: None,
            technical_filter: None,
            fundamental_filter: None,
            momentum_filter: None,
            pattern_filter: None,
            custom_conditions: None,
            sort_by: None,
            sort_direction: SortDirection::default(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }

    /// Result limit clamped to the documented maximum.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_RESULT_LIMIT)
    }

    /// Number of configured (active) filter families, custom tree included.
    pub fn active_filter_count(&self) -> usize {
        [
            self.price_filter.is_some(),
            self.volume_filter.is_some(),
            self.technical_filter.is_some(),
            self.fundamental_filter.is_some(),
            self.momentum_filter.is_some(),
            self.pattern_filter.is_some(),
            self.custom_conditions.is_some(),
        ]
        .into_iter()
        .filter(|active| *active)
        .count()
    }
}
