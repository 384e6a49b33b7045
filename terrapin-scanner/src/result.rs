use crate::model::{AssetType, TimeFrame};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// One matched asset out of a scanner run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScanResult {
    pub symbol: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub asset_type: AssetType,
    pub price: Decimal,
    pub change_percent: Decimal,
    pub volume: u64,
    /// Fraction of active filter families passed, scaled to [0, 100].
    pub match_score: f64,
    pub matched_filters: Vec<SmolStr>,
    /// Field values that drove the match (price, volume, indicators).
    #[serde(default)]
    pub filter_values: FnvHashMap<SmolStr, f64>,
    #[serde(default)]
    pub patterns_detected: Vec<SmolStr>,
    /// 1-based position after sorting; assigned by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub time: DateTime<Utc>,
    pub time_frame: TimeFrame,
}

/// Full response of one scanner run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScannerResponse {
    /// Content hash of the configuration; also the cache key.
    pub scanner_id: SmolStr,
    pub scanner_name: String,
    pub results: Vec<ScanResult>,
    pub total_matches: usize,
    pub total_scanned: usize,
    pub scan_duration_ms: u64,
    pub cache_hit: bool,
    pub scan_time: DateTime<Utc>,
}

/// Change set between two consecutive streaming runs of one scanner.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScannerDelta {
    pub scanner_id: SmolStr,
    /// Symbols newly matching.
    pub added: Vec<ScanResult>,
    /// Symbols that stopped matching.
    pub removed: Vec<SmolStr>,
    /// Symbols still matching with a changed score or rank.
    pub updated: Vec<ScanResult>,
    pub total_matches: usize,
    pub scan_time: DateTime<Utc>,
}

impl ScannerDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Diff two runs of the same scanner.
    pub fn between(previous: &ScannerResponse, current: &ScannerResponse) -> Self {
        let previous_by_symbol: FnvHashMap<&SmolStr, &ScanResult> = previous
            .results
            .iter()
            .map(|result| (&result.symbol, result))
            .collect();
        let current_symbols: FnvHashMap<&SmolStr, &ScanResult> = current
            .results
            .iter()
            .map(|result| (&result.symbol, result))
            .collect();

        let added = current
            .results
            .iter()
            .filter(|result| !previous_by_symbol.contains_key(&result.symbol))
            .cloned()
            .collect();

        let removed = previous
            .results
            .iter()
            .filter(|result| !current_symbols.contains_key(&result.symbol))
            .map(|result| result.symbol.clone())
            .collect();

        let updated = current
            .results
            .iter()
            .filter(|result| {
                previous_by_symbol
                    .get(&result.symbol)
                    .is_some_and(|previous| {
                        previous.match_score != result.match_score || previous.rank != result.rank
                    })
            })
            .cloned()
            .collect();

        Self {
            scanner_id: current.scanner_id.clone(),
            added,
            removed,
            updated,
            total_matches: current.total_matches,
            scan_time: current.scan_time,
        }
    }
}
