use crate::result::{ScanResult, ScannerResponse};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashSet;
use terrapin_integration::clock::SharedClock;
use tracing::debug;

/// Identity of a contributing scanner.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ScannerRef {
    pub id: SmolStr,
    pub name: String,
}

/// Weight configuration for one scanner's contributions.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScannerWeight {
    pub weight: f64,
    pub confidence_multiplier: f64,
}

impl Default for ScannerWeight {
    fn default() -> Self {
        Self {
            weight: 1.0,
            confidence_multiplier: 1.0,
        }
    }
}

/// Aggregation tuning.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Symbols reported by fewer scanners than this are dropped.
    pub min_scanners_required: usize,
    pub max_results: usize,
    pub min_aggregate_score: f64,
    pub enable_diversity_scoring: bool,
    /// Derive unconfigured weights from tracked reliability.
    pub weight_by_reliability: bool,
    /// Symbol -> sector, for the sector distribution analysis.
    pub sector_map: FnvHashMap<SmolStr, SmolStr>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_scanners_required: 2,
            max_results: 100,
            min_aggregate_score: 60.0,
            enable_diversity_scoring: true,
            weight_by_reliability: true,
            sector_map: FnvHashMap::default(),
        }
    }
}

/// Running per-scanner accuracy, updated from match feedback.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct ScannerReliability {
    pub total: u64,
    pub successful: u64,
    pub average_score: f64,
    /// `0.7 * success_rate + 0.3 * average_score / 100`, scaled to [0, 100].
    pub reliability: f64,
}

impl ScannerReliability {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Consensus,
    Pattern,
    Portfolio,
    Watchlist,
}

/// Deterministic, human-readable note derived from the contributions.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
    pub importance: Priority,
}

/// One scanner's contribution to an aggregated symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Contribution {
    pub scanner_id: SmolStr,
    pub scanner_name: String,
    pub score: f64,
    pub weight: f64,
    pub matched_filters: Vec<SmolStr>,
}

/// Weighted, deduplicated cross-scanner view of one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregatedResult {
    pub symbol: SmolStr,
    pub aggregate_score: f64,
    pub confidence: f64,
    pub scanner_count: usize,
    pub contributions: Vec<Contribution>,
    pub matched_filters: Vec<SmolStr>,
    pub priority: Priority,
    pub insights: Vec<Insight>,
    pub diversity_score: f64,
    pub consensus_score: f64,
    pub time: DateTime<Utc>,
}

/// Sector distribution over a set of aggregated results.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SectorAnalysis {
    /// Sectors by mean aggregate score, best first.
    pub top_sectors: Vec<(SmolStr, f64)>,
    pub sector_scores: FnvHashMap<SmolStr, f64>,
    /// Distinct sectors / results, in [0, 1].
    pub diversification_score: f64,
}

/// Combines results from multiple scanners into unified insights and tracks
/// per-scanner reliability.
pub struct AggregationService {
    clock: SharedClock,
    config: RwLock<AggregationConfig>,
    weights: RwLock<FnvHashMap<SmolStr, ScannerWeight>>,
    reliability: RwLock<FnvHashMap<SmolStr, ScannerReliability>>,
    portfolio: RwLock<HashSet<SmolStr>>,
    watchlist: RwLock<HashSet<SmolStr>>,
}

impl std::fmt::Debug for AggregationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field("weights", &self.weights.read().len())
            .field("tracked_scanners", &self.reliability.read().len())
            .finish_non_exhaustive()
    }
}

impl AggregationService {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            config: RwLock::new(AggregationConfig::default()),
            weights: RwLock::new(FnvHashMap::default()),
            reliability: RwLock::new(FnvHashMap::default()),
            portfolio: RwLock::new(HashSet::new()),
            watchlist: RwLock::new(HashSet::new()),
        }
    }

    pub fn configure(&self, config: AggregationConfig) {
        *self.config.write() = config;
    }

    pub fn set_scanner_weight(&self, scanner_id: impl Into<SmolStr>, weight: ScannerWeight) {
        self.weights.write().insert(scanner_id.into(), weight);
    }

    pub fn set_portfolio_symbols(&self, symbols: impl IntoIterator<Item = SmolStr>) {
        *self.portfolio.write() = symbols.into_iter().collect();
    }

    pub fn set_watchlist_symbols(&self, symbols: impl IntoIterator<Item = SmolStr>) {
        *self.watchlist.write() = symbols.into_iter().collect();
    }

    /// Aggregate the results of several scanner runs, ranked by composite
    /// score.
    pub fn aggregate(&self, runs: &[(ScannerRef, ScannerResponse)]) -> Vec<AggregatedResult> {
        let config = self.config.read().clone();

        let mut by_symbol: FnvHashMap<&SmolStr, Vec<(&ScannerRef, &ScanResult)>> =
            FnvHashMap::default();
        for (scanner, response) in runs {
            for result in &response.results {
                by_symbol.entry(&result.symbol).or_default().push((scanner, result));
            }
        }

        let mut aggregated = by_symbol
            .into_iter()
            .filter(|(_, contributions)| contributions.len() >= config.min_scanners_required)
            .map(|(symbol, contributions)| self.aggregate_symbol(symbol, &contributions, &config))
            .filter(|result| result.aggregate_score >= config.min_aggregate_score)
            .collect::<Vec<_>>();

        aggregated.sort_by(|a, b| {
            b.aggregate_score
                .partial_cmp(&a.aggregate_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        aggregated.truncate(config.max_results);

        debug!(symbols = aggregated.len(), "aggregated scanner results");
        aggregated
    }

    fn aggregate_symbol(
        &self,
        symbol: &SmolStr,
        contributions: &[(&ScannerRef, &ScanResult)],
        config: &AggregationConfig,
    ) -> AggregatedResult {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut contribution_rows = Vec::with_capacity(contributions.len());
        let mut matched_filters = HashSet::new();

        for (scanner, result) in contributions {
            let weight = self.effective_weight(&scanner.id, config);
            weighted_sum += result.match_score * weight;
            total_weight += weight;

            matched_filters.extend(result.matched_filters.iter().cloned());
            contribution_rows.push(Contribution {
                scanner_id: scanner.id.clone(),
                scanner_name: scanner.name.clone(),
                score: result.match_score,
                weight,
                matched_filters: result.matched_filters.clone(),
            });
        }

        let base_score = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };

        let diversity_score = if config.enable_diversity_scoring {
            diversity_bonus(contributions)
        } else {
            0.0
        };
        let consensus_score = (contributions.len() as f64 * 2.0).min(10.0);
        let aggregate_score = (base_score + diversity_score + consensus_score).min(100.0);

        let scores = contributions
            .iter()
            .map(|(_, result)| result.match_score)
            .collect::<Vec<_>>();
        let confidence = (100.0 - 2.0 * population_stdev(&scores)).clamp(0.0, 100.0);

        let priority = self.priority(symbol, aggregate_score, contributions.len());
        let insights = self.insights(symbol, contributions);

        let mut matched_filters = matched_filters.into_iter().collect::<Vec<_>>();
        matched_filters.sort_unstable();

        AggregatedResult {
            symbol: symbol.clone(),
            aggregate_score: round2(aggregate_score),
            confidence: round2(confidence),
            scanner_count: contributions.len(),
            contributions: contribution_rows,
            matched_filters,
            priority,
            insights,
            diversity_score: round2(diversity_score),
            consensus_score: round2(consensus_score),
            time: self.clock.now(),
        }
    }

    fn effective_weight(&self, scanner_id: &SmolStr, config: &AggregationConfig) -> f64 {
        if let Some(weight) = self.weights.read().get(scanner_id) {
            return weight.weight * weight.confidence_multiplier;
        }

        if config.weight_by_reliability
            && let Some(reliability) = self.reliability.read().get(scanner_id)
            && reliability.total > 0
        {
            // Reliability stands in for both the weight and the confidence
            // multiplier when nothing is configured.
            let fraction = (reliability.reliability / 100.0).clamp(0.0, 1.0);
            return fraction * fraction;
        }

        ScannerWeight::default().weight * ScannerWeight::default().confidence_multiplier
    }

    fn priority(&self, symbol: &SmolStr, score: f64, scanner_count: usize) -> Priority {
        if self.portfolio.read().contains(symbol) {
            if score >= 80.0 {
                return Priority::Critical;
            }
            if score >= 60.0 {
                return Priority::High;
            }
        } else if self.watchlist.read().contains(symbol) {
            if score >= 85.0 {
                return Priority::High;
            }
            if score >= 70.0 {
                return Priority::Medium;
            }
        } else {
            if score >= 90.0 && scanner_count >= 4 {
                return Priority::High;
            }
            if score >= 75.0 && scanner_count >= 3 {
                return Priority::Medium;
            }
        }
        Priority::Low
    }

    fn insights(
        &self,
        symbol: &SmolStr,
        contributions: &[(&ScannerRef, &ScanResult)],
    ) -> Vec<Insight> {
        let mut insights = Vec::new();
        let count = contributions.len();

        if count >= 4 {
            let mean = contributions
                .iter()
                .map(|(_, result)| result.match_score)
                .sum::<f64>()
                / count as f64;
            if mean >= 80.0 {
                insights.push(Insight {
                    kind: InsightKind::Consensus,
                    message: format!(
                        "Strong consensus across {count} scanners with average score {mean:.1}%"
                    ),
                    importance: Priority::High,
                });
            }
        }

        let filter_counts = contributions
            .iter()
            .flat_map(|(_, result)| result.matched_filters.iter())
            .counts();
        if let Some((dominant, dominant_count)) = filter_counts
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .next()
            && dominant_count as f64 >= count as f64 * 0.6
        {
            insights.push(Insight {
                kind: InsightKind::Pattern,
                message: format!(
                    "Strong pattern: '{dominant}' identified by {dominant_count}/{count} scanners"
                ),
                importance: Priority::Medium,
            });
        }

        if self.portfolio.read().contains(symbol) {
            insights.push(Insight {
                kind: InsightKind::Portfolio,
                message: "This symbol is in your current portfolio".into(),
                importance: Priority::High,
            });
        } else if self.watchlist.read().contains(symbol) {
            insights.push(Insight {
                kind: InsightKind::Watchlist,
                message: "This symbol is on your watchlist".into(),
                importance: Priority::Medium,
            });
        }

        insights
    }

    /// Record match feedback for a scanner and refresh its reliability.
    pub fn record_feedback(&self, scanner_id: impl Into<SmolStr>, success: bool, score: f64) {
        let mut reliability = self.reliability.write();
        let entry = reliability.entry(scanner_id.into()).or_default();

        entry.total += 1;
        if success {
            entry.successful += 1;
        }
        entry.average_score =
            (entry.average_score * (entry.total - 1) as f64 + score) / entry.total as f64;
        entry.reliability =
            (entry.success_rate() * 0.7 + entry.average_score / 100.0 * 0.3) * 100.0;
    }

    pub fn reliability(&self, scanner_id: &str) -> Option<ScannerReliability> {
        self.reliability.read().get(scanner_id).copied()
    }

    /// Scanners ranked by reliability, best first.
    pub fn scanner_rankings(&self) -> Vec<(SmolStr, ScannerReliability)> {
        self.reliability
            .read()
            .iter()
            .map(|(scanner_id, reliability)| (scanner_id.clone(), *reliability))
            .sorted_by(|a, b| {
                b.1.reliability
                    .partial_cmp(&a.1.reliability)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .collect()
    }

    /// Sector distribution of the aggregated results against the configured
    /// symbol -> sector map. With no map configured the analysis is empty.
    pub fn sector_analysis(&self, results: &[AggregatedResult]) -> SectorAnalysis {
        let config = self.config.read();
        if config.sector_map.is_empty() || results.is_empty() {
            return SectorAnalysis::default();
        }

        let mut sector_totals: FnvHashMap<SmolStr, (f64, usize)> = FnvHashMap::default();
        for result in results {
            let Some(sector) = config.sector_map.get(&result.symbol) else {
                continue;
            };
            let entry = sector_totals.entry(sector.clone()).or_insert((0.0, 0));
            entry.0 += result.aggregate_score;
            entry.1 += 1;
        }

        let sector_scores: FnvHashMap<SmolStr, f64> = sector_totals
            .iter()
            .map(|(sector, (total, count))| (sector.clone(), round2(total / *count as f64)))
            .collect();

        let top_sectors = sector_scores
            .iter()
            .map(|(sector, score)| (sector.clone(), *score))
            .sorted_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            })
            .collect::<Vec<_>>();

        let diversification_score = round2(sector_scores.len() as f64 / results.len() as f64);

        SectorAnalysis {
            top_sectors,
            sector_scores,
            diversification_score,
        }
    }
}

/// Bonus (max 8) for contributions spanning distinct filter families.
fn diversity_bonus(contributions: &[(&ScannerRef, &ScanResult)]) -> f64 {
    let mut kinds = HashSet::new();

    for (_, result) in contributions {
        for filter in &result.matched_filters {
            let filter = filter.to_ascii_lowercase();
            if filter.contains("technical") || filter.contains("rsi") || filter.contains("macd") {
                kinds.insert("technical");
            }
            if filter.contains("fundamental")
                || filter.contains("pe")
                || filter.contains("revenue")
            {
                kinds.insert("fundamental");
            }
            if filter.contains("volume") || filter.contains("price") {
                kinds.insert("price_volume");
            }
            if filter.contains("momentum") || filter.contains("trend") {
                kinds.insert("momentum");
            }
            if filter.contains("pattern") {
                kinds.insert("pattern");
            }
        }
    }

    (kinds.len() as f64 * 1.5).min(8.0)
}

fn population_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests;
