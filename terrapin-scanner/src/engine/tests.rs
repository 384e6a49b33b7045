use super::*;
use crate::{
    config::{ScannerConfig, SortDirection},
    filter::{PriceFilter, VolumeFilter},
    model::TimeFrame,
    provider::ProviderError,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use terrapin_integration::clock::LiveClock;

#[derive(Debug, Default)]
struct StubProvider {
    snapshots: Mutex<FnvHashMap<SmolStr, AssetSnapshot>>,
    failing: Mutex<HashSet<SmolStr>>,
    delay: Option<Duration>,
}

impl StubProvider {
    fn with_quotes(quotes: &[(&str, Decimal, u64, u64)]) -> Self {
        let provider = Self::default();
        for (symbol, price, volume, average_volume) in quotes {
            let mut snapshot = AssetSnapshot::new(*symbol, *price, Utc::now());
            snapshot.volume = *volume;
            snapshot.average_volume = Some(*average_volume);
            provider
                .snapshots
                .lock()
                .insert(SmolStr::new(*symbol), snapshot);
        }
        provider
    }

    fn set_price(&self, symbol: &str, price: Decimal) {
        if let Some(snapshot) = self.snapshots.lock().get_mut(symbol) {
            snapshot.price = price;
        }
    }

    fn fail(&self, symbol: &str) {
        self.failing.lock().insert(SmolStr::new(symbol));
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    async fn universe(&self) -> Result<Vec<SmolStr>, ProviderError> {
        Ok(self.snapshots.lock().keys().cloned().collect())
    }

    async fn snapshot(
        &self,
        symbol: &str,
        _time_frame: TimeFrame,
    ) -> Result<AssetSnapshot, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(symbol) {
            return Err(ProviderError::Unavailable("stub outage".into()));
        }
        self.snapshots
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::SymbolNotFound(SmolStr::new(symbol)))
    }
}

fn price_volume_config() -> ScannerConfig {
    let mut config = ScannerConfig::new("price-volume", TimeFrame::Day1);
    config.universe = Some(vec!["A".into(), "B".into(), "C".into(), "D".into()]);
    config.price_filter = Some(PriceFilter {
        min_price: Some(10.0),
        max_price: Some(20.0),
        ..PriceFilter::default()
    });
    config.volume_filter = Some(VolumeFilter {
        volume_ratio: Some(2.0),
        ..VolumeFilter::default()
    });
    config
}

fn engine_with(provider: StubProvider) -> Arc<ScannerEngine> {
    let engine = Arc::new(ScannerEngine::new(LiveClock::shared()));
    engine.register_provider(AssetType::Stock, Arc::new(provider));
    engine
}

fn scenario_provider() -> StubProvider {
    // volume / average_volume gives the volume ratio.
    StubProvider::with_quotes(&[
        ("A", dec!(12), 3_000_000, 1_000_000),
        ("B", dec!(25), 2_100_000, 1_000_000),
        ("C", dec!(15), 1_000_000, 1_000_000),
        ("D", dec!(11), 5_000_000, 1_000_000),
    ])
}

#[tokio::test]
async fn test_price_volume_scan_matches_and_ranks() {
    let engine = engine_with(scenario_provider());
    let response = engine
        .run(&price_volume_config(), RunOptions::default())
        .await;

    assert_eq!(response.total_scanned, 4);
    assert_eq!(response.total_matches, 2);
    assert!(!response.cache_hit);

    // Both matches pass every active filter; equal scores break by symbol.
    let symbols = response
        .results
        .iter()
        .map(|result| result.symbol.as_str())
        .collect::<Vec<_>>();
    assert_eq!(symbols, vec!["A", "D"]);
    assert_eq!(response.results[0].rank, Some(1));
    assert_eq!(response.results[1].rank, Some(2));
    assert!(response.results.iter().all(|r| r.match_score == 100.0));
    assert!(
        response.results[0]
            .matched_filters
            .contains(&SmolStr::new("price"))
    );
}

#[tokio::test]
async fn test_second_run_within_ttl_is_cache_hit_with_equal_body() {
    let engine = engine_with(scenario_provider());
    let config = price_volume_config();

    let first = engine.run(&config, RunOptions::default()).await;
    let second = engine.run(&config, RunOptions::default()).await;

    assert!(second.cache_hit);
    assert_eq!(second.scanner_id, first.scanner_id);
    assert_eq!(second.results, first.results);
    assert_eq!(second.total_scanned, first.total_scanned);

    // Force bypasses the cache probe.
    let forced = engine
        .run(&config, RunOptions { force: true, deadline: None })
        .await;
    assert!(!forced.cache_hit);
}

#[tokio::test]
async fn test_per_symbol_failure_drops_symbol_only() {
    let provider = scenario_provider();
    provider.fail("A");
    let engine = engine_with(provider);

    let response = engine
        .run(&price_volume_config(), RunOptions::default())
        .await;

    assert_eq!(response.total_scanned, 4, "failed fetch still completed");
    let symbols = response
        .results
        .iter()
        .map(|result| result.symbol.as_str())
        .collect::<Vec<_>>();
    assert_eq!(symbols, vec!["D"], "only the failed symbol dropped");
}

#[tokio::test]
async fn test_empty_universe_returns_empty_response_without_error() {
    let engine = Arc::new(ScannerEngine::new(LiveClock::shared()));
    let mut config = ScannerConfig::new("empty", TimeFrame::Day1);
    config.asset_types = vec![AssetType::Stock];

    let response = engine.run(&config, RunOptions::default()).await;

    assert_eq!(response.total_scanned, 0);
    assert_eq!(response.total_matches, 0);
    assert!(response.results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_returns_partial_result() {
    let provider = StubProvider {
        delay: Some(Duration::from_secs(120)),
        ..scenario_provider()
    };
    let engine = engine_with(provider);

    let response = engine
        .run(
            &price_volume_config(),
            RunOptions {
                force: true,
                deadline: Some(Duration::from_secs(1)),
            },
        )
        .await;

    assert_eq!(response.total_scanned, 0, "no fetch completed in time");
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_sort_by_configured_key() {
    let engine = engine_with(scenario_provider());
    let mut config = price_volume_config();
    config.sort_by = Some("volume_ratio".into());
    config.sort_direction = SortDirection::Desc;

    let response = engine.run(&config, RunOptions::default()).await;
    let symbols = response
        .results
        .iter()
        .map(|result| result.symbol.as_str())
        .collect::<Vec<_>>();
    assert_eq!(symbols, vec!["D", "A"], "D has the larger volume ratio");
}

#[tokio::test]
async fn test_limit_clips_results() {
    let engine = engine_with(scenario_provider());
    let mut config = price_volume_config();
    config.limit = 1;

    let response = engine.run(&config, RunOptions::default()).await;
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.total_matches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_yields_initial_results_then_deltas() {
    let provider = scenario_provider();
    let engine = Arc::new(ScannerEngine::new(LiveClock::shared()));
    let provider = Arc::new(provider);
    engine.register_provider(AssetType::Stock, Arc::clone(&provider) as _);

    let mut stream = engine.subscribe(price_volume_config(), 30);

    let initial = stream.next().await.unwrap();
    assert_eq!(initial.added.len(), 2, "first tick publishes the full set");

    // A leaves the price band before the next tick.
    provider.set_price("A", dec!(50));
    let delta = stream.next().await.unwrap();
    assert_eq!(delta.removed, vec![SmolStr::new("A")]);
}

#[test]
fn test_stream_interval_clamped() {
    assert_eq!(clamp_stream_interval(5), MIN_STREAM_INTERVAL_SECS);
    assert_eq!(clamp_stream_interval(60), 60);
    assert_eq!(clamp_stream_interval(10_000), MAX_STREAM_INTERVAL_SECS);
}
