use crate::{
    config::ScannerConfig,
    filter::FilterGroup,
    model::{AssetSnapshot, AssetType},
    provider::MarketDataProvider,
    result::{ScanResult, ScannerDelta, ScannerResponse},
};
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use smol_str::SmolStr;
use std::{
    cmp::Ordering,
    collections::BTreeSet,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use terrapin_integration::{cache::TtlCache, clock::SharedClock, hash::canonical_hash};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RESULT_CACHE_TTL: Duration = Duration::from_secs(60);
const FETCH_CONCURRENCY: usize = 50;

/// Streaming re-run interval bounds, seconds.
pub const MIN_STREAM_INTERVAL_SECS: u64 = 30;
pub const MAX_STREAM_INTERVAL_SECS: u64 = 3600;

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the result cache probe.
    pub force: bool,
    /// Overall fetch deadline; on elapse, in-flight fetches are abandoned
    /// and a partial result is returned.
    pub deadline: Option<Duration>,
}

/// Scanner engine: universe assembly, bounded concurrent snapshot fetching,
/// ordered filter evaluation, ranking and a content-addressed result cache.
pub struct ScannerEngine {
    clock: SharedClock,
    providers: RwLock<FnvHashMap<AssetType, Arc<dyn MarketDataProvider>>>,
    cache: TtlCache<SmolStr, ScannerResponse>,
    fetch_concurrency: usize,
}

impl std::fmt::Debug for ScannerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerEngine")
            .field("providers", &self.providers.read().len())
            .field("cached_responses", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl ScannerEngine {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            cache: TtlCache::new(Arc::clone(&clock), RESULT_CACHE_TTL),
            clock,
            providers: RwLock::new(FnvHashMap::default()),
            fetch_concurrency: FETCH_CONCURRENCY,
        }
    }

    pub fn register_provider(&self, asset_type: AssetType, provider: Arc<dyn MarketDataProvider>) {
        self.providers.write().insert(asset_type, provider);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run the scanner. Never fails: per-symbol fetch failures drop the
    /// symbol, and a provider outage that empties the universe yields an
    /// empty response with `total_scanned = 0`.
    pub async fn run(&self, config: &ScannerConfig, options: RunOptions) -> ScannerResponse {
        let started = self.clock.monotonic();
        let config_hash = SmolStr::new(
            canonical_hash(config).expect("scanner config serialization should not fail"),
        );

        if !options.force
            && let Some(mut cached) = self.cache.get(&config_hash)
        {
            debug!(scanner = %config.name, %config_hash, "result cache hit");
            cached.cache_hit = true;
            return cached;
        }

        let universe = self.build_universe(config).await;
        info!(scanner = %config.name, universe = universe.len(), "scanning");

        let (snapshots, completed_fetches) =
            self.fetch_snapshots(&universe, config, options.deadline).await;

        let mut results = snapshots
            .iter()
            .filter_map(|snapshot| evaluate_snapshot(config, snapshot))
            .collect::<Vec<_>>();

        sort_results(&mut results, config);
        results.truncate(config.effective_limit());
        for (index, result) in results.iter_mut().enumerate() {
            result.rank = Some(index as u32 + 1);
        }

        let response = ScannerResponse {
            scanner_id: config_hash.clone(),
            scanner_name: config.name.clone(),
            total_matches: results.len(),
            results,
            total_scanned: completed_fetches,
            scan_duration_ms: self
                .clock
                .monotonic()
                .saturating_sub(started)
                .as_millis() as u64,
            cache_hit: false,
            scan_time: self.clock.now(),
        };

        self.cache.insert(config_hash, response.clone());
        response
    }

    /// Re-run the scan on an interval (clamped to [30 s, 3600 s]), yielding
    /// result deltas. The worker stops when the stream is dropped.
    pub fn subscribe(self: &Arc<Self>, config: ScannerConfig, interval_secs: u64) -> ScannerStream {
        let interval = Duration::from_secs(clamp_stream_interval(interval_secs));
        let engine = Arc::clone(self);
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut previous: Option<ScannerResponse> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let response = engine
                    .run(&config, RunOptions { force: true, deadline: None })
                    .await;

                let delta = match &previous {
                    Some(previous) => ScannerDelta::between(previous, &response),
                    None => ScannerDelta {
                        scanner_id: response.scanner_id.clone(),
                        added: response.results.clone(),
                        removed: Vec::new(),
                        updated: Vec::new(),
                        total_matches: response.total_matches,
                        scan_time: response.scan_time,
                    },
                };

                if !delta.is_empty() && tx.send(delta).await.is_err() {
                    return;
                }
                previous = Some(response);
            }
        });

        ScannerStream { rx, task }
    }

    async fn build_universe(&self, config: &ScannerConfig) -> Vec<SmolStr> {
        let mut universe = BTreeSet::new();

        if let Some(configured) = &config.universe {
            universe.extend(configured.iter().cloned());
        }

        for asset_type in &config.asset_types {
            let provider = self.providers.read().get(asset_type).cloned();
            let Some(provider) = provider else {
                continue;
            };
            match provider.universe().await {
                Ok(symbols) => universe.extend(symbols),
                Err(error) => {
                    warn!(%asset_type, %error, "provider universe unavailable");
                }
            }
        }

        if let Some(excluded) = &config.exclude_symbols {
            for symbol in excluded {
                universe.remove(symbol);
            }
        }

        universe.into_iter().collect()
    }

    /// Fetch snapshots with bounded concurrency, optionally under a
    /// deadline. Returns the snapshots plus the number of completed fetches.
    async fn fetch_snapshots(
        &self,
        universe: &[SmolStr],
        config: &ScannerConfig,
        deadline: Option<Duration>,
    ) -> (Vec<AssetSnapshot>, usize) {
        let fetches = futures::stream::iter(universe.iter().cloned())
            .map(|symbol| {
                let provider = self
                    .providers
                    .read()
                    .get(&AssetType::infer(&symbol))
                    .cloned();
                let time_frame = config.time_frame;
                async move {
                    let result = match provider {
                        Some(provider) => provider.snapshot(&symbol, time_frame).await.map(Some),
                        None => Ok(None),
                    };
                    (symbol, result)
                }
            })
            .buffer_unordered(self.fetch_concurrency);
        let mut fetches = Box::pin(fetches);

        let mut snapshots = Vec::with_capacity(universe.len());
        let mut completed = 0usize;

        let drain = async {
            while let Some((symbol, result)) = fetches.next().await {
                completed += 1;
                match result {
                    Ok(Some(snapshot)) => snapshots.push(snapshot),
                    Ok(None) => debug!(%symbol, "no provider for symbol, dropped"),
                    Err(error) => {
                        warn!(%symbol, %error, "snapshot fetch failed, symbol dropped");
                    }
                }
            }
        };

        match deadline {
            Some(limit) => {
                if tokio::time::timeout(limit, drain).await.is_err() {
                    warn!(total = universe.len(), "scan deadline elapsed, partial result");
                }
            }
            None => drain.await,
        }

        (snapshots, completed)
    }
}

/// Evaluate the filter pipeline in fixed order, short-circuiting on the
/// first rejection: price -> volume -> technical -> fundamental -> momentum
/// -> pattern -> custom tree.
fn evaluate_snapshot(config: &ScannerConfig, snapshot: &AssetSnapshot) -> Option<ScanResult> {
    let mut matched = Vec::new();

    let structured: [(&str, Option<bool>); 6] = [
        (
            "price",
            config.price_filter.as_ref().map(|f| f.matches(snapshot)),
        ),
        (
            "volume",
            config.volume_filter.as_ref().map(|f| f.matches(snapshot)),
        ),
        (
            "technical",
            config.technical_filter.as_ref().map(|f| f.matches(snapshot)),
        ),
        (
            "fundamental",
            config
                .fundamental_filter
                .as_ref()
                .map(|f| f.matches(snapshot)),
        ),
        (
            "momentum",
            config.momentum_filter.as_ref().map(|f| f.matches(snapshot)),
        ),
        (
            "pattern",
            config.pattern_filter.as_ref().map(|f| f.matches(snapshot)),
        ),
    ];

    for (name, outcome) in structured {
        match outcome {
            Some(true) => matched.push(SmolStr::new(name)),
            Some(false) => return None,
            None => {}
        }
    }

    if let Some(custom) = &config.custom_conditions {
        if !FilterGroup::evaluate(custom, snapshot) {
            return None;
        }
        matched.push(SmolStr::new("custom"));
    }

    let active = config.active_filter_count();
    let match_score = if active == 0 {
        100.0
    } else {
        matched.len() as f64 / active as f64 * 100.0
    };

    let mut filter_values = FnvHashMap::default();
    filter_values.insert(
        SmolStr::new("price"),
        snapshot.price.to_f64().unwrap_or(0.0),
    );
    filter_values.insert(SmolStr::new("volume"), snapshot.volume as f64);
    filter_values.insert(
        SmolStr::new("change_percent"),
        snapshot.change_percent.to_f64().unwrap_or(0.0),
    );
    if let Some(ratio) = snapshot.volume_ratio() {
        filter_values.insert(SmolStr::new("volume_ratio"), ratio);
    }
    for (name, value) in &snapshot.indicators {
        filter_values.insert(SmolStr::new(format!("indicators.{name}")), *value);
    }

    Some(ScanResult {
        symbol: snapshot.symbol.clone(),
        name: snapshot.name.clone(),
        asset_type: snapshot.asset_type,
        price: snapshot.price,
        change_percent: snapshot.change_percent,
        volume: snapshot.volume,
        match_score,
        matched_filters: matched,
        filter_values,
        patterns_detected: snapshot
            .patterns
            .iter()
            .map(|pattern| pattern.kind.clone())
            .collect(),
        rank: None,
        time: snapshot.time,
        time_frame: config.time_frame,
    })
}

/// Sort by the configured key (falling back to `match_score` descending);
/// ties always break by symbol ascending so runs are deterministic.
fn sort_results(results: &mut [ScanResult], config: &ScannerConfig) {
    let descending = matches!(
        config.sort_direction,
        crate::config::SortDirection::Desc
    );

    results.sort_by(|a, b| {
        let ordering = match config.sort_by.as_deref() {
            None | Some("match_score") => compare_f64(a.match_score, b.match_score),
            Some("symbol") => a.symbol.cmp(&b.symbol),
            Some("price") => a.price.cmp(&b.price),
            Some("volume") => a.volume.cmp(&b.volume),
            Some("change_percent") => a.change_percent.cmp(&b.change_percent),
            Some(key) => compare_f64(
                a.filter_values.get(key).copied().unwrap_or(0.0),
                b.filter_values.get(key).copied().unwrap_or(0.0),
            ),
        };

        let ordering = if descending { ordering.reverse() } else { ordering };
        ordering.then_with(|| a.symbol.cmp(&b.symbol))
    });
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

pub fn clamp_stream_interval(interval_secs: u64) -> u64 {
    interval_secs.clamp(MIN_STREAM_INTERVAL_SECS, MAX_STREAM_INTERVAL_SECS)
}

/// Stream of [`ScannerDelta`]s from an interval-driven scanner
/// subscription. Dropping the stream cancels the worker.
#[derive(Debug)]
pub struct ScannerStream {
    rx: mpsc::Receiver<ScannerDelta>,
    task: tokio::task::JoinHandle<()>,
}

impl futures::Stream for ScannerStream {
    type Item = ScannerDelta;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ScannerStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests;
