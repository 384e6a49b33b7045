use crate::api::{FeatureGate, GateDecision, UserPrincipal};
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::sync::Arc;
use terrapin_execution::error::BrokerError;
use terrapin_integration::clock::SharedClock;
use terrapin_scanner::{
    aggregate::{AggregatedResult, AggregationService, ScannerRef},
    config::ScannerConfig,
    engine::{RunOptions, ScannerEngine},
    result::ScannerResponse,
};
use terrapin_stream::{
    hub::SubscriptionHub,
    subject::{EventType, Subject},
};
use tracing::{info, warn};

const RUN_CAPABILITY: &str = "scanners.run";

/// Scanner runs and interval-driven streaming subscriptions bridged onto
/// the hub's scanner plane.
pub struct ScannerService {
    clock: SharedClock,
    engine: Arc<ScannerEngine>,
    aggregation: Arc<AggregationService>,
    hub: SubscriptionHub,
    gate: Arc<dyn FeatureGate>,
    streams: Mutex<FnvHashMap<SmolStr, tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for ScannerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerService")
            .field("active_streams", &self.streams.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScannerService {
    pub fn new(
        clock: SharedClock,
        engine: Arc<ScannerEngine>,
        aggregation: Arc<AggregationService>,
        hub: SubscriptionHub,
        gate: Arc<dyn FeatureGate>,
    ) -> Self {
        Self {
            clock,
            engine,
            aggregation,
            hub,
            gate,
            streams: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn engine(&self) -> &Arc<ScannerEngine> {
        &self.engine
    }

    pub fn aggregation(&self) -> &Arc<AggregationService> {
        &self.aggregation
    }

    /// Run a scanner configuration once.
    pub async fn run(
        &self,
        user: &UserPrincipal,
        config: &ScannerConfig,
        options: RunOptions,
    ) -> Result<ScannerResponse, BrokerError> {
        if let GateDecision::Deny { reason } = self.gate.allow(user, RUN_CAPABILITY, 1) {
            return Err(BrokerError::Validation(reason));
        }
        Ok(self.engine.run(config, options).await)
    }

    /// Start an interval-driven streaming subscription. Deltas are published
    /// on `scanner:{scanner_id}` with the `scanner_result` event type;
    /// re-subscribing under the same id replaces the stream.
    pub fn subscribe_stream(
        &self,
        scanner_id: impl Into<SmolStr>,
        config: ScannerConfig,
        interval_secs: u64,
    ) {
        let scanner_id = scanner_id.into();
        let hub = self.hub.clone();
        let subject = Subject::Scanner(scanner_id.clone());
        let mut stream = self.engine.subscribe(config, interval_secs);

        let task = tokio::spawn(async move {
            while let Some(delta) = stream.next().await {
                match serde_json::to_value(&delta) {
                    Ok(data) => {
                        hub.publish(&subject, EventType::ScannerResult, data);
                    }
                    Err(error) => {
                        warn!(%subject, %error, "failed to serialize scanner delta");
                    }
                }
            }
        });

        if let Some(previous) = self.streams.lock().insert(scanner_id.clone(), task) {
            previous.abort();
        }
        info!(%scanner_id, interval_secs, "scanner stream started");
    }

    /// Stop a streaming subscription.
    pub fn unsubscribe_stream(&self, scanner_id: &str) -> bool {
        match self.streams.lock().remove(scanner_id) {
            Some(task) => {
                task.abort();
                info!(%scanner_id, "scanner stream stopped");
                true
            }
            None => false,
        }
    }

    /// Combine several scanner runs and broadcast each aggregated symbol on
    /// its symbol subject.
    pub fn aggregate_and_broadcast(
        &self,
        runs: &[(ScannerRef, ScannerResponse)],
    ) -> Vec<AggregatedResult> {
        let results = self.aggregation.aggregate(runs);

        for result in &results {
            match serde_json::to_value(result) {
                Ok(data) => {
                    self.hub.publish(
                        &Subject::Symbol(result.symbol.clone()),
                        EventType::AggregatedResult,
                        data,
                    );
                }
                Err(error) => {
                    warn!(symbol = %result.symbol, %error, "failed to serialize aggregated result");
                }
            }
        }

        info!(
            symbols = results.len(),
            at = %self.clock.now(),
            "aggregated and broadcast scanner results"
        );
        results
    }
}
