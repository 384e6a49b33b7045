use crate::model::{AssetSnapshot, TimeFrame};
use async_trait::async_trait;
use smol_str::SmolStr;
use thiserror::Error;

/// Why a provider could not serve a symbol.
///
/// A per-symbol failure drops that symbol from the scan; it never fails the
/// whole run.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProviderError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(SmolStr),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited by upstream")]
    RateLimited,
}

/// Upstream market-data source for one asset type: OHLCV + indicator
/// snapshots plus the universe of symbols it covers.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn universe(&self) -> Result<Vec<SmolStr>, ProviderError>;

    async fn snapshot(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
    ) -> Result<AssetSnapshot, ProviderError>;
}
