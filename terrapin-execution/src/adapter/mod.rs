use crate::{
    BrokerKind,
    error::BrokerError,
    lifecycle::TransitionAttempt,
    model::{
        Account, Order, OrderFilter, OrderKind, OrderUpdate, Position,
        id::{AccountId, OrderId},
        quote::Quote,
    },
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::{future::Future, sync::Arc, time::Duration};
use terrapin_integration::{
    cache::TtlCache, clock::SharedClock, id::IdGenerator, limit::TokenBucket, retry::RetryPolicy,
    signature::SignatureScheme,
};

/// Simulated venue producing plausible fills without touching a real broker.
pub mod paper;

/// Alpaca-like HTTP venue.
pub mod alpaca;

/// IB-like venue driven through a persistent local-gateway session.
pub mod ib;

/// Normalised venue contract. Adapters translate every venue-specific failure
/// into the closed [`BrokerError`] taxonomy.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn kind(&self) -> BrokerKind;

    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    async fn is_market_open(&self) -> Result<bool, BrokerError>;

    /// Pre-submit validation without touching the venue. Dry runs stop here.
    fn validate(&self, order: &Order) -> Result<(), BrokerError>;

    /// Submit a plane-minted `Pending` order to the venue. The returned copy
    /// is the venue acknowledgement: `Submitted` status, `submitted_at`, and
    /// venue identifiers in `broker_meta`.
    async fn place_order(&self, order: &Order) -> Result<Order, BrokerError>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, BrokerError>;

    async fn modify_order(&self, update: &OrderUpdate) -> Result<Order, BrokerError>;

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, BrokerError>;

    async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, BrokerError>;

    async fn get_positions(
        &self,
        account: &AccountId,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, BrokerError>;

    async fn get_account(&self, account: &AccountId) -> Result<Account, BrokerError>;

    /// Real-time quotes. Venues without streaming support reject the call.
    async fn stream_quotes(
        &self,
        _symbols: &[SmolStr],
    ) -> Result<BoxStream<'static, Quote>, BrokerError> {
        Err(BrokerError::Validation(
            "streaming quotes not supported by this broker".into(),
        ))
    }

    /// Signature scheme applied to this venue's inbound webhooks.
    fn signature_scheme(&self) -> SignatureScheme;

    /// Translate a parsed webhook body into ordered lifecycle transition
    /// attempts using this venue's status map.
    fn translate_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Vec<TransitionAttempt>, BrokerError>;
}

/// Static adapter configuration, one per venue instance.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub rate_limit_per_minute: u32,
    pub max_order_amount: Option<Decimal>,
    pub allowed_symbols: Option<Vec<SmolStr>>,
    pub commission_per_share: Decimal,
    pub minimum_commission: Decimal,
    pub request_timeout: Duration,
    pub production: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 200,
            max_order_amount: None,
            allowed_symbols: None,
            commission_per_share: Decimal::ZERO,
            minimum_commission: Decimal::ONE,
            request_timeout: Duration::from_secs(30),
            production: false,
        }
    }
}

/// Shared mechanisms implemented once and composed into every adapter:
/// token-bucket rate limiting, bounded retry, 30 s entity caches, and
/// pre-submit validation.
#[derive(Debug)]
pub struct AdapterCore {
    pub clock: SharedClock,
    pub ids: Arc<IdGenerator>,
    pub config: AdapterConfig,
    bucket: TokenBucket,
    retry: RetryPolicy,
    pub order_cache: TtlCache<OrderId, Order>,
    pub position_cache: TtlCache<SmolStr, Position>,
    pub account_cache: TtlCache<AccountId, Account>,
}

const ENTITY_CACHE_TTL: Duration = Duration::from_secs(30);

impl AdapterCore {
    pub fn new(clock: SharedClock, ids: Arc<IdGenerator>, config: AdapterConfig) -> Self {
        let bucket = TokenBucket::per_minute(Arc::clone(&clock), config.rate_limit_per_minute);
        Self {
            order_cache: TtlCache::new(Arc::clone(&clock), ENTITY_CACHE_TTL),
            position_cache: TtlCache::new(Arc::clone(&clock), ENTITY_CACHE_TTL),
            account_cache: TtlCache::new(Arc::clone(&clock), ENTITY_CACHE_TTL),
            bucket,
            retry: RetryPolicy::default(),
            clock,
            ids,
            config,
        }
    }

    /// Take a rate-limit token, or fail with `RateLimit` before the venue is
    /// touched.
    pub fn check_rate_limit(&self) -> Result<(), BrokerError> {
        if self.bucket.try_acquire() {
            Ok(())
        } else {
            Err(BrokerError::RateLimit)
        }
    }

    /// Run a venue operation under the retry policy. Only `Connection` and
    /// `RateLimit` failures are retried.
    pub async fn with_retry<Op, Fut, T>(&self, operation: Op) -> Result<T, BrokerError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        self.retry.retry(operation, BrokerError::is_retryable).await
    }

    /// Pre-submit validation, applied before any venue IO.
    pub fn validate_order(&self, request: &Order) -> Result<(), BrokerError> {
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::Validation(
                "order quantity must be positive".into(),
            ));
        }
        if let Some(price) = request.limit_price
            && price <= Decimal::ZERO
        {
            return Err(BrokerError::Validation("limit price must be positive".into()));
        }
        if let Some(price) = request.stop_price
            && price <= Decimal::ZERO
        {
            return Err(BrokerError::Validation("stop price must be positive".into()));
        }

        match request.kind {
            OrderKind::Limit | OrderKind::StopLimit if request.limit_price.is_none() => {
                return Err(BrokerError::Validation(format!(
                    "{} order requires a limit price",
                    request.kind
                )));
            }
            _ => {}
        }
        match request.kind {
            OrderKind::Stop | OrderKind::StopLimit if request.stop_price.is_none() => {
                return Err(BrokerError::Validation(format!(
                    "{} order requires a stop price",
                    request.kind
                )));
            }
            OrderKind::TrailingStop
                if request.trail_amount.is_none() && request.trail_percent.is_none() =>
            {
                return Err(BrokerError::Validation(
                    "trailing stop order requires a trail amount or percent".into(),
                ));
            }
            _ => {}
        }

        if let Some(allowed) = &self.config.allowed_symbols
            && !allowed.contains(&request.symbol)
        {
            return Err(BrokerError::Validation(format!(
                "symbol {} not allowed for trading",
                request.symbol
            )));
        }

        if let Some(max_amount) = self.config.max_order_amount {
            let estimated = request.quantity * self.estimated_price(request);
            if estimated > max_amount {
                return Err(BrokerError::Validation(format!(
                    "estimated order amount {estimated} exceeds maximum {max_amount}"
                )));
            }
        }

        Ok(())
    }

    fn estimated_price(&self, request: &Order) -> Decimal {
        request
            .limit_price
            .or(request.stop_price)
            .unwrap_or_else(|| Decimal::new(1000, 0))
    }

    /// Per-share commission with a configured minimum.
    pub fn commission(&self, quantity: Decimal) -> Decimal {
        if self.config.commission_per_share.is_zero() {
            return Decimal::ZERO;
        }
        (quantity * self.config.commission_per_share).max(self.config.minimum_commission)
    }

    /// Invalidate every cache entry touched by a mutation or webhook for the
    /// given order.
    pub fn invalidate_order(&self, order: &Order) {
        self.order_cache.invalidate(&order.id);
        self.position_cache.invalidate(&order.symbol);
        self.account_cache.invalidate(&order.account);
    }
}
