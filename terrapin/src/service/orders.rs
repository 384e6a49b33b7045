use crate::{
    api::{
        AccountResponse, FeatureGate, GateDecision, OrderResponse, OrdersResponse,
        PlaceOrderRequest, PositionsResponse, UserPrincipal,
    },
    idempotency::{IdempotencyCheck, IdempotencyStore, Scope},
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::sync::Arc;
use terrapin_execution::{
    BrokerKind,
    adapter::BrokerAdapter,
    error::{BrokerError, LifecycleError},
    lifecycle::{OrderLifecycle, TransitionAttempt, TransitionCtx},
    model::{
        Order, OrderFilter, OrderStatus, OrderUpdate,
        id::{AccountId, OrderId},
    },
};
use terrapin_integration::{clock::SharedClock, hash::canonical_hash, id::IdGenerator};
use tracing::{info, warn};

const PLACE_CAPABILITY: &str = "orders.place";

/// Idempotent order routing: every operation resolves the owning broker
/// adapter, drives the lifecycle, and answers with the public envelope.
pub struct OrderService {
    clock: SharedClock,
    ids: Arc<IdGenerator>,
    lifecycle: Arc<OrderLifecycle>,
    idempotency: Arc<IdempotencyStore>,
    gate: Arc<dyn FeatureGate>,
    adapters: RwLock<FnvHashMap<BrokerKind, Arc<dyn BrokerAdapter>>>,
    account_routes: RwLock<FnvHashMap<AccountId, BrokerKind>>,
    default_broker: RwLock<Option<BrokerKind>>,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("adapters", &self.adapters.read().len())
            .field("default_broker", &*self.default_broker.read())
            .finish_non_exhaustive()
    }
}

impl OrderService {
    pub fn new(
        clock: SharedClock,
        ids: Arc<IdGenerator>,
        lifecycle: Arc<OrderLifecycle>,
        idempotency: Arc<IdempotencyStore>,
        gate: Arc<dyn FeatureGate>,
    ) -> Self {
        Self {
            clock,
            ids,
            lifecycle,
            idempotency,
            gate,
            adapters: RwLock::new(FnvHashMap::default()),
            account_routes: RwLock::new(FnvHashMap::default()),
            default_broker: RwLock::new(None),
        }
    }

    /// Register an adapter. The first registration becomes the default
    /// route.
    pub fn register_adapter(&self, adapter: Arc<dyn BrokerAdapter>) {
        let kind = adapter.kind();
        self.adapters.write().insert(kind, adapter);
        self.default_broker.write().get_or_insert(kind);
    }

    /// Route an account to a specific broker.
    pub fn route_account(&self, account: AccountId, broker: BrokerKind) {
        self.account_routes.write().insert(account, broker);
    }

    fn adapter_for(&self, account: &AccountId) -> Result<Arc<dyn BrokerAdapter>, BrokerError> {
        let kind = self
            .account_routes
            .read()
            .get(account)
            .copied()
            .or(*self.default_broker.read())
            .ok_or_else(|| BrokerError::Internal("no broker adapter registered".into()))?;

        self.adapters
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| BrokerError::Internal(format!("broker {kind} not registered")))
    }

    /// Place an order with at-most-once semantics.
    ///
    /// When an idempotency key is supplied, a repeat of the same request
    /// returns the stored response byte-for-byte, and key reuse with a
    /// different body is rejected without touching a venue.
    pub async fn place_order(
        &self,
        user: &UserPrincipal,
        request: &PlaceOrderRequest,
        idempotency_key: Option<&str>,
    ) -> OrderResponse {
        let now = self.clock.now();

        if let GateDecision::Deny { reason } = self.gate.allow(user, PLACE_CAPABILITY, 1) {
            return OrderResponse::error(&BrokerError::Validation(reason), now);
        }

        let scope = Scope {
            user_id: Some(user.id.clone()),
            account_id: Some(SmolStr::new(request.account_id.as_str())),
        };
        let request_hash = match canonical_hash(request) {
            Ok(hash) => hash,
            Err(error) => {
                return OrderResponse::error(&BrokerError::Internal(error.to_string()), now);
            }
        };

        if let Some(key) = idempotency_key {
            match self.idempotency.check(key, &request_hash, &scope) {
                IdempotencyCheck::Hit(stored) => {
                    return serde_json::from_value(stored).unwrap_or_else(|error| {
                        OrderResponse::error(&BrokerError::Internal(error.to_string()), now)
                    });
                }
                IdempotencyCheck::Conflict => {
                    return OrderResponse::error(
                        &BrokerError::Validation(format!(
                            "idempotency key {key} was used with different request data"
                        )),
                        now,
                    );
                }
                IdempotencyCheck::Miss | IdempotencyCheck::Unavailable => {}
            }
        }

        let response = self.execute_place(request).await;

        if let Some(key) = idempotency_key
            && response.success
            && let Ok(stored) = serde_json::to_value(&response)
        {
            self.idempotency.store(key, &request_hash, stored, &scope, None);
        }

        response
    }

    async fn execute_place(&self, request: &PlaceOrderRequest) -> OrderResponse {
        let now = self.clock.now();
        let adapter = match self.adapter_for(&request.account_id) {
            Ok(adapter) => adapter,
            Err(error) => return OrderResponse::error(&error, now),
        };

        let order = Order::from_request(
            OrderId(self.ids.order_id()),
            request.account_id.clone(),
            &request.order,
            now,
        );

        if let Err(error) = adapter.validate(&order) {
            return OrderResponse::error(&error, now);
        }

        if request.dry_run {
            return OrderResponse::ok(order, now);
        }

        // Track before the venue call so early webhooks find the order.
        if let Err(error) = self.lifecycle.insert(order.clone()) {
            return OrderResponse::error(&BrokerError::Internal(error.to_string()), now);
        }

        match adapter.place_order(&order).await {
            Ok(placed) => {
                let _ = self
                    .lifecycle
                    .merge_broker_meta(&order.id, placed.broker_meta.clone());
                let _ = self.lifecycle.transition(
                    TransitionAttempt::new(order.id.clone(), OrderStatus::Submitted)
                        .with_expected(OrderStatus::Pending),
                );

                let current = self.lifecycle.get(&order.id).unwrap_or(placed);
                info!(order_id = %order.id, symbol = %current.symbol, "order placed");

                let broker_request_id = current
                    .broker_meta
                    .get("venue_order_id")
                    .or_else(|| current.broker_meta.get("gateway_order_id"))
                    .cloned();

                let mut response = OrderResponse::ok(current, self.clock.now());
                if let Some(broker_request_id) = broker_request_id {
                    response = response.with_broker_request_id(broker_request_id);
                }
                response
            }
            Err(error) => {
                warn!(order_id = %order.id, %error, "venue rejected placement");
                let _ = self.lifecycle.transition(
                    TransitionAttempt::new(order.id.clone(), OrderStatus::Rejected)
                        .with_ctx(TransitionCtx::reason(error.to_string())),
                );
                OrderResponse::error(&error, self.clock.now())
            }
        }
    }

    /// Cancel a working order.
    pub async fn cancel_order(&self, order_id: &OrderId) -> OrderResponse {
        let now = self.clock.now();
        let Some(order) = self.lifecycle.get(order_id) else {
            return OrderResponse::error(&BrokerError::OrderNotFound(order_id.clone()), now);
        };

        let adapter = match self.adapter_for(&order.account) {
            Ok(adapter) => adapter,
            Err(error) => return OrderResponse::error(&error, now),
        };

        if let Err(error) = adapter.cancel_order(order_id).await {
            return OrderResponse::error(&error, now);
        }

        match self.lifecycle.transition(TransitionAttempt::new(
            order_id.clone(),
            OrderStatus::Canceled,
        )) {
            Ok(_) => {
                let current = self.lifecycle.get(order_id).unwrap_or(order);
                OrderResponse::ok(current, self.clock.now())
            }
            // The public boundary surfaces an illegal cancel as a
            // validation-class conflict.
            Err(LifecycleError::InvalidTransition { from, .. }) => OrderResponse::error(
                &BrokerError::Validation(format!("cannot cancel order in status {from}")),
                self.clock.now(),
            ),
            Err(error) => OrderResponse::error(
                &BrokerError::Internal(error.to_string()),
                self.clock.now(),
            ),
        }
    }

    /// Modify a working order's price/quantity/TIF.
    pub async fn modify_order(&self, update: &OrderUpdate) -> OrderResponse {
        let now = self.clock.now();
        let Some(order) = self.lifecycle.get(&update.order_id) else {
            return OrderResponse::error(
                &BrokerError::OrderNotFound(update.order_id.clone()),
                now,
            );
        };

        if order.status.is_terminal() {
            return OrderResponse::error(
                &BrokerError::Validation(format!(
                    "cannot modify order in status {}",
                    order.status
                )),
                now,
            );
        }

        let adapter = match self.adapter_for(&order.account) {
            Ok(adapter) => adapter,
            Err(error) => return OrderResponse::error(&error, now),
        };

        match adapter.modify_order(update).await {
            Ok(_) => match self.lifecycle.apply_update(update) {
                Ok(updated) => OrderResponse::ok(updated, self.clock.now()),
                Err(error) => OrderResponse::error(
                    &BrokerError::Internal(error.to_string()),
                    self.clock.now(),
                ),
            },
            Err(error) => OrderResponse::error(&error, self.clock.now()),
        }
    }

    pub async fn get_order(&self, order_id: &OrderId) -> OrderResponse {
        let now = self.clock.now();
        match self.lifecycle.get(order_id) {
            Some(order) => OrderResponse::ok(order, now),
            None => OrderResponse::error(&BrokerError::OrderNotFound(order_id.clone()), now),
        }
    }

    pub fn list_orders(&self, filter: &OrderFilter) -> OrdersResponse {
        OrdersResponse {
            success: true,
            orders: self.lifecycle.list(filter),
            error: None,
            error_code: None,
            timestamp: self.clock.now(),
        }
    }

    pub async fn get_positions(
        &self,
        account: &AccountId,
        symbol: Option<&str>,
    ) -> PositionsResponse {
        let now = self.clock.now();
        let adapter = match self.adapter_for(account) {
            Ok(adapter) => adapter,
            Err(error) => {
                return PositionsResponse {
                    success: false,
                    positions: Vec::new(),
                    error: Some(error.to_string()),
                    error_code: Some(error.code()),
                    timestamp: now,
                };
            }
        };

        match adapter.get_positions(account, symbol).await {
            Ok(positions) => PositionsResponse {
                success: true,
                positions,
                error: None,
                error_code: None,
                timestamp: self.clock.now(),
            },
            Err(error) => PositionsResponse {
                success: false,
                positions: Vec::new(),
                error: Some(error.to_string()),
                error_code: Some(error.code()),
                timestamp: self.clock.now(),
            },
        }
    }

    pub async fn get_account(&self, account: &AccountId) -> AccountResponse {
        let now = self.clock.now();
        let adapter = match self.adapter_for(account) {
            Ok(adapter) => adapter,
            Err(error) => {
                return AccountResponse {
                    success: false,
                    account: None,
                    error: Some(error.to_string()),
                    error_code: Some(error.code()),
                    timestamp: now,
                };
            }
        };

        match adapter.get_account(account).await {
            Ok(account) => AccountResponse {
                success: true,
                account: Some(account),
                error: None,
                error_code: None,
                timestamp: self.clock.now(),
            },
            Err(error) => AccountResponse {
                success: false,
                account: None,
                error: Some(error.to_string()),
                error_code: Some(error.code()),
                timestamp: self.clock.now(),
            },
        }
    }
}
