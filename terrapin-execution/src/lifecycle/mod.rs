use crate::{
    error::LifecycleError,
    model::{
        Order, OrderFilter, OrderStatus,
        event::OrderEvent,
        id::{EventId, OrderId},
    },
};
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHasher};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::{
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use terrapin_integration::{clock::SharedClock, id::IdGenerator};
use tracing::{debug, info, warn};

/// Declared transition table.
pub mod table;

pub use table::{declared, event_label, valid_targets};

/// Context carried by a transition attempt: fill accounting inputs and
/// free-form metadata recorded on the emitted event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionCtx {
    pub fill_quantity: Option<Decimal>,
    pub fill_price: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub reason: Option<String>,
    pub meta: FnvHashMap<SmolStr, SmolStr>,
}

impl TransitionCtx {
    pub fn fill(quantity: Decimal, price: Decimal) -> Self {
        Self {
            fill_quantity: Some(quantity),
            fill_price: Some(price),
            ..Self::default()
        }
    }

    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission = Some(commission);
        self
    }
}

/// A single attempted status transition for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionAttempt {
    pub order_id: OrderId,
    /// Expected current status. Advisory: a mismatch is tolerated as long as
    /// the transition from the *actual* current status to `target` is
    /// declared, which keeps webhook replays and reordered events safe.
    pub expected: Option<OrderStatus>,
    pub target: OrderStatus,
    pub ctx: TransitionCtx,
}

impl TransitionAttempt {
    pub fn new(order_id: OrderId, target: OrderStatus) -> Self {
        Self {
            order_id,
            expected: None,
            target,
            ctx: TransitionCtx::default(),
        }
    }

    pub fn with_expected(mut self, expected: OrderStatus) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_ctx(mut self, ctx: TransitionCtx) -> Self {
        self.ctx = ctx;
        self
    }
}

/// Explicit pre/post hooks run inside the per-order lock.
pub trait TransitionAction: Send + Sync {
    fn before(&self, _order: &Order, _target: OrderStatus, _ctx: &TransitionCtx) {}
    fn after(&self, _order: &Order, _event: &OrderEvent) {}
}

/// Typed subscriber notified after the per-order lock is released.
pub trait OrderEventListener: Send + Sync {
    fn on_event(&self, order: &Order, event: &OrderEvent);
}

const SHARD_COUNT: usize = 16;

/// Order lifecycle: the order table partitioned by id, the declared
/// transition machine, and event emission.
///
/// Per-order transitions are serialized by the owning shard lock; there is
/// never more than one in-flight mutation per order and no global lock.
/// Illegal transitions return [`LifecycleError::InvalidTransition`] and are
/// counted, never raised.
pub struct OrderLifecycle {
    clock: SharedClock,
    ids: Arc<IdGenerator>,
    shards: Vec<Mutex<FnvHashMap<OrderId, Order>>>,
    actions: RwLock<Vec<Arc<dyn TransitionAction>>>,
    listeners: RwLock<Vec<Arc<dyn OrderEventListener>>>,
    invalid_transitions: AtomicU64,
}

impl std::fmt::Debug for OrderLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderLifecycle")
            .field("shards", &self.shards.len())
            .field(
                "invalid_transitions",
                &self.invalid_transitions.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl OrderLifecycle {
    pub fn new(clock: SharedClock, ids: Arc<IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(FnvHashMap::default()))
                .collect(),
            actions: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            invalid_transitions: AtomicU64::new(0),
        }
    }

    pub fn add_action(&self, action: Arc<dyn TransitionAction>) {
        self.actions.write().push(action);
    }

    pub fn add_listener(&self, listener: Arc<dyn OrderEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Illegal transition attempts observed so far.
    pub fn invalid_transition_count(&self) -> u64 {
        self.invalid_transitions.load(Ordering::Relaxed)
    }

    /// Track a freshly created order. The order must be in a non-terminal
    /// state (normally `Pending`).
    pub fn insert(&self, order: Order) -> Result<(), LifecycleError> {
        let mut shard = self.shard(&order.id).lock();
        if shard.contains_key(&order.id) {
            return Err(LifecycleError::DuplicateOrder(order.id.clone()));
        }
        debug!(order_id = %order.id, status = %order.status, "tracking order");
        shard.insert(order.id.clone(), order);
        Ok(())
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.shard(order_id).lock().get(order_id).cloned()
    }

    pub fn list(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut orders = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .values()
                    .filter(|order| filter.matches(order))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        orders
    }

    /// Merge venue metadata into a tracked order (eg/ the venue order id
    /// learnt on placement).
    pub fn merge_broker_meta(
        &self,
        order_id: &OrderId,
        meta: impl IntoIterator<Item = (SmolStr, SmolStr)>,
    ) -> Result<(), LifecycleError> {
        let mut shard = self.shard(order_id).lock();
        let order = shard
            .get_mut(order_id)
            .ok_or_else(|| LifecycleError::OrderNotFound(order_id.clone()))?;
        order.broker_meta.extend(meta);
        Ok(())
    }

    /// Apply a venue-acknowledged modification to the tracked order's
    /// non-lifecycle fields.
    pub fn apply_update(&self, update: &crate::model::OrderUpdate) -> Result<Order, LifecycleError> {
        let now = self.clock.now();
        let mut shard = self.shard(&update.order_id).lock();
        let order = shard
            .get_mut(&update.order_id)
            .ok_or_else(|| LifecycleError::OrderNotFound(update.order_id.clone()))?;

        if let Some(limit_price) = update.limit_price {
            order.limit_price = Some(limit_price);
        }
        if let Some(stop_price) = update.stop_price {
            order.stop_price = Some(stop_price);
        }
        if let Some(quantity) = update.quantity {
            order.quantity = quantity;
        }
        if let Some(time_in_force) = update.time_in_force {
            order.time_in_force = time_in_force;
        }
        order.updated_at = now;
        Ok(order.clone())
    }

    /// Drop terminal orders whose last update is older than `before`.
    pub fn purge_terminal(&self, before: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let len_before = shard.len();
            shard.retain(|_, order| !(order.status.is_terminal() && order.updated_at < before));
            removed += len_before - shard.len();
        }
        removed
    }

    /// Attempt a declared status transition.
    ///
    /// The order is looked up under its shard lock; the current status must
    /// have a declared transition to `attempt.target`. On success the order
    /// is mutated (including fill accounting), an [`OrderEvent`] is written,
    /// and listeners are notified after the lock is released.
    pub fn transition(&self, attempt: TransitionAttempt) -> Result<OrderEvent, LifecycleError> {
        let TransitionAttempt {
            order_id,
            expected,
            target,
            ctx,
        } = attempt;

        let now = self.clock.now();
        let (snapshot, event) = {
            let mut shard = self.shard(&order_id).lock();
            let order = shard
                .get_mut(&order_id)
                .ok_or_else(|| LifecycleError::OrderNotFound(order_id.clone()))?;

            let current = order.status;
            if let Some(expected) = expected
                && expected != current
            {
                debug!(
                    %order_id, %expected, actual = %current,
                    "transition expected status mismatch"
                );
            }

            if declared(current, target).is_none() {
                self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
                warn!(%order_id, from = %current, to = %target, "invalid transition");
                return Err(LifecycleError::InvalidTransition {
                    order_id,
                    from: current,
                    to: target,
                });
            }

            for action in self.actions.read().iter() {
                action.before(order, target, &ctx);
            }

            let applied = apply_transition(order, current, target, &ctx, now);

            let event = OrderEvent {
                id: EventId(self.ids.event_id()),
                order_id: order_id.clone(),
                old_status: Some(current),
                new_status: order.status,
                quantity: ctx.fill_quantity,
                price: ctx.fill_price,
                time: now,
                meta: event_meta(&ctx, applied),
            };

            info!(
                %order_id,
                from = %current,
                to = %order.status,
                label = event_label(current, target).unwrap_or("unknown"),
                "order transitioned"
            );

            for action in self.actions.read().iter() {
                action.after(order, &event);
            }

            (order.clone(), event)
        };

        for listener in self.listeners.read().iter() {
            listener.on_event(&snapshot, &event);
        }

        Ok(event)
    }

    fn shard(&self, order_id: &OrderId) -> &Mutex<FnvHashMap<OrderId, Order>> {
        let mut hasher = FnvHasher::default();
        order_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

/// Outcome of fill accounting, recorded on the event metadata.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Applied {
    Plain,
    PartialFill,
    /// A partial fill that completed the order collapsed to `Filled`.
    CollapsedToFilled,
    TerminalFill,
}

fn apply_transition(
    order: &mut Order,
    current: OrderStatus,
    target: OrderStatus,
    ctx: &TransitionCtx,
    now: DateTime<Utc>,
) -> Applied {
    order.updated_at = now;

    let applied = match target {
        OrderStatus::Submitted => {
            order.submitted_at = Some(now);
            order.status = target;
            Applied::Plain
        }
        OrderStatus::Canceled => {
            order.canceled_at = Some(now);
            order.status = target;
            Applied::Plain
        }
        OrderStatus::PartiallyFilled => {
            apply_fill(order, ctx);
            if order.filled_quantity == order.quantity {
                // Fill completed the order: collapse straight to Filled.
                order.status = OrderStatus::Filled;
                order.filled_at = Some(now);
                Applied::CollapsedToFilled
            } else {
                order.status = target;
                Applied::PartialFill
            }
        }
        OrderStatus::Filled => {
            apply_terminal_fill(order, ctx);
            order.status = target;
            order.filled_at = Some(now);
            Applied::TerminalFill
        }
        _ => {
            order.status = target;
            Applied::Plain
        }
    };

    debug!(
        order_id = %order.id,
        from = %current,
        filled = %order.filled_quantity,
        "applied transition"
    );

    applied
}

/// Fold `(quantity, price)` from the context into the order's running fill
/// accounting: weighted average fill price and cumulative commission.
fn apply_fill(order: &mut Order, ctx: &TransitionCtx) {
    let Some(quantity) = ctx.fill_quantity else {
        return;
    };
    let Some(price) = ctx.fill_price else {
        return;
    };

    let previous_filled = order.filled_quantity;
    let new_filled = (previous_filled + quantity).min(order.quantity);
    let applied_quantity = new_filled - previous_filled;

    if applied_quantity > Decimal::ZERO {
        let previous_value =
            order.average_fill_price.unwrap_or(Decimal::ZERO) * previous_filled;
        order.average_fill_price =
            Some((previous_value + price * applied_quantity) / new_filled);
        order.filled_quantity = new_filled;
    }

    if let Some(commission) = ctx.commission {
        order.commission += commission;
    }
}

/// Terminal fill: the remaining quantity is implied.
fn apply_terminal_fill(order: &mut Order, ctx: &TransitionCtx) {
    let remaining = order.remaining_quantity();
    if remaining > Decimal::ZERO {
        let price = ctx
            .fill_price
            .or(order.average_fill_price)
            .unwrap_or(Decimal::ZERO);
        let ctx = TransitionCtx {
            fill_quantity: Some(remaining),
            fill_price: Some(price),
            commission: ctx.commission,
            ..TransitionCtx::default()
        };
        apply_fill(order, &ctx);
    } else if let Some(commission) = ctx.commission {
        order.commission += commission;
    }
}

fn event_meta(ctx: &TransitionCtx, applied: Applied) -> FnvHashMap<SmolStr, SmolStr> {
    let mut meta = ctx.meta.clone();
    if let Some(reason) = &ctx.reason {
        meta.insert(SmolStr::new("reason"), SmolStr::new(reason));
    }
    if applied == Applied::CollapsedToFilled {
        meta.insert(SmolStr::new("collapsed"), SmolStr::new("partial_to_filled"));
    }
    meta
}

#[cfg(test)]
mod tests;
