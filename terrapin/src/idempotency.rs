use crate::store::{InMemoryStore, KeyValueStore, StoreUnavailable, encode_value, entity_key};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use terrapin_integration::clock::SharedClock;
use tracing::{debug, warn};

const RECORD_KIND: &str = "idem";
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scope an idempotency key is bound to.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Scope {
    pub user_id: Option<SmolStr>,
    pub account_id: Option<SmolStr>,
}

impl Scope {
    pub fn user_account(user_id: impl Into<SmolStr>, account_id: impl Into<SmolStr>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            account_id: Some(account_id.into()),
        }
    }
}

/// Stored record of a completed idempotent operation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IdempotencyRecord {
    pub scoped_key: String,
    pub request_hash: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an idempotency probe.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    /// Same key, same fingerprint: the stored response must be returned
    /// verbatim.
    Hit(serde_json::Value),
    Miss,
    /// Same key with a different request fingerprint. The operation must be
    /// rejected, never executed twice.
    Conflict,
    /// The backing store reported itself unavailable; callers may treat this
    /// (and only this) as a miss.
    Unavailable,
}

/// Keyed cache of request-fingerprint -> completed response with TTL and
/// per-user/per-account scoping.
///
/// Expired records are collected lazily on access and periodically by the
/// sweeper task.
pub struct IdempotencyStore {
    clock: SharedClock,
    backend: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl IdempotencyStore {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_backend(clock, Arc::new(InMemoryStore::new()))
    }

    pub fn with_backend(clock: SharedClock, backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            clock,
            backend,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Compose the on-wire scoped key:
    /// `key:user:{user_id}:account:{account_id}`.
    pub fn scoped_key(key: &str, scope: &Scope) -> String {
        let mut components = vec![key.to_owned()];
        if let Some(user_id) = &scope.user_id {
            components.push(format!("user:{user_id}"));
        }
        if let Some(account_id) = &scope.account_id {
            components.push(format!("account:{account_id}"));
        }
        components.join(":")
    }

    /// Probe for a previously completed request with this key and scope.
    pub fn check(&self, key: &str, request_hash: &str, scope: &Scope) -> IdempotencyCheck {
        let scoped = Self::scoped_key(key, scope);

        let stored = match self.backend.get(&entity_key(RECORD_KIND, &scoped)) {
            Ok(stored) => stored,
            Err(StoreUnavailable(reason)) => {
                warn!(%scoped, %reason, "idempotency backend unavailable");
                return IdempotencyCheck::Unavailable;
            }
        };

        let Some(raw) = stored else {
            return IdempotencyCheck::Miss;
        };
        let Ok(record) = serde_json::from_str::<IdempotencyRecord>(&raw) else {
            warn!(%scoped, "corrupt idempotency record, discarding");
            let _ = self.backend.remove(&entity_key(RECORD_KIND, &scoped));
            return IdempotencyCheck::Miss;
        };

        if self.clock.now() > record.expires_at {
            // Lazy expiry collection.
            let _ = self.backend.remove(&entity_key(RECORD_KIND, &scoped));
            return IdempotencyCheck::Miss;
        }

        if record.request_hash != request_hash {
            warn!(%scoped, "idempotency key reused with a different request");
            return IdempotencyCheck::Conflict;
        }

        debug!(%scoped, "idempotency hit, returning stored response");
        IdempotencyCheck::Hit(record.response)
    }

    /// Record a completed response. Append-only per scoped key: re-storing
    /// the same fingerprint is a no-op, and a live record is never replaced.
    pub fn store(
        &self,
        key: &str,
        request_hash: &str,
        response: serde_json::Value,
        scope: &Scope,
        ttl: Option<Duration>,
    ) {
        let scoped = Self::scoped_key(key, scope);
        let storage_key = entity_key(RECORD_KIND, &scoped);

        match self.check(key, request_hash, scope) {
            IdempotencyCheck::Hit(_) => return,
            IdempotencyCheck::Conflict => {
                warn!(%scoped, "refusing to overwrite live idempotency record");
                return;
            }
            IdempotencyCheck::Miss | IdempotencyCheck::Unavailable => {}
        }

        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let record = IdempotencyRecord {
            scoped_key: scoped.clone(),
            request_hash: request_hash.to_owned(),
            response,
            created_at: now,
            expires_at: now + TimeDelta::from_std(ttl).unwrap_or(TimeDelta::hours(24)),
        };

        let encoded = match encode_value(&record) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(%scoped, %error, "failed to encode idempotency record");
                return;
            }
        };
        if let Err(StoreUnavailable(reason)) = self.backend.put(&storage_key, encoded) {
            warn!(%scoped, %reason, "failed to persist idempotency record");
        }
    }

    /// Drop every expired record. Called periodically by the sweeper.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let Ok(keys) = self.backend.keys_with_prefix(&format!("{RECORD_KIND}:")) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            let Ok(Some(raw)) = self.backend.get(&key) else {
                continue;
            };
            let expired = serde_json::from_str::<IdempotencyRecord>(&raw)
                .map(|record| now > record.expires_at)
                .unwrap_or(true);
            if expired && self.backend.remove(&key).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "swept expired idempotency records");
        }
        removed
    }

    /// Background sweeper companion to the lazy on-access collection.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrapin_integration::clock::MockClock;

    fn store() -> (Arc<IdempotencyStore>, MockClock) {
        let (clock, handle) = MockClock::shared(Utc::now());
        (Arc::new(IdempotencyStore::new(clock)), handle)
    }

    fn scope() -> Scope {
        Scope::user_account("user-1", "acct-1")
    }

    #[test]
    fn test_scoped_key_composition() {
        assert_eq!(
            IdempotencyStore::scoped_key("k1", &scope()),
            "k1:user:user-1:account:acct-1"
        );
        assert_eq!(IdempotencyStore::scoped_key("k1", &Scope::default()), "k1");
        assert_eq!(
            IdempotencyStore::scoped_key(
                "k1",
                &Scope {
                    user_id: Some("user-1".into()),
                    account_id: None
                }
            ),
            "k1:user:user-1"
        );
    }

    #[test]
    fn test_hit_returns_stored_response_until_expiry() {
        let (store, clock) = store();
        let response = serde_json::json!({"success": true, "order_id": "ord_1"});

        assert_eq!(store.check("k1", "hash-a", &scope()), IdempotencyCheck::Miss);
        store.store("k1", "hash-a", response.clone(), &scope(), None);

        for _ in 0..3 {
            assert_eq!(
                store.check("k1", "hash-a", &scope()),
                IdempotencyCheck::Hit(response.clone())
            );
        }

        clock.advance(Duration::from_secs(24 * 60 * 60 + 1));
        assert_eq!(store.check("k1", "hash-a", &scope()), IdempotencyCheck::Miss);
    }

    #[test]
    fn test_same_key_different_hash_conflicts() {
        let (store, _) = store();
        store.store("k1", "hash-a", serde_json::json!({}), &scope(), None);

        assert_eq!(
            store.check("k1", "hash-b", &scope()),
            IdempotencyCheck::Conflict
        );

        // The conflicting store must not replace the original.
        store.store("k1", "hash-b", serde_json::json!({"other": true}), &scope(), None);
        assert_eq!(
            store.check("k1", "hash-a", &scope()),
            IdempotencyCheck::Hit(serde_json::json!({}))
        );
    }

    #[test]
    fn test_scopes_isolate_keys() {
        let (store, _) = store();
        store.store("k1", "hash-a", serde_json::json!(1), &scope(), None);

        let other_user = Scope::user_account("user-2", "acct-1");
        assert_eq!(store.check("k1", "hash-a", &other_user), IdempotencyCheck::Miss);

        let other_account = Scope::user_account("user-1", "acct-2");
        assert_eq!(
            store.check("k1", "hash-a", &other_account),
            IdempotencyCheck::Miss
        );
    }

    #[test]
    fn test_repeated_store_same_hash_is_noop() {
        let (store, _) = store();
        store.store("k1", "hash-a", serde_json::json!({"v": 1}), &scope(), None);
        store.store("k1", "hash-a", serde_json::json!({"v": 2}), &scope(), None);

        assert_eq!(
            store.check("k1", "hash-a", &scope()),
            IdempotencyCheck::Hit(serde_json::json!({"v": 1}))
        );
    }

    #[test]
    fn test_purge_expired_sweeps_only_stale_records() {
        let (store, clock) = store();
        store.store(
            "short",
            "hash-a",
            serde_json::json!(1),
            &scope(),
            Some(Duration::from_secs(10)),
        );
        store.store("long", "hash-b", serde_json::json!(2), &scope(), None);

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(
            store.check("long", "hash-b", &scope()),
            IdempotencyCheck::Hit(serde_json::json!(2))
        );
    }

    #[test]
    fn test_unavailable_backend_reports_unavailable() {
        #[derive(Debug)]
        struct DownStore;

        impl KeyValueStore for DownStore {
            fn get(&self, _: &str) -> Result<Option<String>, StoreUnavailable> {
                Err(StoreUnavailable("connection refused".into()))
            }
            fn put(&self, _: &str, _: String) -> Result<(), StoreUnavailable> {
                Err(StoreUnavailable("connection refused".into()))
            }
            fn remove(&self, _: &str) -> Result<(), StoreUnavailable> {
                Err(StoreUnavailable("connection refused".into()))
            }
            fn keys_with_prefix(&self, _: &str) -> Result<Vec<String>, StoreUnavailable> {
                Err(StoreUnavailable("connection refused".into()))
            }
        }

        let (clock, _) = MockClock::shared(Utc::now());
        let store = IdempotencyStore::with_backend(clock, Arc::new(DownStore));
        assert_eq!(
            store.check("k1", "hash-a", &scope()),
            IdempotencyCheck::Unavailable
        );
    }
}
