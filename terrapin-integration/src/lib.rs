#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Terrapin-Integration
//! Low-level substrate shared by every Terrapin crate. It provides the
//! cross-cutting mechanisms the order plane, scanner and streaming hub are
//! built on:
//! * **Clock** abstraction with live and mock implementations so TTLs, rate
//!   limiters and timestamps are deterministic under test.
//! * **IdGenerator** minting globally unique, lexicographically sortable,
//!   time-prefixed identifiers.
//! * **Canonical hashing** (sorted-key JSON + SHA-256) for idempotency
//!   fingerprints, scanner config hashes and webhook dedup keys.
//! * **Signature schemes** for inbound broker webhooks (constant-time
//!   HMAC-SHA256, plus a pluggable variant).
//! * **TtlCache**, **TokenBucket** and **RetryPolicy** primitives.

/// Wall-clock and monotonic time surface, injected everywhere.
pub mod clock;

/// Collision-free, sortable identifier minting.
pub mod id;

/// Canonical JSON serialization and SHA-256 fingerprinting.
pub mod hash;

/// Inbound webhook signature verification schemes.
pub mod signature;

/// Keyed cache with per-entry TTL, lazy eviction and periodic sweeping.
pub mod cache;

/// Token-bucket rate limiting.
pub mod limit;

/// Retry with exponential backoff and jitter.
pub mod retry;
