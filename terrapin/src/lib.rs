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

//! # Terrapin
//! Real-time order and market-data plane for a retail trading platform.
//!
//! Terrapin accepts client order intents, routes them to one of several
//! heterogeneous broker back-ends with at-most-once semantics, drives each
//! order through a formal lifecycle, reconciles asynchronous fills delivered
//! via broker webhooks, and fans out resulting market and order events to
//! many concurrent subscribers with per-subject rate limits. The multi-asset
//! scanner core shares the same concurrency, caching and fan-out substrate.
//!
//! This crate is the service layer: it wires the execution plane
//! ([`terrapin_execution`]), the streaming hub ([`terrapin_stream`]) and the
//! scanner ([`terrapin_scanner`]) behind idempotent, envelope-shaped public
//! operations. Transports (HTTP routing, WebSocket framing, CLI) bind on
//! top and stay out of this crate.

/// Public request/response envelopes and collaborator seams
/// (`UserPrincipal`, `FeatureGate`).
pub mod api;

/// Request-fingerprint idempotency store.
pub mod idempotency;

/// Pluggable key-value persistence with the in-memory default.
pub mod store;

/// Order, webhook and scanner services plus system wiring.
pub mod service;

pub use service::TradingSystem;
