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

//! # Terrapin-Scanner
//! Multi-asset scanner core: declarative filter pipelines evaluated over an
//! asset universe, producing ranked matches.
//! **It provides:**
//! * Typed filter conditions (`=, ≠, >, ≥, <, ≤, between, in, contains,
//!   crosses_above, crosses_below`) combined through recursive `AND`/`OR`
//!   groups, plus the six structured filter families
//!   (price/volume/technical/fundamental/momentum/pattern).
//! * A scanning engine with content-addressed result caching, bounded
//!   concurrent snapshot fetching, deadline-aware partial results, and
//!   interval-driven streaming re-runs that yield result deltas.
//! * An aggregation service combining results from many scanners into
//!   weighted, deduplicated insights with per-scanner reliability tracking.

/// Asset snapshots and dotted-path field access.
pub mod model;

/// Filter conditions, groups and the structured filter families.
pub mod filter;

/// Scanner configuration.
pub mod config;

/// Scan results and responses.
pub mod result;

/// Market data provider seam.
pub mod provider;

/// The scanning engine.
pub mod engine;

/// Cross-scanner aggregation.
pub mod aggregate;
