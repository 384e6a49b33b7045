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

//! # Terrapin-Execution
//! Normalised order plane capable of routing client order intents across
//! heterogeneous broker back-ends with at-most-once semantics.
//! **It is:**
//! * **Normalised**: every venue speaks the same `Order`/`Fill`/`Position`/
//!   `Account` model and the same closed [`BrokerError`](error::BrokerError)
//!   taxonomy.
//! * **Formal**: order state lives in a declared-transition lifecycle; illegal
//!   transitions are typed results, never panics.
//! * **Reconciled**: asynchronous broker fills arrive through
//!   [`WebhookIntake`](webhook::WebhookIntake), are deduplicated, translated
//!   into transition intents and applied under per-order locks.
//!
//! The paper adapter produces plausible fills without touching a real venue;
//! the alpaca-like adapter speaks signed HTTP; the ib-like adapter drives a
//! persistent local-gateway session.

use serde::{Deserialize, Serialize};

/// Normalised order, fill, position and account model.
pub mod model;

/// Closed broker error taxonomy.
pub mod error;

/// Order lifecycle state machine with per-order locks.
pub mod lifecycle;

/// Broker adapter trait, shared adapter mechanisms, and the venue
/// implementations.
pub mod adapter;

/// Inbound broker webhook verification, dedup and translation.
pub mod webhook;

/// Venue the order plane routes to.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    #[display("paper")]
    Paper,
    #[display("alpaca")]
    Alpaca,
    #[display("ib")]
    Ib,
}

impl BrokerKind {
    /// Parse the path segment of `POST /webhooks/{broker_kind}`.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "paper" => Some(Self::Paper),
            "alpaca" => Some(Self::Alpaca),
            "ib" => Some(Self::Ib),
            _ => None,
        }
    }
}
