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

//! # Terrapin-Stream
//! Connection registry and fan-out hub for streaming clients.
//! **It guarantees:**
//! * **Scoped delivery**: an event for subject `S` reaches connection `C`
//!   only while `(C, S)` is subscribed at the moment of delivery.
//! * **Per-subject ordering**: each connection drains a single FIFO queue, so
//!   a later event for `S` is never delivered before an earlier one.
//! * **Bounded memory**: outbound queues are capped (default 256); overflow
//!   applies the connection's policy (`DropOldest` or `Disconnect`) and every
//!   drop is counted.
//! * **Rate limits**: a per-connection message-rate ceiling and an optional
//!   per-`(connection, subject)` minimum spacing.
//!
//! Transports bind a [`ClientSink`](connection::ClientSink) per connection;
//! the hub itself never touches a socket.

/// Fan-out subjects and event-type masks.
pub mod subject;

/// Client commands and server message envelopes.
pub mod message;

/// Per-connection state: sink, bounded queue, overflow policy.
pub mod connection;

/// The subscription hub.
pub mod hub;

#[cfg(test)]
mod tests;
