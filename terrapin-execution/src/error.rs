use crate::model::{OrderStatus, id::OrderId};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed broker error taxonomy. Every venue-specific failure is translated
/// into exactly one of these at the adapter boundary.
///
/// Only `Connection` and `RateLimit` are retryable; everything else surfaces
/// immediately.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum BrokerError {
    #[error("connection: {0}")]
    Connection(String),

    #[error("authentication: {0}")]
    Authentication(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RateLimit)
    }

    /// Stable wire code for the public response envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection(_) => ErrorCode::Connection,
            Self::Authentication(_) => ErrorCode::Authentication,
            Self::Validation(_) => ErrorCode::Validation,
            Self::RateLimit => ErrorCode::RateLimit,
            Self::OrderNotFound(_) => ErrorCode::OrderNotFound,
            Self::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            Self::Connection(error.to_string())
        } else {
            Self::Internal(error.to_string())
        }
    }
}

/// Stable error code carried in public responses; free-text messages are for
/// humans only.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum ErrorCode {
    Validation,
    Authentication,
    Connection,
    RateLimit,
    OrderNotFound,
    InsufficientFunds,
    Internal,
}

/// Failures internal to the order lifecycle. `InvalidTransition` is a result,
/// never a panic: webhook reconciliation consumes it silently while the
/// public boundary maps it to a 409-class error.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum LifecycleError {
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("invalid transition {from} -> {to} for order {order_id}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {0} already exists")]
    DuplicateOrder(OrderId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_and_rate_limit_retryable() {
        assert!(BrokerError::Connection("timeout".into()).is_retryable());
        assert!(BrokerError::RateLimit.is_retryable());

        assert!(!BrokerError::Validation("qty".into()).is_retryable());
        assert!(!BrokerError::Authentication("key".into()).is_retryable());
        assert!(!BrokerError::OrderNotFound(OrderId::from("ord_1")).is_retryable());
        assert!(!BrokerError::InsufficientFunds("cash".into()).is_retryable());
        assert!(!BrokerError::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InsufficientFunds).unwrap(),
            r#""InsufficientFunds""#
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::RateLimit).unwrap(),
            r#""RateLimit""#
        );
    }
}
