use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use terrapin_execution::{
    error::{BrokerError, ErrorCode},
    model::{Account, Order, OrderRequest, Position, id::AccountId},
};

/// Authenticated caller identity, produced by the authentication
/// collaborator. Opaque to this crate beyond its id.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct UserPrincipal {
    pub id: SmolStr,
}

impl UserPrincipal {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self { id: id.into() }
    }
}

/// Decision from the feature-gating collaborator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GateDecision {
    Allow,
    Deny { reason: String },
}

/// Payment/subscription capability gate, answered by an external
/// collaborator.
pub trait FeatureGate: Send + Sync {
    fn allow(&self, user: &UserPrincipal, capability: &str, usage: u64) -> GateDecision;
}

/// Default gate for deployments without subscription tiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl FeatureGate for AllowAll {
    fn allow(&self, _: &UserPrincipal, _: &str, _: u64) -> GateDecision {
        GateDecision::Allow
    }
}

/// `POST /orders` body.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PlaceOrderRequest {
    pub order: OrderRequest,
    pub account_id: AccountId,
    #[serde(default)]
    pub dry_run: bool,
}

/// Response envelope for single-order operations (place, cancel, modify,
/// get). `error` is free text for humans; `error_code` is the stable wire
/// contract.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_request_id: Option<SmolStr>,
    pub timestamp: DateTime<Utc>,
}

impl OrderResponse {
    pub fn ok(order: Order, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            order: Some(order),
            error: None,
            error_code: None,
            broker_request_id: None,
            timestamp,
        }
    }

    pub fn error(error: &BrokerError, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            order: None,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
            broker_request_id: None,
            timestamp,
        }
    }

    pub fn with_broker_request_id(mut self, id: impl Into<SmolStr>) -> Self {
        self.broker_request_id = Some(id.into());
        self
    }
}

/// Response envelope for order listings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrdersResponse {
    pub success: bool,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
}

/// Response envelope for position queries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PositionsResponse {
    pub success: bool,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
}

/// Response envelope for account queries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement for `POST /webhooks/{broker_kind}`, returned as soon as
/// signature verification and dedup pass.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WebhookAck {
    pub status: WebhookStatus,
    pub webhook_id: SmolStr,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Ok,
    Duplicate,
}

/// Process exit codes for CLI bindings.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    Usage = 64,
    UpstreamUnavailable = 69,
    Internal = 70,
}

impl ExitCode {
    pub fn from_error(error: &BrokerError) -> Self {
        match error {
            BrokerError::Validation(_) => Self::Usage,
            BrokerError::Connection(_) | BrokerError::RateLimit => Self::UpstreamUnavailable,
            _ => Self::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let error = BrokerError::InsufficientFunds("need 1000".into());
        let response = OrderResponse::error(&error, DateTime::<Utc>::MIN_UTC);

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["error_code"], "InsufficientFunds");
        assert!(wire.get("order").is_none());
        assert!(wire["error"].as_str().unwrap().contains("need 1000"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            ExitCode::from_error(&BrokerError::Validation("bad".into())),
            ExitCode::Usage
        );
        assert_eq!(
            ExitCode::from_error(&BrokerError::Connection("down".into())),
            ExitCode::UpstreamUnavailable
        );
        assert_eq!(
            ExitCode::from_error(&BrokerError::Internal("bug".into())),
            ExitCode::Internal
        );
        assert_eq!(ExitCode::Ok as i32, 0);
        assert_eq!(ExitCode::Usage as i32, 64);
    }
}
