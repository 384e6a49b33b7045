use crate::subject::{EventType, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Commands a streaming client may send.
///
/// Anything that fails to parse into one of these is answered with a typed
/// [`StreamErrorCode::BadCommand`] error; the connection is never dropped for
/// a malformed command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe {
        #[serde(default)]
        symbols: Vec<SmolStr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scanner_id: Option<SmolStr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_types: Option<Vec<EventType>>,
    },
    Unsubscribe {
        #[serde(default)]
        symbols: Vec<SmolStr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scanner_id: Option<SmolStr>,
    },
    Ping,
    List,
}

impl ClientCommand {
    /// Parse a raw client frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Error codes carried by server error messages.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum StreamErrorCode {
    BadCommand,
    Unauthorized,
    RateLimited,
}

/// Server -> client envelope: `{type, subject?, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PriceUpdate {
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    OrderEvent {
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    ScannerResult {
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    AggregatedResult {
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Alert {
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    List {
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: StreamErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Build the event envelope for a publish on `subject`.
    pub fn event(
        event_type: EventType,
        subject: Subject,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        match event_type {
            EventType::PriceUpdate => Self::PriceUpdate {
                subject,
                data,
                timestamp,
            },
            EventType::OrderEvent => Self::OrderEvent {
                subject,
                data,
                timestamp,
            },
            EventType::ScannerResult => Self::ScannerResult {
                subject,
                data,
                timestamp,
            },
            EventType::AggregatedResult => Self::AggregatedResult {
                subject,
                data,
                timestamp,
            },
            EventType::Alert => Self::Alert {
                subject,
                data,
                timestamp,
            },
        }
    }

    /// The subject this message fans out on, if any.
    pub fn subject(&self) -> Option<&Subject> {
        match self {
            Self::PriceUpdate { subject, .. }
            | Self::OrderEvent { subject, .. }
            | Self::ScannerResult { subject, .. }
            | Self::AggregatedResult { subject, .. }
            | Self::Alert { subject, .. } => Some(subject),
            _ => None,
        }
    }

    pub fn error(code: StreamErrorCode, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            timestamp,
        }
    }
}
