use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique `Order` identifier minted by the order plane.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    From,
    Display,
    Constructor,
)]
pub struct OrderId(pub SmolStr);

impl OrderId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Client-supplied order reference, carried through to the venue.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    From,
    Display,
    Constructor,
)]
pub struct ClientOrderId(pub SmolStr);

/// Unique `Fill` identifier.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    From,
    Display,
    Constructor,
)]
pub struct FillId(pub SmolStr);

/// Unique `OrderEvent` identifier.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    From,
    Display,
    Constructor,
)]
pub struct EventId(pub SmolStr);

/// Trading account identifier, authoritative at the broker.
#[derive(
    Debug,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    From,
    Display,
    Constructor,
)]
pub struct AccountId(pub SmolStr);

impl AccountId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<&str> for ClientOrderId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<&str> for FillId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}
