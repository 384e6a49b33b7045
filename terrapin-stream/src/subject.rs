use serde::{Deserialize, Serialize, de, ser::Serializer};
use smol_str::{SmolStr, format_smolstr};
use std::fmt;

/// Unique connection identifier minted by the hub.
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
    derive_more::From,
    derive_more::Display,
    derive_more::Constructor,
)]
pub struct ConnectionId(pub SmolStr);

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Fan-out key: a market symbol or a scanner id.
///
/// On the wire a subject is a single string; scanner subjects carry a
/// `scanner:` prefix so the two planes cannot collide.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Subject {
    Symbol(SmolStr),
    Scanner(SmolStr),
}

impl Subject {
    pub fn symbol(symbol: impl Into<SmolStr>) -> Self {
        Self::Symbol(symbol.into())
    }

    pub fn scanner(scanner_id: impl Into<SmolStr>) -> Self {
        Self::Scanner(scanner_id.into())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(symbol) => write!(f, "{symbol}"),
            Self::Scanner(scanner_id) => write!(f, "scanner:{scanner_id}"),
        }
    }
}

impl Serialize for Subject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Symbol(symbol) => serializer.serialize_str(symbol),
            Self::Scanner(scanner_id) => {
                serializer.serialize_str(&format_smolstr!("scanner:{scanner_id}"))
            }
        }
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let raw = SmolStr::deserialize(deserializer)?;
        Ok(match raw.strip_prefix("scanner:") {
            Some(scanner_id) => Self::Scanner(SmolStr::new(scanner_id)),
            None => Self::Symbol(raw),
        })
    }
}

/// Streamable event kinds a subscription can select.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PriceUpdate,
    OrderEvent,
    ScannerResult,
    AggregatedResult,
    Alert,
}

impl EventType {
    const ALL: [EventType; 5] = [
        Self::PriceUpdate,
        Self::OrderEvent,
        Self::ScannerResult,
        Self::AggregatedResult,
        Self::Alert,
    ];

    fn bit(self) -> u8 {
        match self {
            Self::PriceUpdate => 1 << 0,
            Self::OrderEvent => 1 << 1,
            Self::ScannerResult => 1 << 2,
            Self::AggregatedResult => 1 << 3,
            Self::Alert => 1 << 4,
        }
    }
}

/// Set of [`EventType`]s a subscription is interested in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EventTypeSet(u8);

impl EventTypeSet {
    pub const EMPTY: Self = Self(0);

    pub fn all() -> Self {
        EventType::ALL
            .into_iter()
            .fold(Self::EMPTY, |set, event_type| set.with(event_type))
    }

    pub fn with(self, event_type: EventType) -> Self {
        Self(self.0 | event_type.bit())
    }

    pub fn contains(&self, event_type: EventType) -> bool {
        self.0 & event_type.bit() != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = EventType> + '_ {
        EventType::ALL
            .into_iter()
            .filter(|event_type| self.contains(*event_type))
    }
}

impl FromIterator<EventType> for EventTypeSet {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::EMPTY, |set, event_type| set.with(event_type))
    }
}

impl Default for EventTypeSet {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_wire_round_trip() {
        let symbol: Subject = serde_json::from_str(r#""AAPL""#).unwrap();
        assert_eq!(symbol, Subject::symbol("AAPL"));
        assert_eq!(serde_json::to_string(&symbol).unwrap(), r#""AAPL""#);

        let scanner: Subject = serde_json::from_str(r#""scanner:momentum-1""#).unwrap();
        assert_eq!(scanner, Subject::scanner("momentum-1"));
        assert_eq!(
            serde_json::to_string(&scanner).unwrap(),
            r#""scanner:momentum-1""#
        );
    }

    #[test]
    fn test_event_type_set_operations() {
        let set = EventTypeSet::EMPTY
            .with(EventType::PriceUpdate)
            .with(EventType::OrderEvent);

        assert!(set.contains(EventType::PriceUpdate));
        assert!(set.contains(EventType::OrderEvent));
        assert!(!set.contains(EventType::Alert));

        assert_eq!(set.iter().count(), 2);
        assert_eq!(EventTypeSet::all().iter().count(), 5);
    }
}
