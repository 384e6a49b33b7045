use crate::model::OrderStatus;
use OrderStatus::*;

/// Every legal `(from, to)` pair with its event label.
///
/// Terminal states (`Filled`, `Canceled`, `Rejected`, `Expired`) have no
/// outgoing rows.
const TRANSITIONS: &[(OrderStatus, OrderStatus, &str)] = &[
    (Pending, Submitted, "submit"),
    (Pending, Rejected, "reject"),
    (Pending, Canceled, "cancel"),
    (Submitted, Accepted, "accept"),
    (Submitted, Rejected, "reject"),
    (Submitted, Canceled, "cancel"),
    (Accepted, PartiallyFilled, "partial_fill"),
    (Accepted, Filled, "fill"),
    (Accepted, Canceled, "cancel"),
    (Accepted, Rejected, "reject"),
    (Accepted, Expired, "expire"),
    (PartiallyFilled, PartiallyFilled, "partial_fill"),
    (PartiallyFilled, Filled, "fill"),
    (PartiallyFilled, Canceled, "cancel"),
    (PartiallyFilled, Expired, "expire"),
];

/// Look up the declared transition `(from, to)`, returning its event label.
pub fn declared(from: OrderStatus, to: OrderStatus) -> Option<&'static str> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, label)| *label)
}

/// Event label for a declared transition, if any.
pub fn event_label(from: OrderStatus, to: OrderStatus) -> Option<&'static str> {
    declared(from, to)
}

/// All statuses reachable in one declared step from `from`.
pub fn valid_targets(from: OrderStatus) -> Vec<OrderStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == from)
        .map(|(_, t, _)| *t)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        for terminal in [Filled, Canceled, Rejected, Expired] {
            assert!(
                valid_targets(terminal).is_empty(),
                "{terminal} must have no outgoing transitions"
            );
        }
    }

    #[test]
    fn test_every_declared_pair_leaves_a_non_terminal_state() {
        for (from, _, _) in TRANSITIONS {
            assert!(!from.is_terminal());
        }
    }

    #[test]
    fn test_declared_lookup() {
        assert_eq!(declared(Pending, Submitted), Some("submit"));
        assert_eq!(declared(Accepted, Filled), Some("fill"));
        assert_eq!(declared(PartiallyFilled, PartiallyFilled), Some("partial_fill"));
        assert_eq!(declared(Filled, Canceled), None);
        assert_eq!(declared(Pending, Filled), None);
    }
}
