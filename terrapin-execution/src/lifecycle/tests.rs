use super::*;
use crate::model::{OrderKind, OrderRequest, Side, TimeInForce, id::AccountId};
use chrono::Utc;
use rust_decimal_macros::dec;
use terrapin_integration::clock::{Clock, MockClock};

fn lifecycle() -> (OrderLifecycle, MockClock) {
    let (clock, handle) = MockClock::shared(Utc::now());
    let ids = Arc::new(IdGenerator::new(Arc::clone(&clock)));
    (OrderLifecycle::new(clock, ids), handle)
}

fn order(id: &str, quantity: Decimal) -> Order {
    let request = OrderRequest {
        symbol: "AAPL".into(),
        side: Side::Buy,
        quantity,
        kind: OrderKind::Market,
        time_in_force: TimeInForce::Day,
        limit_price: None,
        stop_price: None,
        trail_amount: None,
        trail_percent: None,
        extended_hours: false,
        client_order_id: None,
    };
    Order::from_request(OrderId::from(id), AccountId::from("acct_1"), &request, Utc::now())
}

fn drive(lifecycle: &OrderLifecycle, id: &str, statuses: &[OrderStatus]) {
    for status in statuses {
        lifecycle
            .transition(TransitionAttempt::new(OrderId::from(id), *status))
            .unwrap();
    }
}

#[test]
fn test_happy_path_submit_accept_fill() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(10))).unwrap();

    drive(
        &lifecycle,
        "ord_1",
        &[OrderStatus::Submitted, OrderStatus::Accepted],
    );

    let event = lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::Filled)
                .with_ctx(TransitionCtx::fill(dec!(10), dec!(150))),
        )
        .unwrap();

    assert_eq!(event.old_status, Some(OrderStatus::Accepted));
    assert_eq!(event.new_status, OrderStatus::Filled);

    let order = lifecycle.get(&OrderId::from("ord_1")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, dec!(10));
    assert_eq!(order.average_fill_price, Some(dec!(150)));
    assert!(order.filled_at.is_some());
}

#[test]
fn test_partial_fills_accumulate_weighted_average() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(10))).unwrap();
    drive(
        &lifecycle,
        "ord_1",
        &[OrderStatus::Submitted, OrderStatus::Accepted],
    );

    lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::PartiallyFilled)
                .with_ctx(TransitionCtx::fill(dec!(4), dec!(100))),
        )
        .unwrap();
    lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::PartiallyFilled)
                .with_ctx(TransitionCtx::fill(dec!(2), dec!(130))),
        )
        .unwrap();

    let order = lifecycle.get(&OrderId::from("ord_1")).unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.filled_quantity, dec!(6));
    // (4*100 + 2*130) / 6 = 110
    assert_eq!(order.average_fill_price, Some(dec!(110)));
}

#[test]
fn test_partial_fill_completing_order_collapses_to_filled() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(5))).unwrap();
    drive(
        &lifecycle,
        "ord_1",
        &[OrderStatus::Submitted, OrderStatus::Accepted],
    );

    let event = lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::PartiallyFilled)
                .with_ctx(TransitionCtx::fill(dec!(5), dec!(10))),
        )
        .unwrap();

    assert_eq!(event.new_status, OrderStatus::Filled);
    assert_eq!(
        event.meta.get("collapsed").map(SmolStr::as_str),
        Some("partial_to_filled")
    );

    let order = lifecycle.get(&OrderId::from("ord_1")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, dec!(5));
}

#[test]
fn test_terminal_fill_implies_remaining_quantity() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(5))).unwrap();
    drive(
        &lifecycle,
        "ord_1",
        &[OrderStatus::Submitted, OrderStatus::Accepted],
    );

    lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::PartiallyFilled)
                .with_ctx(TransitionCtx::fill(dec!(3), dec!(10))),
        )
        .unwrap();
    lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::Filled)
                .with_ctx(TransitionCtx::fill(dec!(2), dec!(10))),
        )
        .unwrap();

    let order = lifecycle.get(&OrderId::from("ord_1")).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, dec!(5));
    assert_eq!(order.average_fill_price, Some(dec!(10)));
}

#[test]
fn test_invalid_transitions_return_typed_error_and_count() {
    #[derive(Debug)]
    struct TestCase {
        name: &'static str,
        setup: &'static [OrderStatus],
        target: OrderStatus,
    }

    let cases = vec![
        TestCase {
            name: "pending cannot fill",
            setup: &[],
            target: OrderStatus::Filled,
        },
        TestCase {
            name: "pending cannot accept",
            setup: &[],
            target: OrderStatus::Accepted,
        },
        TestCase {
            name: "filled is terminal",
            setup: &[
                OrderStatus::Submitted,
                OrderStatus::Accepted,
                OrderStatus::Filled,
            ],
            target: OrderStatus::Canceled,
        },
        TestCase {
            name: "canceled is terminal",
            setup: &[OrderStatus::Canceled],
            target: OrderStatus::Submitted,
        },
        TestCase {
            name: "rejected is terminal",
            setup: &[OrderStatus::Rejected],
            target: OrderStatus::Submitted,
        },
    ];

    for (index, test) in cases.iter().enumerate() {
        let (lifecycle, _) = lifecycle();
        lifecycle.insert(order("ord_1", dec!(10))).unwrap();
        drive(&lifecycle, "ord_1", test.setup);

        let before = lifecycle.get(&OrderId::from("ord_1")).unwrap();
        let result =
            lifecycle.transition(TransitionAttempt::new(OrderId::from("ord_1"), test.target));

        assert!(
            matches!(result, Err(LifecycleError::InvalidTransition { .. })),
            "TC{index} ({}) expected InvalidTransition, got {result:?}",
            test.name
        );
        assert_eq!(lifecycle.invalid_transition_count(), 1, "TC{index}");

        // Rejected attempts must not mutate the order.
        let after = lifecycle.get(&OrderId::from("ord_1")).unwrap();
        assert_eq!(before, after, "TC{index} ({}) order mutated", test.name);
    }
}

#[test]
fn test_unknown_order_is_not_found() {
    let (lifecycle, _) = lifecycle();
    let result = lifecycle.transition(TransitionAttempt::new(
        OrderId::from("ord_missing"),
        OrderStatus::Submitted,
    ));
    assert!(matches!(result, Err(LifecycleError::OrderNotFound(_))));
}

#[test]
fn test_duplicate_insert_rejected() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(1))).unwrap();
    assert!(matches!(
        lifecycle.insert(order("ord_1", dec!(1))),
        Err(LifecycleError::DuplicateOrder(_))
    ));
}

#[test]
fn test_listeners_observe_events_in_order() {
    struct Recorder(Mutex<Vec<(Option<OrderStatus>, OrderStatus)>>);

    impl OrderEventListener for Recorder {
        fn on_event(&self, _order: &Order, event: &OrderEvent) {
            self.0.lock().push((event.old_status, event.new_status));
        }
    }

    let (lifecycle, _) = lifecycle();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    lifecycle.add_listener(Arc::clone(&recorder) as Arc<dyn OrderEventListener>);

    lifecycle.insert(order("ord_1", dec!(10))).unwrap();
    drive(
        &lifecycle,
        "ord_1",
        &[OrderStatus::Submitted, OrderStatus::Accepted],
    );
    lifecycle
        .transition(
            TransitionAttempt::new(OrderId::from("ord_1"), OrderStatus::Filled)
                .with_ctx(TransitionCtx::fill(dec!(10), dec!(100))),
        )
        .unwrap();

    let observed = recorder.0.lock().clone();
    assert_eq!(
        observed,
        vec![
            (Some(OrderStatus::Pending), OrderStatus::Submitted),
            (Some(OrderStatus::Submitted), OrderStatus::Accepted),
            (Some(OrderStatus::Accepted), OrderStatus::Filled),
        ]
    );
}

#[test]
fn test_every_emitted_pair_is_declared() {
    let (lifecycle, _) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(10))).unwrap();

    let statuses = [
        OrderStatus::Submitted,
        OrderStatus::Accepted,
        OrderStatus::PartiallyFilled,
        OrderStatus::Filled,
    ];

    let ctx_for = |status: OrderStatus| match status {
        OrderStatus::PartiallyFilled => TransitionCtx::fill(dec!(4), dec!(10)),
        OrderStatus::Filled => TransitionCtx::fill(dec!(6), dec!(10)),
        _ => TransitionCtx::default(),
    };

    for status in statuses {
        let event = lifecycle
            .transition(
                TransitionAttempt::new(OrderId::from("ord_1"), status).with_ctx(ctx_for(status)),
            )
            .unwrap();
        assert!(
            declared(event.old_status.unwrap(), event.new_status).is_some(),
            "emitted pair must be declared: {:?} -> {:?}",
            event.old_status,
            event.new_status
        );
    }
}

#[test]
fn test_purge_terminal_respects_retention() {
    let (lifecycle, clock) = lifecycle();
    lifecycle.insert(order("ord_1", dec!(1))).unwrap();
    lifecycle.insert(order("ord_2", dec!(1))).unwrap();

    drive(&lifecycle, "ord_1", &[OrderStatus::Canceled]);

    clock.advance(std::time::Duration::from_secs(3600));
    let cutoff = clock.now() - chrono::TimeDelta::seconds(60);

    assert_eq!(lifecycle.purge_terminal(cutoff), 1);
    assert!(lifecycle.get(&OrderId::from("ord_1")).is_none());
    assert!(lifecycle.get(&OrderId::from("ord_2")).is_some(), "active order retained");
}
