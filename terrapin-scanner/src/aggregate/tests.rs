use super::*;
use crate::model::{AssetType, TimeFrame};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use terrapin_integration::clock::LiveClock;

fn service() -> AggregationService {
    AggregationService::new(LiveClock::shared())
}

fn scanner(id: &str) -> ScannerRef {
    ScannerRef {
        id: id.into(),
        name: format!("{id} scanner"),
    }
}

fn result(symbol: &str, score: f64, filters: &[&str]) -> ScanResult {
    ScanResult {
        symbol: symbol.into(),
        name: None,
        asset_type: AssetType::Stock,
        price: dec!(100),
        change_percent: Decimal::ZERO,
        volume: 1_000_000,
        match_score: score,
        matched_filters: filters.iter().map(|f| SmolStr::new(*f)).collect(),
        filter_values: FnvHashMap::default(),
        patterns_detected: Vec::new(),
        rank: None,
        time: Utc::now(),
        time_frame: TimeFrame::Day1,
    }
}

fn response(results: Vec<ScanResult>) -> ScannerResponse {
    ScannerResponse {
        scanner_id: "hash".into(),
        scanner_name: "test".into(),
        total_matches: results.len(),
        results,
        total_scanned: 100,
        scan_duration_ms: 5,
        cache_hit: false,
        scan_time: Utc::now(),
    }
}

#[test]
fn test_consensus_aggregation_bounds() {
    // Three scanners report AAPL with scores {80, 85, 82} through three
    // distinct filter families, equal weights.
    let service = service();
    let runs = vec![
        (scanner("s1"), response(vec![result("AAPL", 80.0, &["technical"])])),
        (scanner("s2"), response(vec![result("AAPL", 85.0, &["price"])])),
        (scanner("s3"), response(vec![result("AAPL", 82.0, &["momentum"])])),
    ];

    let aggregated = service.aggregate(&runs);
    assert_eq!(aggregated.len(), 1);

    let aapl = &aggregated[0];
    assert_eq!(aapl.symbol, "AAPL");
    assert_eq!(aapl.scanner_count, 3);
    // base 82.33 + diversity 4.5 + consensus 6.
    assert!(
        (90.0..=100.0).contains(&aapl.aggregate_score),
        "aggregate score {} outside [90, 100]",
        aapl.aggregate_score
    );
    assert!(
        aapl.confidence >= 95.0,
        "confidence {} below 95",
        aapl.confidence
    );
    assert_eq!(aapl.diversity_score, 4.5);
    assert_eq!(aapl.consensus_score, 6.0);
}

#[test]
fn test_min_scanners_required_drops_single_reports() {
    let service = service();
    let runs = vec![
        (scanner("s1"), response(vec![result("AAPL", 90.0, &["price"]), result("MSFT", 95.0, &["price"])])),
        (scanner("s2"), response(vec![result("AAPL", 85.0, &["volume"])])),
    ];

    let aggregated = service.aggregate(&runs);
    assert_eq!(aggregated.len(), 1, "MSFT reported by one scanner only");
    assert_eq!(aggregated[0].symbol, "AAPL");
}

#[test]
fn test_scores_and_confidence_stay_in_bounds() {
    let service = service();
    let runs = vec![
        (scanner("s1"), response(vec![result("AAPL", 100.0, &["price"])])),
        (scanner("s2"), response(vec![result("AAPL", 100.0, &["volume"])])),
        (scanner("s3"), response(vec![result("AAPL", 100.0, &["technical"])])),
        (scanner("s4"), response(vec![result("AAPL", 100.0, &["momentum"])])),
        (scanner("s5"), response(vec![result("AAPL", 100.0, &["pattern"])])),
    ];

    let aggregated = service.aggregate(&runs);
    let aapl = &aggregated[0];

    assert_eq!(aapl.aggregate_score, 100.0, "capped at 100");
    assert_eq!(aapl.confidence, 100.0, "identical scores, no spread");
}

#[test]
fn test_monotonic_in_scores_with_fixed_weights() {
    let service = service();

    let low = service.aggregate(&[
        (scanner("s1"), response(vec![result("AAPL", 60.0, &["price"])])),
        (scanner("s2"), response(vec![result("AAPL", 62.0, &["volume"])])),
    ]);
    let high = service.aggregate(&[
        (scanner("s1"), response(vec![result("AAPL", 80.0, &["price"])])),
        (scanner("s2"), response(vec![result("AAPL", 82.0, &["volume"])])),
    ]);

    assert!(high[0].aggregate_score > low[0].aggregate_score);
}

#[test]
fn test_priority_escalation_rules() {
    #[derive(Debug)]
    struct TestCase {
        name: &'static str,
        portfolio: bool,
        watchlist: bool,
        score: f64,
        scanner_count: usize,
        expected: Priority,
    }

    let cases = vec![
        TestCase { name: "portfolio critical", portfolio: true, watchlist: false, score: 85.0, scanner_count: 2, expected: Priority::Critical },
        TestCase { name: "portfolio high", portfolio: true, watchlist: false, score: 65.0, scanner_count: 2, expected: Priority::High },
        TestCase { name: "watchlist high", portfolio: false, watchlist: true, score: 90.0, scanner_count: 2, expected: Priority::High },
        TestCase { name: "watchlist medium", portfolio: false, watchlist: true, score: 72.0, scanner_count: 2, expected: Priority::Medium },
        TestCase { name: "open high", portfolio: false, watchlist: false, score: 95.0, scanner_count: 4, expected: Priority::High },
        TestCase { name: "open medium", portfolio: false, watchlist: false, score: 80.0, scanner_count: 3, expected: Priority::Medium },
        TestCase { name: "open low", portfolio: false, watchlist: false, score: 80.0, scanner_count: 2, expected: Priority::Low },
    ];

    for (index, test) in cases.iter().enumerate() {
        let service = service();
        if test.portfolio {
            service.set_portfolio_symbols([SmolStr::new("AAPL")]);
        }
        if test.watchlist {
            service.set_watchlist_symbols([SmolStr::new("AAPL")]);
        }

        let priority = service.priority(&SmolStr::new("AAPL"), test.score, test.scanner_count);
        assert_eq!(priority, test.expected, "TC{index} ({})", test.name);
    }
}

#[test]
fn test_insights_are_deterministic() {
    let service = service();
    service.set_portfolio_symbols([SmolStr::new("AAPL")]);

    let runs = vec![
        (scanner("s1"), response(vec![result("AAPL", 85.0, &["price"])])),
        (scanner("s2"), response(vec![result("AAPL", 88.0, &["price"])])),
        (scanner("s3"), response(vec![result("AAPL", 90.0, &["price"])])),
        (scanner("s4"), response(vec![result("AAPL", 84.0, &["volume"])])),
    ];

    let aggregated = service.aggregate(&runs);
    let insights = &aggregated[0].insights;

    assert!(insights.iter().any(|i| i.kind == InsightKind::Consensus));
    assert!(
        insights
            .iter()
            .any(|i| i.kind == InsightKind::Pattern && i.message.contains("'price'"))
    );
    assert!(insights.iter().any(|i| i.kind == InsightKind::Portfolio));

    // Same inputs, same insights.
    let again = service.aggregate(&runs);
    assert_eq!(&again[0].insights, insights);
}

#[test]
fn test_reliability_feedback_updates_running_scores() {
    let service = service();

    service.record_feedback("s1", true, 80.0);
    service.record_feedback("s1", true, 90.0);
    service.record_feedback("s1", false, 40.0);

    let reliability = service.reliability("s1").unwrap();
    assert_eq!(reliability.total, 3);
    assert_eq!(reliability.successful, 2);
    assert!((reliability.average_score - 70.0).abs() < 1e-9);
    // 0.7 * (2/3) + 0.3 * 0.7 = 0.6766.. -> 67.66..
    assert!((reliability.reliability - 67.666_666_666).abs() < 1e-6);
}

#[test]
fn test_unconfigured_weights_derive_from_reliability() {
    let service = service();
    for _ in 0..10 {
        service.record_feedback("good", true, 90.0);
        service.record_feedback("bad", false, 20.0);
    }

    let runs = vec![
        (scanner("good"), response(vec![result("AAPL", 100.0, &["price"])])),
        (scanner("bad"), response(vec![result("AAPL", 0.0, &["volume"])])),
    ];
    let service_ref = &service;
    let aggregated = service_ref.aggregate(&runs);

    // The reliable scanner dominates the weighted base score.
    assert!(aggregated[0].aggregate_score > 80.0);
}

#[test]
fn test_sector_analysis_against_declared_map() {
    let service = service();
    let mut config = AggregationConfig::default();
    config.sector_map.insert("AAPL".into(), "technology".into());
    config.sector_map.insert("MSFT".into(), "technology".into());
    config.sector_map.insert("XOM".into(), "energy".into());
    service.configure(config);

    let runs = vec![
        (
            scanner("s1"),
            response(vec![
                result("AAPL", 90.0, &["price"]),
                result("MSFT", 80.0, &["price"]),
                result("XOM", 70.0, &["price"]),
            ]),
        ),
        (
            scanner("s2"),
            response(vec![
                result("AAPL", 90.0, &["volume"]),
                result("MSFT", 80.0, &["volume"]),
                result("XOM", 70.0, &["volume"]),
            ]),
        ),
    ];

    let aggregated = service.aggregate(&runs);
    let analysis = service.sector_analysis(&aggregated);

    assert_eq!(analysis.top_sectors.len(), 2);
    assert_eq!(analysis.top_sectors[0].0, "technology");
    assert!(analysis.diversification_score > 0.0);

    // No map configured: empty analysis.
    let bare = AggregationService::new(LiveClock::shared());
    assert_eq!(bare.sector_analysis(&aggregated), SectorAnalysis::default());
}
