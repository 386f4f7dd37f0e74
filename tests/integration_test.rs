//! End-to-end engine tests over mock ports and an in-memory SQLite store.
//!
//! Tests cover:
//! - Upgrade then apply for a single-stock portfolio
//! - Determinism of recommendations
//! - Apply idempotence, price checks and compensation on history failure
//! - Pinning of holdings without signals and universe expansion
//! - Tracker retention boundary and benchmark comparison
//! - Indicator recomputation through the service
//! - The same pipeline through `SqliteAdapter`

mod common;

use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use folioai::domain::error::EngineError;
use folioai::domain::history::{ChangeSource, ChangeType};
use folioai::domain::portfolio::OptimizationStatus;
use folioai::domain::recommendation::ActionKind;
use folioai::domain::universe::SkipReason;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

fn alloc(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()
}

fn aapl_harness() -> Harness {
    Harness::new(
        MockPrices::new()
            .with_bars("AAPL", series_ending_at("AAPL", 150.0))
            .with_bars("MSFT", series_ending_at("MSFT", 300.0)),
        MockOracle::new().with_prediction("AAPL", 150.0, 6.67, 0.8),
        MockPortfolios::new().with_portfolio(aapl_portfolio(1)),
    )
}

mod upgrade_and_apply {
    use super::*;

    #[test]
    fn single_stock_scenario() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());

        let rec = service
            .generate_upgrade(1, Some(0.5), false, now())
            .unwrap();
        assert!(rec.recommended_allocations.contains_key("AAPL"));
        assert_relative_eq!(rec.recommended_allocations["AAPL"], 1.0, epsilon = 1e-6);
        assert!(!rec.recommended_actions.is_empty());
        assert!(!rec.universe_expanded);
        assert!(rec.omitted.is_empty());
        assert_eq!(
            h.portfolios.stored(1).optimization_status,
            OptimizationStatus::Optimized
        );

        let applied = service
            .apply_upgrade(1, &alloc(&[("AAPL", 0.6), ("MSFT", 0.4)]), now())
            .unwrap();
        assert!(applied.has_ai_recommendations());
        assert_eq!(applied.last_ai_recommendation_date(), Some(now()));
        assert_relative_eq!(applied.holding("AAPL").unwrap().shares, 6.0, epsilon = 1e-9);
        assert_relative_eq!(applied.holding("MSFT").unwrap().shares, 2.0, epsilon = 1e-9);
        assert_relative_eq!(applied.weight_sum(), 100.0, epsilon = 1e-6);

        assert_eq!(h.portfolios.stored(1), applied);
        let history = service.history(1).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::AiRecommendation);
        assert_eq!(history[0].change_source, ChangeSource::Ai);
        assert_relative_eq!(history[0].previous_allocations["AAPL"], 100.0, epsilon = 1e-9);
        assert!(service.tracker().get(1).is_some());
    }

    #[test]
    fn recommendations_are_deterministic() {
        let h = Harness::new(
            MockPrices::new()
                .with_bars("AAPL", series_ending_at("AAPL", 150.0))
                .with_bars("MSFT", series_ending_at("MSFT", 300.0)),
            MockOracle::new()
                .with_prediction("AAPL", 150.0, 8.0, 0.7)
                .with_prediction("MSFT", 300.0, 3.0, 0.9),
            MockPortfolios::new().with_portfolio(two_stock_portfolio(2)),
        );

        let first = h.service(concentrated_config());
        let second = h.service(concentrated_config());
        let a = first.generate_upgrade(2, None, false, now()).unwrap();
        let b = second.generate_upgrade(2, None, false, now()).unwrap();
        assert_eq!(a, b);

        let sum: f64 = a.recommended_allocations.values().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn default_risk_tolerance_is_used() {
        let h = aapl_harness();
        let mut config = concentrated_config();
        config.optimizer.default_risk_tolerance = 0.3;
        let rec = h.service(config).generate_upgrade(1, None, false, now()).unwrap();
        assert_eq!(rec.risk_tolerance, 0.3);
    }

    #[test]
    fn risk_tolerance_outside_unit_range_is_rejected() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());
        assert!(matches!(
            service.generate_upgrade(1, Some(1.5), false, now()),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert_eq!(h.portfolios.saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_portfolio() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());
        assert!(matches!(
            service.generate_upgrade(99, None, false, now()),
            Err(EngineError::PortfolioNotFound { portfolio_id: 99 })
        ));
        assert!(matches!(
            service.apply_upgrade(99, &alloc(&[("AAPL", 1.0)]), now()),
            Err(EngineError::PortfolioNotFound { portfolio_id: 99 })
        ));
    }

    #[test]
    fn infeasible_bounds_restore_status() {
        let h = aapl_harness();
        let mut before = aapl_portfolio(1);
        before.optimization_status = OptimizationStatus::Optimized;
        h.portfolios.save(&before).unwrap();

        // One symbol cannot fill the whole budget under a 35% cap.
        let service = h.service(folioai::domain::config::EngineConfig::default());
        assert!(matches!(
            service.generate_upgrade(1, None, false, now()),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert_eq!(
            h.portfolios.stored(1).optimization_status,
            OptimizationStatus::Optimized
        );
    }

    #[test]
    fn failed_final_save_restores_status() {
        let h = Harness::new(
            MockPrices::new().with_bars("AAPL", series_ending_at("AAPL", 150.0)),
            MockOracle::new().with_prediction("AAPL", 150.0, 6.67, 0.8),
            MockPortfolios::new()
                .with_portfolio(aapl_portfolio(1))
                .failing_attempt(2),
        );
        let service = h.service(concentrated_config());

        assert!(matches!(
            service.generate_upgrade(1, None, false, now()),
            Err(EngineError::OptimizationFailed { portfolio_id: 1, .. })
        ));
        let stored = h.portfolios.stored(1);
        assert_eq!(stored.optimization_status, OptimizationStatus::NotOptimized);
        assert_eq!(stored.last_optimized_at, None);
    }

    #[test]
    fn stale_stored_snapshot_does_not_drive_actions() {
        let h = aapl_harness();
        let old_bars = generate_bars("AAPL", today() - Duration::days(730), 60, |_| 50.0);
        let stale = folioai::domain::snapshot::compute_snapshots(&old_bars);
        h.indicators.snapshots.lock().unwrap().extend(stale);
        let service = h.service(concentrated_config());

        let rec = service.generate_upgrade(1, Some(0.5), false, now()).unwrap();

        assert_relative_eq!(rec.recommended_allocations["AAPL"], 1.0, epsilon = 1e-6);
        let aapl = &rec.recommended_actions[0];
        assert_eq!(aapl.symbol, "AAPL");
        assert_eq!(aapl.action, ActionKind::Hold);
        assert_eq!(aapl.share_delta, 0);
    }

    use folioai::ports::portfolio_port::PortfolioStore;
}

mod apply_rules {
    use super::*;

    #[test]
    fn rounded_weights_keep_value() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());

        let applied = service.apply_upgrade(1, &alloc(&[("AAPL", 0.991)]), now()).unwrap();

        assert_relative_eq!(applied.total_value, 1500.0, epsilon = 1e-9);
        assert_relative_eq!(applied.holding("AAPL").unwrap().shares, 10.0, epsilon = 1e-9);
        assert_relative_eq!(
            service.tracker().get(1).unwrap().initial_value,
            1500.0,
            epsilon = 1e-9
        );
    }

    fn pair_harness() -> Harness {
        Harness::new(
            MockPrices::new()
                .with_bars("AAPL", series_ending_at("AAPL", 150.0))
                .with_bars("MSFT", series_ending_at("MSFT", 300.0)),
            MockOracle::new(),
            MockPortfolios::new().with_portfolio(two_stock_portfolio(3)),
        )
    }

    #[test]
    fn current_weights_change_nothing_but_status() {
        let h = pair_harness();
        let service = h.service(concentrated_config());
        let before = h.portfolios.stored(3);

        let applied = service
            .apply_upgrade(3, &alloc(&[("AAPL", 0.5), ("MSFT", 0.5)]), now())
            .unwrap();

        for holding in &before.stocks {
            let after = applied.holding(&holding.symbol).unwrap();
            assert_eq!(after.shares, holding.shares);
            assert_eq!(after.entry_price, holding.entry_price);
        }
        let history = service.history(3).unwrap();
        assert_eq!(history.len(), 1);
        assert_relative_eq!(history[0].value_change(), 0.0, epsilon = 1e-9);
        assert_eq!(applied.optimization_status, OptimizationStatus::UpgradedWithAi);
        assert_eq!(applied.last_optimized_at, Some(now()));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let h = pair_harness();
        let service = h.service(concentrated_config());
        assert!(matches!(
            service.apply_upgrade(3, &alloc(&[("AAPL", 0.5), ("MSFT", 0.3)]), now()),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert!(matches!(
            service.apply_upgrade(3, &alloc(&[("AAPL", 1.2), ("MSFT", -0.2)]), now()),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert_eq!(h.history.count(), 0);
    }

    #[test]
    fn missing_price_aborts_before_any_write() {
        let h = pair_harness();
        let service = h.service(concentrated_config());
        let before = h.portfolios.stored(3);

        let result = service.apply_upgrade(3, &alloc(&[("AAPL", 0.5), ("NVDA", 0.5)]), now());
        assert!(matches!(result, Err(EngineError::NoPrice { ref symbol }) if symbol == "NVDA"));
        assert_eq!(h.portfolios.stored(3), before);
        assert_eq!(h.portfolios.saves.load(Ordering::SeqCst), 0);
        assert_eq!(h.history.count(), 0);
        assert!(service.tracker().is_empty());
    }

    #[test]
    fn history_failure_restores_portfolio() {
        let h = pair_harness().with_history(MockHistory::failing());
        let service = h.service(concentrated_config());
        let before = h.portfolios.stored(3);

        let result = service.apply_upgrade(3, &alloc(&[("AAPL", 1.0)]), now());
        assert!(matches!(
            result,
            Err(EngineError::OptimizationFailed { portfolio_id: 3, .. })
        ));
        assert_eq!(h.portfolios.stored(3), before);
        assert!(service.tracker().is_empty());
    }

    #[test]
    fn save_failure_is_optimization_failure() {
        let h = pair_harness();
        h.portfolios.fail_saves.store(true, Ordering::SeqCst);
        let service = h.service(concentrated_config());

        assert!(matches!(
            service.apply_upgrade(3, &alloc(&[("AAPL", 1.0)]), now()),
            Err(EngineError::OptimizationFailed { .. })
        ));
        assert_eq!(h.history.count(), 0);
    }

    #[test]
    fn dropped_symbol_is_sold_out() {
        let h = pair_harness();
        let service = h.service(concentrated_config());
        let applied = service
            .apply_upgrade(3, &alloc(&[("AAPL", 1.0)]), now())
            .unwrap();
        assert!(!applied.has_holding("MSFT"));
        assert_relative_eq!(applied.holding("AAPL").unwrap().shares, 20.0, epsilon = 1e-9);
    }
}

mod candidate_selection {
    use super::*;

    #[test]
    fn holding_without_prediction_is_pinned() {
        let h = Harness::new(
            MockPrices::new()
                .with_bars("AAPL", series_ending_at("AAPL", 150.0))
                .with_bars("MSFT", series_ending_at("MSFT", 300.0)),
            MockOracle::new().with_prediction("AAPL", 150.0, 5.0, 0.9),
            MockPortfolios::new().with_portfolio(two_stock_portfolio(4)),
        );
        let rec = h
            .service(concentrated_config())
            .generate_upgrade(4, None, false, now())
            .unwrap();

        assert_relative_eq!(rec.recommended_allocations["MSFT"], 0.5, epsilon = 1e-6);
        assert_relative_eq!(rec.recommended_allocations["AAPL"], 0.5, epsilon = 1e-6);
        assert_eq!(rec.omitted.len(), 1);
        assert_eq!(rec.omitted[0].symbol, "MSFT");
        assert_eq!(rec.omitted[0].reason, SkipReason::NoPrediction);
        assert!(rec.omitted[0].pinned);
    }

    #[test]
    fn holding_without_history_is_pinned() {
        let h = Harness::new(
            MockPrices::new().with_bars("AAPL", series_ending_at("AAPL", 150.0)),
            MockOracle::new()
                .with_prediction("AAPL", 150.0, 5.0, 0.9)
                .with_prediction("MSFT", 300.0, 5.0, 0.9),
            MockPortfolios::new().with_portfolio(two_stock_portfolio(4)),
        );
        let rec = h
            .service(concentrated_config())
            .generate_upgrade(4, None, false, now())
            .unwrap();
        assert_eq!(rec.omitted[0].reason, SkipReason::NoSnapshot);
        assert_relative_eq!(rec.recommended_allocations["MSFT"], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn predictions_are_cached_between_runs() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());
        service.generate_upgrade(1, None, false, now()).unwrap();
        service.generate_upgrade(1, None, false, now()).unwrap();
        assert_eq!(h.oracle.call_count(), 1);

        service.predict("AAPL").unwrap();
        assert_eq!(h.oracle.call_count(), 2);
    }

    #[test]
    fn direct_prediction_failure_is_hard() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());
        assert!(matches!(
            service.predict("ZZZ"),
            Err(EngineError::PredictionFailed { ref symbol, .. }) if symbol == "ZZZ"
        ));
    }

    fn expansion_harness() -> Harness {
        Harness::new(
            MockPrices::new()
                .with_bars("AAPL", series_ending_at("AAPL", 150.0))
                .with_bars("NVDA", series_ending_at("NVDA", 100.0))
                .with_bars("TSLA", series_ending_at("TSLA", 200.0)),
            MockOracle::new()
                .with_prediction("AAPL", 150.0, 4.0, 0.8)
                .with_prediction("NVDA", 100.0, 10.0, 0.9)
                .with_prediction("TSLA", 200.0, 2.0, 0.5),
            MockPortfolios::new()
                .with_portfolio(aapl_portfolio(5))
                .with_catalog(&["NVDA", "TSLA", "XOM"]),
        )
    }

    #[test]
    fn expansion_adds_best_ranked_symbols() {
        let h = expansion_harness();
        let mut config = concentrated_config();
        config.optimizer.max_expansion_stocks = 1;
        let rec = h
            .service(config)
            .generate_upgrade(5, None, true, now())
            .unwrap();

        assert!(rec.universe_expanded);
        let symbols: Vec<&str> = rec.recommended_allocations.keys().map(String::as_str).collect();
        assert_eq!(symbols, vec!["AAPL", "NVDA"]);
        assert!(rec.recommended_actions.iter().any(|a| a.symbol == "NVDA"
            && a.target_weight > 0.0
            && a.current_weight == 0.0
            && a.action != ActionKind::Sell));
        assert!(
            rec.omitted
                .iter()
                .any(|s| s.symbol == "XOM" && s.reason == SkipReason::NoPrediction && !s.pinned)
        );
        let sum: f64 = rec.recommended_allocations.values().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn expansion_disabled_in_config() {
        let h = expansion_harness();
        let mut config = concentrated_config();
        config.optimizer.enable_universe_expansion = false;
        let rec = h
            .service(config)
            .generate_upgrade(5, None, true, now())
            .unwrap();
        assert!(!rec.universe_expanded);
        assert_eq!(rec.recommended_allocations.len(), 1);
    }
}

mod tracking {
    use super::*;

    fn applied_service(h: &Harness) -> folioai::domain::service::UpgradeService {
        let service = h.service(concentrated_config());
        service
            .apply_upgrade(1, &alloc(&[("AAPL", 1.0)]), now())
            .unwrap();
        service
    }

    #[test]
    fn retention_boundary() {
        let h = aapl_harness();
        let service = applied_service(&h);

        let kept = service.run_sweep(today() + Duration::days(180));
        assert_eq!(kept.updated, 1);
        assert_eq!(kept.evicted, 0);
        assert_eq!(
            service.tracker().get(1).unwrap().days_since_application,
            180
        );

        let gone = service.run_sweep(today() + Duration::days(181));
        assert_eq!(gone.evicted, 1);
        assert!(!service.get_performance(1, today()).found);
    }

    #[test]
    fn performance_against_benchmark() {
        let h = aapl_harness();
        h.prices.push_close("SPY", today(), 400.0);
        let service = applied_service(&h);

        let later = today() + Duration::days(10);
        h.prices.push_close("AAPL", later, 165.0);
        h.prices.push_close("SPY", later, 420.0);
        service.run_sweep(later);

        let report = service.get_performance(1, later);
        assert!(report.found);
        assert_eq!(report.application_date, Some(today()));
        assert_relative_eq!(report.initial_value.unwrap(), 1500.0, epsilon = 1e-9);
        assert_relative_eq!(report.current_value.unwrap(), 1650.0, epsilon = 1e-9);
        assert_relative_eq!(report.percentage_change.unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(report.benchmark_return.unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(report.outperformance.unwrap(), 5.0, epsilon = 1e-9);

        let stats = service.get_aggregate_stats();
        assert_eq!(stats.recommendation_count, 1);
        assert_relative_eq!(stats.positive_performance_percentage, 100.0);
        assert_relative_eq!(stats.best_performance, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_benchmark_leaves_comparison_empty() {
        let h = aapl_harness();
        let service = applied_service(&h);
        let report = service.get_performance(1, today());
        assert!(report.found);
        assert_eq!(report.benchmark_return, None);
        assert_eq!(report.outperformance, None);
    }

    #[test]
    fn sweep_failure_keeps_entry() {
        let h = aapl_harness();
        let service = applied_service(&h);
        h.prices
            .errors
            .lock()
            .unwrap()
            .insert("AAPL".into(), "feed down".into());

        let summary = service.run_sweep(today() + Duration::days(3));
        assert_eq!(summary.failed, 1);
        assert!(service.tracker().get(1).is_some());
    }
}

mod indicators {
    use super::*;
    use folioai::domain::snapshot::compute_snapshots;

    #[test]
    fn recompute_replaces_stored_range() {
        let h = aapl_harness();
        let service = h.service(concentrated_config());
        let start = today() - Duration::days(29);

        let first = service.compute_indicators("AAPL", start, today()).unwrap();
        assert_eq!(first.len(), 30);
        let second = service.compute_indicators("AAPL", start, today()).unwrap();
        assert_eq!(first, second);
        assert_eq!(h.indicators.count_for("AAPL"), 30);
        // The range starts after 90 bars of history, so every window up to 50 is warm.
        assert!(first.iter().all(|s| s.sma50.is_some() && s.rsi14.is_some()));

        let listed = service
            .stored_indicators("AAPL", today() - Duration::days(4), today())
            .unwrap();
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[..], first[25..]);
    }

    #[test]
    fn short_history_is_insufficient() {
        let h = Harness::new(
            MockPrices::new().with_bars("NEW", generate_bars("NEW", today(), 10, |i| 10.0 + i as f64)),
            MockOracle::new(),
            MockPortfolios::new(),
        );
        let service = h.service(concentrated_config());
        assert!(matches!(
            service.compute_indicators("NEW", today() - Duration::days(5), today()),
            Err(EngineError::InsufficientData { bars: 10, minimum: 20, .. })
        ));
        assert_eq!(h.indicators.count_for("NEW"), 0);
    }

    #[test]
    fn rising_series_rsi_is_exactly_100() {
        let bars = generate_bars("UP", today(), 101, |i| 100.0 + i as f64);
        let snapshots = compute_snapshots(&bars);
        assert!(snapshots[..14].iter().all(|s| s.rsi14.is_none()));
        for s in &snapshots[14..] {
            assert_eq!(s.rsi14, Some(100.0));
        }
    }
}

mod sqlite_pipeline {
    use super::*;
    use folioai::adapters::sqlite_adapter::SqliteAdapter;
    use folioai::domain::service::{EnginePorts, UpgradeService};
    use folioai::ports::portfolio_port::PortfolioStore;
    use std::sync::Arc;

    #[test]
    fn upgrade_apply_and_history_through_sqlite() {
        let store = Arc::new(SqliteAdapter::in_memory().unwrap());
        store.initialize_schema().unwrap();
        store.insert_bars(&series_ending_at("AAPL", 150.0)).unwrap();
        store.insert_bars(&series_ending_at("MSFT", 300.0)).unwrap();
        store.save(&aapl_portfolio(1)).unwrap();

        let oracle = Arc::new(MockOracle::new().with_prediction("AAPL", 150.0, 6.67, 0.8));
        let ports = EnginePorts {
            prices: store.clone(),
            oracle,
            portfolios: store.clone(),
            history: store.clone(),
            indicators: store.clone(),
        };
        let service = UpgradeService::new(ports, concentrated_config());

        service
            .compute_indicators("AAPL", today() - Duration::days(9), today())
            .unwrap();
        let rec = service.generate_upgrade(1, Some(0.5), false, now()).unwrap();
        assert!(rec.recommended_allocations.contains_key("AAPL"));

        let applied = service
            .apply_upgrade(1, &alloc(&[("AAPL", 0.6), ("MSFT", 0.4)]), now())
            .unwrap();
        let reloaded = store.load_by_id(1).unwrap().unwrap();
        assert_eq!(reloaded.stocks.len(), 2);
        assert!(reloaded.has_ai_recommendations());
        assert_eq!(reloaded.last_ai_recommendation_date(), Some(now()));
        assert_relative_eq!(reloaded.total_value, applied.total_value, epsilon = 1e-9);

        let history = service.history(1).unwrap();
        assert_eq!(history.len(), 1);
        assert_relative_eq!(history[0].new_allocations["AAPL"], 60.0, epsilon = 1e-6);

        let catalog = store.find_symbols_across_all_data().unwrap();
        assert!(catalog.contains("AAPL") && catalog.contains("MSFT"));
    }
}
