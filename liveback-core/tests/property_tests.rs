//! Property tests for run-level invariants.
//!
//! Uses proptest to drive random order flow through full backtests and
//! verify:
//! 1. Position ledger: every position equals the signed sum of its fills
//! 2. Monotonic status: no order moves backwards through its lifecycle
//! 3. No overfill: fills of an order never exceed its quantity
//! 4. Risk limits: no applied fill takes a position past the configured cap,
//!    and no position-growing fill takes gross exposure past its cap

use chrono::{DateTime, Duration, TimeZone, Utc};
use liveback_core::data::ReplayData;
use liveback_core::domain::{Event, NewOrder, OrderId, OrderSide, OrderStatus, QTY_EPSILON};
use liveback_core::engine::{BacktestEngine, RunReport, TradingEngine};
use liveback_core::execution::SlippageConfig;
use liveback_core::recorder::{MemoryRecorder, Record};
use liveback_core::strategy::Strategy as TradingStrategy;
use liveback_core::{LivebackConfig, OrderIntent, StrategyContext};
use proptest::prelude::*;
use std::collections::BTreeMap;

const SYMBOLS: [&str; 2] = ["AAPL", "MSFT"];
const MAX_POSITION: f64 = 25.0;
const MAX_EXPOSURE: f64 = 3_000.0;

fn t(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(i as i64)
}

// ── Random order flow ────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Action {
    Hold,
    Buy(f64),
    Sell(f64),
    /// Quantity and how far below the current price to bid.
    LimitBuy(f64, f64),
    CancelOldest,
}

struct RandomTrader {
    actions: Vec<Action>,
    next: usize,
}

impl TradingStrategy for RandomTrader {
    fn name(&self) -> &str {
        "random_trader"
    }

    fn on_event(&mut self, event: &Event, ctx: &StrategyContext) -> Vec<OrderIntent> {
        let action = self.actions.get(self.next).cloned().unwrap_or(Action::Hold);
        self.next += 1;
        let symbol = event.symbol.clone();
        match action {
            Action::Hold => Vec::new(),
            Action::Buy(q) => vec![OrderIntent::Submit(NewOrder::buy(symbol, q))],
            Action::Sell(q) => vec![OrderIntent::Submit(NewOrder::sell(symbol, q))],
            Action::LimitBuy(q, offset) => match event.reference_price() {
                Some(price) => vec![OrderIntent::Submit(NewOrder::limit(
                    symbol,
                    OrderSide::Buy,
                    q,
                    price * (1.0 - offset),
                ))],
                None => Vec::new(),
            },
            Action::CancelOldest => ctx
                .working_orders()
                .first()
                .map(|o| OrderIntent::Cancel(o.id))
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Scenario {
    bars: Vec<(f64, Option<f64>)>,
    actions: Vec<Action>,
    latency: u32,
    participation: f64,
    slippage_bps: f64,
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => Just(Action::Hold),
        2 => (1u32..20).prop_map(|q| Action::Buy(q as f64)),
        2 => (1u32..20).prop_map(|q| Action::Sell(q as f64)),
        1 => (1u32..20, 0.0..0.05f64).prop_map(|(q, off)| Action::LimitBuy(q as f64, off)),
        1 => Just(Action::CancelOldest),
    ]
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (5usize..60)
        .prop_flat_map(|n| {
            (
                prop::collection::vec((50.0..150.0f64, prop::option::of(5.0..50.0f64)), n),
                prop::collection::vec(arb_action(), n),
                0u32..3,
                0.1f64..=1.0,
                0.0..5.0f64,
            )
        })
        .prop_map(|(bars, actions, latency, participation, slippage_bps)| Scenario {
            bars,
            actions,
            latency,
            participation,
            slippage_bps,
        })
}

fn run(scenario: &Scenario, limits: impl FnOnce(&mut LivebackConfig)) -> (RunReport, Vec<Record>) {
    let mut config = LivebackConfig::default();
    config.broker.latency_events = scenario.latency;
    config.broker.max_participation = scenario.participation;
    config.broker.slippage = SlippageConfig::FixedBps {
        bps: scenario.slippage_bps,
    };
    limits(&mut config);

    let data: ReplayData = scenario
        .bars
        .iter()
        .enumerate()
        .map(|(i, (close, volume))| Event::bar(t(i), SYMBOLS[i % 2], *close, *volume))
        .collect();
    let strategy = RandomTrader {
        actions: scenario.actions.clone(),
        next: 0,
    };
    let recorder = MemoryRecorder::new();
    let mut engine = BacktestEngine::new(&config, data, Box::new(strategy))
        .unwrap()
        .with_recorder(Box::new(recorder.clone()));
    let report = engine.run().unwrap();
    (report, recorder.records())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ── 1. Position ledger ───────────────────────────────────────────

    /// Every final position equals the signed sum of the fills applied to it.
    #[test]
    fn position_equals_signed_fill_sum(scenario in arb_scenario()) {
        let (report, _) = run(&scenario, |_| {});
        for symbol in SYMBOLS {
            let from_fills = report.filled_position(symbol);
            let held = report.final_portfolio.quantity(symbol);
            prop_assert!(
                (held - from_fills).abs() < 1e-6,
                "{symbol}: held {held}, fills sum to {from_fills}"
            );
        }

        // Cash moves only by fill notional and fees.
        let spent: f64 = report
            .fills
            .iter()
            .map(|f| f.signed_quantity() * f.price + f.fees)
            .sum();
        let expected_cash = report.summary.initial_equity - spent;
        prop_assert!((report.final_portfolio.cash - expected_cash).abs() < 1e-6);
    }

    // ── 2 & 3. Order lifecycle ───────────────────────────────────────

    /// Recorded statuses only move along the transition table, and no order
    /// is filled beyond its quantity.
    #[test]
    fn statuses_are_monotonic_and_never_overfilled(scenario in arb_scenario()) {
        let (report, records) = run(&scenario, |_| {});

        let mut last: BTreeMap<OrderId, OrderStatus> = BTreeMap::new();
        for record in &records {
            if let Record::Order(order) = record {
                if let Some(prev) = last.insert(order.id, order.status) {
                    prop_assert!(
                        prev == order.status || prev.can_transition_to(order.status),
                        "order {} went {prev} -> {}", order.id, order.status
                    );
                    prop_assert!(
                        !(matches!(prev, OrderStatus::Partial | OrderStatus::Filled)
                            && order.status == OrderStatus::New)
                    );
                }
            }
        }

        let mut filled: BTreeMap<OrderId, f64> = BTreeMap::new();
        for fill in &report.fills {
            *filled.entry(fill.order_id).or_default() += fill.quantity;
        }
        for order in &report.orders {
            let sum = filled.get(&order.id).copied().unwrap_or(0.0);
            prop_assert!(sum <= order.quantity + QTY_EPSILON);
            prop_assert!((sum - order.filled_quantity).abs() < 1e-6);
            prop_assert!(!order.status.is_working(), "order {} left {}", order.id, order.status);
        }
        prop_assert!(report.order_errors.is_empty(), "{:?}", report.order_errors);
    }

    // ── 4. Risk limit ────────────────────────────────────────────────

    /// Replaying the fills in order, no position ever exceeds the cap.
    #[test]
    fn max_position_is_never_breached(scenario in arb_scenario()) {
        let (report, records) = run(&scenario, |c| {
            c.risk.enabled = true;
            c.risk.max_position = Some(MAX_POSITION);
        });

        let mut positions: BTreeMap<String, f64> = BTreeMap::new();
        for record in &records {
            if let Record::Fill(fill) = record {
                let pos = positions.entry(fill.symbol.clone()).or_default();
                *pos += fill.signed_quantity();
                prop_assert!(
                    pos.abs() <= MAX_POSITION + 1e-6,
                    "{} reached {}", fill.symbol, pos
                );
            }
        }
        for rejection in &report.rejections {
            prop_assert_eq!(rejection.reason.code(), "MAX_POSITION_EXCEEDED");
        }
    }

    /// Replaying events and fills, every fill that grows a position leaves
    /// gross exposure at the current marks within the cap, even when prices
    /// move between order acceptance and fill.
    #[test]
    fn max_gross_exposure_is_never_breached(scenario in arb_scenario()) {
        let (report, records) = run(&scenario, |c| {
            c.risk.enabled = true;
            c.risk.max_gross_exposure = Some(MAX_EXPOSURE);
        });

        let mut marks: BTreeMap<String, f64> = BTreeMap::new();
        let mut positions: BTreeMap<String, f64> = BTreeMap::new();
        for record in &records {
            match record {
                Record::Event(event) => {
                    if let Some(price) = event.reference_price() {
                        marks.insert(event.symbol.clone(), price);
                    }
                }
                Record::Fill(fill) => {
                    let pos = positions.entry(fill.symbol.clone()).or_default();
                    let before = pos.abs();
                    *pos += fill.signed_quantity();
                    if pos.abs() <= before + QTY_EPSILON {
                        continue;
                    }
                    let exposure: f64 = positions
                        .iter()
                        .map(|(symbol, qty)| qty.abs() * marks.get(symbol).copied().unwrap_or(0.0))
                        .sum();
                    prop_assert!(
                        exposure <= MAX_EXPOSURE + 1e-6,
                        "fill on {} took exposure to {exposure}", fill.symbol
                    );
                }
                _ => {}
            }
        }
        for rejection in &report.rejections {
            prop_assert_eq!(rejection.reason.code(), "MAX_EXPOSURE_EXCEEDED");
        }
    }
}
