//! Engine core: the single-consumer event loop shared by both engines.
//!
//! Per event, fully processed before the next one is pulled:
//! 1. Advance the logical clock (never backwards)
//! 2. FILL events go straight to the ledger; market events update the mark,
//!    withdraw working orders the new mark pushes past the exposure limit,
//!    then go to the execution client, whose fills are applied before the
//!    strategy reacts (so a fill always beats a cancel issued in reaction to
//!    the same event)
//! 3. Strategy intents, in emission order: shape check, risk check, route
//! 4. Fills that arrived outside the event stream
//! 5. Reconciliation poll for orders left `Unknown` by a timeout
//! 6. Equity point
//!
//! The core owns every piece of mutable run state, so independent engines can
//! run side by side in one process.

use super::order_book::{OrderBook, OrderError};
use super::state::{
    EngineStatus, Reconciliation, RejectionRecord, RunReport, RunTrace, TimeoutRecord,
};
use super::stop::StopHandle;
use crate::config::LivebackConfig;
use crate::data::{DataClient, DataError};
use crate::domain::{
    ClosedTrade, Event, EventKind, Fill, IdGen, NewOrder, OrderId, OrderStatus, Portfolio, RunId,
    QTY_EPSILON,
};
use crate::error::EngineError;
use crate::event_bus::{BusPolicy, EventBus, Published};
use crate::execution::{ExecutionClient, ExecutionError};
use crate::fingerprint::RunFingerprint;
use crate::metrics::PerformanceSummary;
use crate::recorder::{NullRecorder, Record, Recorder};
use crate::risk::{RejectReason, RiskDecision, RiskManager};
use crate::strategy::{OrderIntent, Strategy, StrategyContext};
use chrono::{DateTime, Duration, Utc};
use std::mem;
use tracing::{debug, error, info, warn};

pub struct EngineCore {
    run_id: RunId,
    seed: u64,
    status: EngineStatus,
    clock: Option<DateTime<Utc>>,
    stop_at: Option<DateTime<Utc>>,
    portfolio: Portfolio,
    book: OrderBook,
    ids: IdGen,
    bus: EventBus,
    risk: RiskManager,
    execution: Box<dyn ExecutionClient>,
    strategy: Box<dyn Strategy>,
    recorder: Box<dyn Recorder>,
    stop: StopHandle,
    trace: RunTrace,
}

impl EngineCore {
    pub fn new(
        config: &LivebackConfig,
        policy: BusPolicy,
        execution: Box<dyn ExecutionClient>,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            run_id: config.engine.run_id(),
            seed: config.engine.seed,
            status: EngineStatus::Init,
            clock: None,
            stop_at: config.engine.stop_at,
            portfolio: Portfolio::new(config.engine.initial_cash),
            book: OrderBook::new(),
            ids: IdGen::new(),
            bus: EventBus::new(policy),
            risk: config.risk.build(),
            execution,
            strategy,
            recorder: Box::new(NullRecorder),
            stop: StopHandle::new(),
            trace: RunTrace::default(),
        })
    }

    pub fn set_recorder(&mut self, recorder: Box<dyn Recorder>) {
        self.recorder = recorder;
    }

    pub fn set_risk(&mut self, risk: RiskManager) {
        self.risk = risk;
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.book
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Logical clock. Before the first event it reads as the earliest
    /// representable instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Pull events until the source is exhausted or a stop is requested,
    /// then shut down. Fatal errors leave the core in `Error`.
    pub fn drive<D: DataClient + ?Sized>(&mut self, data: &mut D) -> Result<RunReport, EngineError> {
        self.start()?;
        data.attach_stop(self.stop.clone());

        loop {
            if self.halt_before(None) {
                break;
            }
            let Some(item) = data.next_event() else {
                break;
            };
            let event = match item.and_then(|e| e.validate().map(|()| e)) {
                Ok(event) => event,
                Err(err) => {
                    self.data_error(err)?;
                    continue;
                }
            };
            if self.halt_before(Some(event.timestamp)) {
                debug!(timestamp = %event.timestamp, "stop timestamp reached");
                break;
            }

            match self.bus.publish(event) {
                Ok(Published::Dropped) => continue,
                Ok(_) => {}
                Err(err) => return Err(self.fail(err.into())),
            }
            while let Some(event) = self.bus.next() {
                self.process(event);
            }
        }

        let mut pending: Vec<Event> = std::iter::from_fn(|| self.bus.next()).collect();
        pending.extend(data.drain_pending());
        self.shutdown(pending, || data.drain_pending());
        Ok(self.report())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.status != EngineStatus::Init {
            return Err(EngineError::InvalidState(self.status));
        }
        self.status = EngineStatus::Running;
        info!(
            run_id = %self.run_id,
            strategy = self.strategy.name(),
            execution = self.execution.name(),
            risk_enabled = self.risk.is_enabled(),
            "run started"
        );
        let ctx = self.context();
        self.strategy.initialize(&ctx);
        Ok(())
    }

    /// Earliest of the configured and the requested stop timestamps.
    fn stop_limit(&self) -> Option<DateTime<Utc>> {
        match (self.stop_at, self.stop.requested_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the loop must end before processing an event at `next`.
    fn halt_before(&self, next: Option<DateTime<Utc>>) -> bool {
        if let (Some(limit), Some(ts)) = (self.stop_limit(), next) {
            if ts >= limit {
                return true;
            }
        }
        self.stop.is_stopped() && self.stop.requested_at().is_none()
    }

    fn stop_timestamp(&self) -> DateTime<Utc> {
        self.stop_limit().unwrap_or_else(|| match self.clock {
            Some(clock) => clock + Duration::nanoseconds(1),
            None => DateTime::<Utc>::MAX_UTC,
        })
    }

    fn data_error(&mut self, err: DataError) -> Result<(), EngineError> {
        if err.is_fatal() {
            return Err(self.fail(err.into()));
        }
        warn!(error = %err, "skipping bad event");
        self.trace.data_errors.push(err.to_string());
        Ok(())
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        self.status = EngineStatus::Error;
        error!(run_id = %self.run_id, error = %err, "run aborted");
        self.recorder.flush();
        err
    }

    fn advance_clock(&mut self, ts: DateTime<Utc>) {
        if self.clock.map_or(true, |c| ts > c) {
            self.clock = Some(ts);
        }
    }

    fn context(&self) -> StrategyContext {
        let now = self.now();
        StrategyContext::new(
            now,
            self.portfolio.snapshot(now, self.book.working_orders()),
            self.book.working_orders().cloned().collect(),
            self.ids.peek(),
        )
    }

    /// Process one event delivered by the bus.
    pub fn process(&mut self, event: Event) {
        self.advance_clock(event.timestamp);
        self.recorder.record(Record::Event(event.clone()));

        if event.kind == EventKind::Fill {
            if let Some(fill) = event.fill {
                self.apply_fill(fill);
            }
        } else {
            if let Some(price) = event.reference_price() {
                self.portfolio.update_mark(&event.symbol, price);
                self.recheck_exposure(&event.symbol);
            }
            let now = self.now();
            for fill in self.execution.on_market_event(&event, now) {
                self.apply_fill(fill);
            }

            let ctx = self.context();
            let intents = self.strategy.on_event(&event, &ctx);
            for intent in intents {
                match intent {
                    OrderIntent::Submit(new) => self.submit(new),
                    OrderIntent::Cancel(id) => self.cancel(id, "canceled by strategy"),
                }
            }
        }

        for fill in self.execution.poll_fills() {
            self.apply_fill(fill);
        }
        self.reconcile_unknown();
        self.record_equity();
    }

    fn record_equity(&mut self) {
        let timestamp = self.now();
        let equity = self.portfolio.record_equity(timestamp);
        self.recorder.record(Record::Equity { timestamp, equity });
    }

    fn submit(&mut self, new: NewOrder) {
        let now = self.now();
        let id = self.ids.next_order_id();
        let shape_error = new.shape_error();
        let order = new.into_order(id, now);

        // Snapshot before the order joins the book, so risk does not count it twice.
        let snapshot = self.portfolio.snapshot(now, self.book.working_orders());
        self.book.submit(order.clone());
        self.recorder.record(Record::Order(order.clone()));

        if let Some(detail) = shape_error {
            self.reject(id, RejectReason::InvalidOrder(detail));
            return;
        }
        if let RiskDecision::Reject(reason) = self.risk.validate(&order, &snapshot) {
            self.reject(id, reason);
            return;
        }

        match self.execution.send_order(&order) {
            Ok(_) => debug!(
                order_id = %id,
                symbol = %order.symbol,
                side = %order.side,
                qty = order.quantity,
                "order sent"
            ),
            Err(ExecutionError::Rejected(reason)) => self.reject(id, reason),
            Err(ExecutionError::Timeout { after }) => self.timed_out(id, "send_order", after),
            Err(err) => self.reject(id, RejectReason::BrokerRejected(err.to_string())),
        }
    }

    fn cancel(&mut self, order_id: OrderId, reason: &str) {
        self.cancel_at(order_id, reason, self.now());
    }

    /// Cancel, recording `at` as the cancel time. Venue fills stamped at or
    /// before it are still applied if they arrive later.
    fn cancel_at(&mut self, order_id: OrderId, reason: &str, at: DateTime<Utc>) {
        let Some(status) = self.book.get(order_id).map(|o| o.status) else {
            self.order_error(OrderError::NotFound(order_id));
            return;
        };
        if !status.is_cancelable() {
            debug!(order_id = %order_id, %status, "cancel ignored, order not cancelable");
            return;
        }

        match self.execution.cancel_order(order_id) {
            Ok(()) => match self.book.cancel(order_id, at, reason) {
                Ok(()) => self.record_order(order_id),
                Err(err) => self.order_error(err),
            },
            Err(ExecutionError::NotCancelable(_)) => {
                warn!(order_id = %order_id, "venue refused cancel, order already complete there");
            }
            Err(ExecutionError::Timeout { after }) => self.timed_out(order_id, "cancel_order", after),
            Err(err) => warn!(order_id = %order_id, error = %err, "cancel failed"),
        }
    }

    /// Re-run the exposure rule for the symbol's cancelable orders at the new
    /// mark. An order accepted at an older price is withdrawn before it can
    /// fill past the limit.
    fn recheck_exposure(&mut self, symbol: &str) {
        if !self.risk.checks_exposure() {
            return;
        }
        let now = self.now();
        let candidates: Vec<_> = self
            .book
            .working_orders()
            .filter(|o| o.symbol == symbol && o.status.is_cancelable())
            .cloned()
            .collect();
        for order in candidates {
            let others = self.book.working_orders().filter(|o| o.id != order.id);
            let snapshot = self.portfolio.snapshot(now, others);
            if self.risk.exposure_breached_at_mark(&order, &snapshot) {
                self.withdraw(order.id, RejectReason::MaxExposureExceeded);
            }
        }
    }

    /// Pull an accepted order that no longer passes risk. An untouched order
    /// ends `Rejected` with the reason; a partly filled one is canceled.
    fn withdraw(&mut self, order_id: OrderId, reason: RejectReason) {
        let Some(status) = self.book.get(order_id).map(|o| o.status) else {
            return;
        };
        info!(order_id = %order_id, %reason, %status, "withdrawing working order");
        if status == OrderStatus::Partial {
            self.cancel(order_id, &reason.to_string());
            return;
        }

        match self.execution.cancel_order(order_id) {
            Ok(()) => self.reject(order_id, reason),
            Err(ExecutionError::Timeout { after }) => self.timed_out(order_id, "cancel_order", after),
            Err(err) => warn!(order_id = %order_id, error = %err, "withdraw failed"),
        }
    }

    fn reject(&mut self, order_id: OrderId, reason: RejectReason) {
        let now = self.now();
        if let Err(err) = self.book.reject(order_id, &reason, now) {
            self.order_error(err);
            return;
        }
        self.notify_rejection(order_id, reason);
    }

    /// Trace, record and report an order that has just become `Rejected`.
    fn notify_rejection(&mut self, order_id: OrderId, reason: RejectReason) {
        let Some(order) = self.book.get(order_id).cloned() else {
            return;
        };
        warn!(
            error = %OrderError::Rejected(order_id, reason.clone()),
            symbol = %order.symbol,
            "order rejected"
        );
        let now = self.now();
        self.trace.rejections.push(RejectionRecord {
            order_id,
            timestamp: now,
            symbol: order.symbol.clone(),
            reason: reason.clone(),
        });
        self.recorder.record(Record::Order(order.clone()));
        let ctx = self.context();
        self.strategy.on_rejection(&order, &reason, &ctx);
    }

    fn timed_out(&mut self, order_id: OrderId, operation: &str, after: std::time::Duration) {
        let after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
        let err = EngineError::ExecutionTimeout { order_id, after_ms };
        warn!(error = %err, operation, "execution call timed out");

        let now = self.now();
        if let Err(e) = self.book.mark_unknown(order_id, now, &format!("{operation} timed out")) {
            self.order_error(e);
            return;
        }
        self.record_order(order_id);
        self.trace.timeouts.push(TimeoutRecord {
            order_id,
            timestamp: now,
            operation: operation.to_string(),
            after_ms,
        });
    }

    fn apply_fill(&mut self, fill: Fill) {
        let now = self.now();
        let order = match self.book.record_fill(&fill, now) {
            Ok(order) => order.clone(),
            Err(err) => {
                self.order_error(err);
                return;
            }
        };

        let entry_price = self
            .portfolio
            .position(&fill.symbol)
            .map_or(0.0, |p| p.average_cost);
        let change = self.portfolio.apply_fill(&fill);
        if change.closed_quantity > QTY_EPSILON {
            self.trace.trades.push(ClosedTrade {
                order_id: fill.order_id,
                symbol: fill.symbol.clone(),
                side: fill.side,
                timestamp: fill.timestamp,
                quantity: change.closed_quantity,
                entry_price,
                exit_price: fill.price,
                gross_pnl: change.realized_pnl,
                fees: fill.fees,
            });
        }
        debug!(
            order_id = %fill.order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            qty = fill.quantity,
            price = fill.price,
            status = %order.status,
            "fill applied"
        );
        self.recorder.record(Record::Fill(fill.clone()));
        self.recorder.record(Record::Order(order));
        self.trace.fills.push(fill.clone());

        let ctx = self.context();
        self.strategy.on_fill(&fill, &ctx);
    }

    /// Ask the venue about every `Unknown` order. Polls that time out again
    /// are retried after the next event.
    fn reconcile_unknown(&mut self) {
        for order_id in self.book.unknown_ids() {
            let report = match self.execution.reconcile(order_id) {
                Ok(report) => report,
                Err(ExecutionError::Timeout { .. }) => {
                    debug!(order_id = %order_id, "reconciliation poll timed out, will retry");
                    continue;
                }
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "reconciliation poll failed");
                    continue;
                }
            };

            let now = self.now();
            let resolved_to = match self.book.resolve(&report, now) {
                Ok(status) => status,
                Err(err) => {
                    self.order_error(err);
                    continue;
                }
            };
            warn!(
                order_id = %order_id,
                venue = ?report.status,
                venue_filled = report.filled_quantity,
                resolved = %resolved_to,
                "unknown order reconciled"
            );
            self.trace.reconciliations.push(Reconciliation {
                order_id,
                timestamp: now,
                venue_status: report.status,
                venue_filled: report.filled_quantity,
                resolved_to,
            });

            if resolved_to == OrderStatus::Rejected {
                let detail = format!("venue reported {:?} after timeout", report.status);
                self.notify_rejection(order_id, RejectReason::BrokerRejected(detail));
            } else {
                self.record_order(order_id);
            }
        }
    }

    fn record_order(&mut self, order_id: OrderId) {
        if let Some(order) = self.book.get(order_id) {
            self.recorder.record(Record::Order(order.clone()));
        }
    }

    fn order_error(&mut self, err: OrderError) {
        warn!(error = %err, "order book refused update");
        self.trace.order_errors.push(err.to_string());
    }

    /// Wind the run down.
    ///
    /// Fills queued before the stop timestamp are applied first, then every
    /// cancelable order is canceled as of the stop timestamp and `Unknown`
    /// orders are polled once.
    /// Fills that surface during the cancel round are settled the same way.
    /// Fills at or after the stop timestamp are discarded and traced.
    fn shutdown(&mut self, pending: Vec<Event>, mut drain: impl FnMut() -> Vec<Event>) {
        let stop_ts = self.stop_timestamp();

        let mut queued = Self::fills_of(pending);
        queued.extend(self.execution.poll_fills());
        self.settle(queued, stop_ts);

        // Venue fills matched before the stop still count.
        let cancel_ts = if stop_ts == DateTime::<Utc>::MAX_UTC {
            self.now()
        } else {
            stop_ts.max(self.now())
        };
        for order_id in self.book.cancelable_ids() {
            self.cancel_at(order_id, "engine stop", cancel_ts);
        }
        self.reconcile_unknown();

        let mut queued = Self::fills_of(drain());
        queued.extend(self.execution.poll_fills());
        self.settle(queued, stop_ts);

        self.status = EngineStatus::Stopped;
        self.recorder.flush();
        info!(
            run_id = %self.run_id,
            stop_ts = %stop_ts,
            fills = self.trace.fills.len(),
            rejections = self.trace.rejections.len(),
            timeouts = self.trace.timeouts.len(),
            discarded_fills = self.trace.discarded_fills.len(),
            equity = self.portfolio.equity(),
            "run stopped"
        );
    }

    fn fills_of(events: Vec<Event>) -> Vec<Fill> {
        events
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::Fill => e.fill,
                _ => None,
            })
            .collect()
    }

    fn settle(&mut self, mut fills: Vec<Fill>, stop_ts: DateTime<Utc>) {
        fills.sort_by_key(|f| f.timestamp);
        for fill in fills {
            if fill.timestamp < stop_ts {
                self.advance_clock(fill.timestamp);
                self.apply_fill(fill);
                self.record_equity();
            } else {
                warn!(
                    order_id = %fill.order_id,
                    timestamp = %fill.timestamp,
                    stop_ts = %stop_ts,
                    "fill after stop timestamp discarded"
                );
                self.trace.discarded_fills.push(fill);
            }
        }
    }

    fn report(&mut self) -> RunReport {
        let trace = mem::take(&mut self.trace);
        let now = self.now();
        let curve = self.portfolio.equity_curve().to_vec();

        RunReport {
            status: self.status,
            run_id: self.run_id.to_hex(),
            strategy: self.strategy.name().to_string(),
            execution: self.execution.name().to_string(),
            summary: PerformanceSummary::compute(
                self.portfolio.initial_cash,
                &curve,
                &trace.fills,
                &trace.trades,
                self.portfolio.total_realized_pnl(),
                trace.rejections.len(),
            ),
            fingerprint: RunFingerprint::compute(&self.run_id, self.seed, &trace.fills, &curve),
            orders: self.book.orders().cloned().collect(),
            final_portfolio: self.portfolio.snapshot(now, self.book.working_orders()),
            bus_stats: self.bus.stats(),
            equity_curve: curve,
            fills: trace.fills,
            trades: trace.trades,
            rejections: trace.rejections,
            timeouts: trace.timeouts,
            data_errors: trace.data_errors,
            order_errors: trace.order_errors,
            discarded_fills: trace.discarded_fills,
            reconciliations: trace.reconciliations,
        }
    }
}
