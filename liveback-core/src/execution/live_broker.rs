//! Live broker: a venue gateway behind a worker thread and a timeout.
//!
//! Every request is sent to the worker over an `mpsc` channel with its own
//! reply channel, and the caller waits at most `execution_timeout` for the
//! answer. A late answer is discarded: the caller has already been told
//! `ExecutionError::Timeout` and the order sits in `UNKNOWN` until a
//! reconciliation poll resolves it.
//!
//! Fills never come back through a reply. The gateway publishes them on its
//! `FeedHandle` as FILL events so they are sequenced with market data.

use super::{ExecutionClient, ExecutionError, ReconcileReport};
use crate::domain::{Event, Fill, Order, OrderId};
use crate::risk::RejectReason;
use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("venue rejected order: {0}")]
    Rejected(String),

    #[error("order is not cancelable at the venue")]
    NotCancelable,

    #[error("venue does not know the order")]
    UnknownOrder,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// A concrete venue connection. Calls may block; they run on the broker's
/// worker thread, never on the engine loop.
pub trait BrokerGateway: Send + 'static {
    fn submit(&mut self, order: &Order) -> Result<(), GatewayError>;

    fn cancel(&mut self, order_id: OrderId) -> Result<(), GatewayError>;

    fn query(&mut self, order_id: OrderId) -> Result<ReconcileReport, GatewayError>;
}

enum GatewayCommand {
    Submit(Order, Sender<Result<(), GatewayError>>),
    Cancel(OrderId, Sender<Result<(), GatewayError>>),
    Query(OrderId, Sender<Result<ReconcileReport, GatewayError>>),
}

pub struct LiveBroker {
    tx: Sender<GatewayCommand>,
    timeout: Duration,
    _worker: JoinHandle<()>,
}

impl LiveBroker {
    /// Move `gateway` onto a dedicated worker thread.
    pub fn spawn<G: BrokerGateway>(gateway: G, execution_timeout: Duration) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<GatewayCommand>();
        let worker = thread::Builder::new()
            .name("liveback-gateway".into())
            .spawn(move || {
                let mut gateway = gateway;
                // Ends when the broker (the only sender) is dropped.
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        GatewayCommand::Submit(order, reply) => {
                            let _ = reply.send(gateway.submit(&order));
                        }
                        GatewayCommand::Cancel(id, reply) => {
                            let _ = reply.send(gateway.cancel(id));
                        }
                        GatewayCommand::Query(id, reply) => {
                            let _ = reply.send(gateway.query(id));
                        }
                    }
                }
                debug!("gateway worker exiting");
            })?;

        Ok(Self {
            tx,
            timeout: execution_timeout,
            _worker: worker,
        })
    }

    pub fn execution_timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T>(
        &self,
        make: impl FnOnce(Sender<Result<T, GatewayError>>) -> GatewayCommand,
    ) -> Result<Result<T, GatewayError>, ExecutionError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| ExecutionError::Gateway("gateway worker is gone".into()))?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout {
                after: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::Gateway(
                "gateway worker dropped the request".into(),
            )),
        }
    }
}

impl ExecutionClient for LiveBroker {
    fn name(&self) -> &str {
        "LiveBroker"
    }

    fn send_order(&mut self, order: &Order) -> Result<OrderId, ExecutionError> {
        let order_copy = order.clone();
        match self.call(|reply| GatewayCommand::Submit(order_copy, reply))? {
            Ok(()) => Ok(order.id),
            Err(GatewayError::Rejected(msg)) => {
                Err(ExecutionError::Rejected(RejectReason::BrokerRejected(msg)))
            }
            Err(e) => Err(ExecutionError::Gateway(e.to_string())),
        }
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExecutionError> {
        match self.call(|reply| GatewayCommand::Cancel(order_id, reply))? {
            Ok(()) => Ok(()),
            Err(GatewayError::NotCancelable) => Err(ExecutionError::NotCancelable(order_id)),
            Err(GatewayError::UnknownOrder) => Err(ExecutionError::UnknownOrder(order_id)),
            Err(e) => Err(ExecutionError::Gateway(e.to_string())),
        }
    }

    /// Live venues match on their own; market events are ignored.
    fn on_market_event(&mut self, _event: &Event, _now: DateTime<Utc>) -> Vec<Fill> {
        Vec::new()
    }

    fn reconcile(&mut self, order_id: OrderId) -> Result<ReconcileReport, ExecutionError> {
        match self.call(|reply| GatewayCommand::Query(order_id, reply))? {
            Ok(report) => Ok(report),
            Err(GatewayError::UnknownOrder) => Err(ExecutionError::UnknownOrder(order_id)),
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "reconciliation query failed");
                Err(ExecutionError::Gateway(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewOrder;
    use crate::execution::VenueStatus;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Venue {
        orders: BTreeMap<OrderId, f64>,
        stall: Option<Duration>,
    }

    impl BrokerGateway for Venue {
        fn submit(&mut self, order: &Order) -> Result<(), GatewayError> {
            if let Some(d) = self.stall {
                thread::sleep(d);
            }
            if order.quantity > 1_000.0 {
                return Err(GatewayError::Rejected("size".into()));
            }
            self.orders.insert(order.id, 0.0);
            Ok(())
        }

        fn cancel(&mut self, order_id: OrderId) -> Result<(), GatewayError> {
            self.orders
                .remove(&order_id)
                .map(|_| ())
                .ok_or(GatewayError::UnknownOrder)
        }

        fn query(&mut self, order_id: OrderId) -> Result<ReconcileReport, GatewayError> {
            Ok(ReconcileReport {
                order_id,
                status: if self.orders.contains_key(&order_id) {
                    VenueStatus::Working
                } else {
                    VenueStatus::NotFound
                },
                filled_quantity: 0.0,
            })
        }
    }

    fn order(id: u64, qty: f64) -> Order {
        NewOrder::buy("AAPL", qty).into_order(OrderId(id), Utc::now())
    }

    #[test]
    fn round_trips_through_worker() {
        let mut broker = LiveBroker::spawn(Venue::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(broker.send_order(&order(1, 10.0)), Ok(OrderId(1)));
        assert_eq!(
            broker.reconcile(OrderId(1)).unwrap().status,
            VenueStatus::Working
        );
        assert_eq!(broker.cancel_order(OrderId(1)), Ok(()));
        assert_eq!(
            broker.cancel_order(OrderId(1)),
            Err(ExecutionError::UnknownOrder(OrderId(1)))
        );
    }

    #[test]
    fn venue_rejection_maps_to_broker_rejected() {
        let mut broker = LiveBroker::spawn(Venue::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            broker.send_order(&order(1, 5_000.0)),
            Err(ExecutionError::Rejected(RejectReason::BrokerRejected(
                "size".into()
            )))
        );
    }

    #[test]
    fn stalled_venue_times_out() {
        let venue = Venue {
            stall: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let mut broker = LiveBroker::spawn(venue, Duration::from_millis(20)).unwrap();
        assert_eq!(
            broker.send_order(&order(1, 10.0)),
            Err(ExecutionError::Timeout {
                after: Duration::from_millis(20)
            })
        );
    }
}
