//! Price fan-out.
//!
//! Drains the gateway queue one event at a time. For each event the
//! repository is asked which orders on that security are Pending right now,
//! and each of their instances is signalled without waiting for it to react.
//! An instance that settles between the query and the delivery ignores the
//! stale price itself.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sld_db::OrderRepository;
use sld_schemas::PriceEvent;

use crate::engine::{EngineError, InstanceEngine, OrderSignal};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    /// Handles returned by the query whose instance was not running.
    pub undeliverable: usize,
    /// The repository query failed and the event was dropped.
    pub query_failed: bool,
}

#[derive(Clone)]
pub struct PriceDispatcher {
    repo: Arc<dyn OrderRepository>,
    engine: InstanceEngine,
}

impl PriceDispatcher {
    pub fn new(repo: Arc<dyn OrderRepository>, engine: InstanceEngine) -> Self {
        Self { repo, engine }
    }

    pub fn start(self, queue: mpsc::Receiver<PriceEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(queue))
    }

    /// Runs until every sender of `queue` is gone.
    pub async fn run(self, mut queue: mpsc::Receiver<PriceEvent>) {
        while let Some(ev) = queue.recv().await {
            self.dispatch(&ev).await;
        }
        info!("price queue closed; dispatcher stopping");
    }

    pub async fn dispatch(&self, ev: &PriceEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let handles = match self.repo.pending_handles_for_security(&ev.security).await {
            Ok(h) => h,
            Err(e) => {
                // Not retried: the next tick for this security supersedes it.
                warn!(
                    security = %ev.security,
                    price = ev.price,
                    error = %e,
                    "pending order query failed; price dropped"
                );
                outcome.query_failed = true;
                return outcome;
            }
        };

        for handle in handles {
            match self
                .engine
                .signal(&handle, OrderSignal::Price(ev.clone()))
                .await
            {
                Ok(()) => outcome.delivered += 1,
                Err(e @ (EngineError::UnknownHandle(_) | EngineError::InstanceGone(_))) => {
                    debug!(handle = %handle, error = %e, "price not delivered");
                    outcome.undeliverable += 1;
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "price delivery failed");
                    outcome.undeliverable += 1;
                }
            }
        }

        debug!(
            security = %ev.security,
            price = ev.price,
            delivered = outcome.delivered,
            "price dispatched"
        );
        outcome
    }
}
