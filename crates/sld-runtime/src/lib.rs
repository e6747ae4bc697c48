//! sld-runtime
//!
//! The order lifecycle engine.
//!
//! - [`machine`]: the per-order state machine, free of I/O.
//! - [`engine`]: registry of live instances and signal delivery.
//! - `instance`: the task that runs one order's state machine.
//! - [`dispatcher`]: fans price events out to the instances that care.
//! - [`service`]: intake, cancel, queries and crash recovery.
//!
//! Control flow: gateway queue -> [`PriceDispatcher`] -> repository query ->
//! [`InstanceEngine::signal`] -> instance -> repository writes and execution.

use std::sync::Arc;

use tokio::sync::broadcast;

use sld_db::OrderRepository;
use sld_execution::{ExecutionGateway, RetryPolicy};
use sld_schemas::OrderUpdate;

pub mod dispatcher;
pub mod engine;
mod instance;
pub mod machine;
pub mod service;

pub use dispatcher::{DispatchOutcome, PriceDispatcher};
pub use engine::{EngineError, InstanceEngine, OrderSignal};
pub use machine::{MachineState, OrderMachine};
pub use service::{OrderService, RecoveryReport, ServiceError};

/// Collaborators shared by every instance.
#[derive(Clone)]
pub(crate) struct EngineContext {
    pub(crate) repo: Arc<dyn OrderRepository>,
    pub(crate) gateway: Arc<dyn ExecutionGateway>,
    pub(crate) engine: InstanceEngine,
    pub(crate) policy: RetryPolicy,
    pub(crate) updates: broadcast::Sender<OrderUpdate>,
}
