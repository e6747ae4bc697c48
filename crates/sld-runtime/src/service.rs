//! Order service: the entry points the outer layer calls.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use sld_db::{OrderRepository, RepoError};
use sld_execution::{ExecutionGateway, RetryPolicy};
use sld_schemas::{NewOrder, Order, OrderStatus, OrderUpdate, OrderValidationError};

use crate::dispatcher::PriceDispatcher;
use crate::engine::{EngineError, InstanceEngine, OrderSignal};
use crate::instance::{handle_for, start_instance, Bootstrap};
use crate::EngineContext;

/// Capacity of the order update bus.
pub const UPDATE_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] OrderValidationError),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("order {id} is already settled ({status})")]
    NotPending { id: String, status: OrderStatus },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("order instance failed to start: {0}")]
    Startup(String),

    #[error("repository: {0}")]
    Repository(RepoError),
}

impl From<RepoError> for ServiceError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(id) => ServiceError::NotFound(id),
            RepoError::NotPending { id, status } => ServiceError::NotPending { id, status },
            other => ServiceError::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub already_running: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct OrderService {
    ctx: EngineContext,
}

impl OrderService {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        gateway: Arc<dyn ExecutionGateway>,
        policy: RetryPolicy,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUS_CAPACITY);
        Self {
            ctx: EngineContext {
                repo,
                gateway,
                engine: InstanceEngine::new(),
                policy,
                updates,
            },
        }
    }

    pub fn engine(&self) -> &InstanceEngine {
        &self.ctx.engine
    }

    pub fn repository(&self) -> Arc<dyn OrderRepository> {
        self.ctx.repo.clone()
    }

    /// A dispatcher wired to the same repository and instances.
    pub fn dispatcher(&self) -> PriceDispatcher {
        PriceDispatcher::new(self.ctx.repo.clone(), self.ctx.engine.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderUpdate> {
        self.ctx.updates.subscribe()
    }

    /// Validate intake, start the order's instance and return the order once
    /// it is persisted Pending with its handle recorded.
    pub async fn place(&self, new: NewOrder) -> Result<Order, ServiceError> {
        let order = new.into_order(Utc::now())?;
        let order = start_instance(&self.ctx, Bootstrap::Create(order)).await?;
        info!(
            order_id = %order.id,
            security = %order.security,
            trigger_price = order.trigger_price,
            quantity = order.quantity,
            "order placed"
        );
        Ok(order)
    }

    /// Conditionally cancel a Pending order, then tell its instance.
    ///
    /// The row is read before the write so nothing can fail once the cancel
    /// has landed: a committed cancel is always reported as success.
    pub async fn cancel(&self, id: &str) -> Result<Order, ServiceError> {
        let mut order = self.ctx.repo.get(id).await?;
        self.ctx.repo.cancel(id).await?;
        order.status = OrderStatus::Cancelled;
        info!(order_id = %id, "order cancelled");
        self.ctx
            .publish(&order.id, &order.security, OrderStatus::Cancelled);

        let handle = handle_for(&order);
        if let Err(e) = self.ctx.engine.signal(&handle, OrderSignal::Cancel).await {
            debug!(order_id = %id, error = %e, "cancel signal not delivered");
        }
        Ok(order)
    }

    pub async fn get(&self, id: &str) -> Result<Order, ServiceError> {
        Ok(self.ctx.repo.get(id).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.ctx.repo.list_all().await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.ctx.repo.list_pending().await?)
    }

    /// Start an instance for every Pending order in storage. Safe to call
    /// repeatedly: orders whose instance is already running are skipped.
    pub async fn recover(&self) -> Result<RecoveryReport, ServiceError> {
        let pending = self.ctx.repo.list_pending().await?;
        let mut report = RecoveryReport::default();

        for order in pending {
            let id = order.id.clone();
            match start_instance(&self.ctx, Bootstrap::Rehydrate(order)).await {
                Ok(_) => report.resumed += 1,
                Err(ServiceError::Engine(EngineError::AlreadyStarted(_))) => {
                    report.already_running += 1
                }
                Err(e) => {
                    warn!(order_id = %id, error = %e, "could not resume order");
                    report.failed += 1;
                }
            }
        }

        info!(
            resumed = report.resumed,
            already_running = report.already_running,
            failed = report.failed,
            "pending orders recovered"
        );
        Ok(report)
    }
}
