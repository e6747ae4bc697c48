//! One live order instance: bootstrap, then a signal loop.
//!
//! Signals are handled one at a time in arrival order. Every signal starts
//! with a read of the persisted status; once storage says the order is
//! terminal the instance stops listening. All repository writes are
//! conditional on `Pending`, so a late cancel and a finished execution can
//! never both land.

use std::future::Future;
use std::ops::ControlFlow;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use sld_db::RepoError;
use sld_execution::{run_activity, ActivityError};
use sld_schemas::{ExecutionHandle, Order, OrderStatus, OrderUpdate, PriceEvent, Retryable};

use crate::engine::OrderSignal;
use crate::machine::{CancelDecision, MachineEvent, OrderMachine, PriceDecision};
use crate::EngineContext;

/// How an instance comes to life.
pub(crate) enum Bootstrap {
    /// Brand-new order: insert it, then record the handle.
    Create(Order),
    /// Pending order found in storage after a restart.
    Rehydrate(Order),
}

impl Bootstrap {
    fn order(&self) -> &Order {
        match self {
            Bootstrap::Create(o) | Bootstrap::Rehydrate(o) => o,
        }
    }
}

/// Collapse a failed repository activity into the error the caller sees.
pub(crate) fn repo_failure(err: ActivityError<RepoError>) -> RepoError {
    let summary = err.to_string();
    err.into_last_error()
        .unwrap_or(RepoError::Persistence(summary))
}

/// The handle an order is (or will be) addressed by.
pub(crate) fn handle_for(order: &Order) -> ExecutionHandle {
    order
        .execution_handle
        .clone()
        .unwrap_or_else(|| ExecutionHandle::for_order(&order.id))
}

/// Register the instance, spawn it, and wait until its order is persisted
/// with the handle recorded.
pub(crate) async fn start_instance(
    ctx: &EngineContext,
    bootstrap: Bootstrap,
) -> Result<Order, crate::ServiceError> {
    let handle = handle_for(bootstrap.order());
    let inbox = ctx.engine.register(&handle).await?;
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(run_instance(ctx.clone(), handle.clone(), inbox, bootstrap, ready_tx));

    match ready_rx.await {
        Ok(Ok(order)) => Ok(order),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(crate::ServiceError::Startup(format!(
            "instance {handle} stopped before it was ready"
        ))),
    }
}

async fn run_instance(
    ctx: EngineContext,
    handle: ExecutionHandle,
    inbox: mpsc::UnboundedReceiver<OrderSignal>,
    bootstrap: Bootstrap,
    ready: oneshot::Sender<Result<Order, RepoError>>,
) {
    let order = match bind(&ctx, &handle, bootstrap).await {
        Ok(order) => order,
        Err(e) => {
            error!(handle = %handle, error = %e, "order instance failed to start");
            drop(inbox);
            ctx.engine.release(&handle).await;
            let _ = ready.send(Err(e));
            return;
        }
    };

    info!(
        order_id = %order.id,
        handle = %handle,
        security = %order.security,
        trigger_price = order.trigger_price,
        "order instance listening"
    );
    let instance = OrderInstance {
        machine: OrderMachine::rehydrate(&order),
        ctx: ctx.clone(),
    };
    let _ = ready.send(Ok(order));

    instance.listen(inbox).await;
    ctx.engine.release(&handle).await;
}

/// Persist the order (if new) and record the handle (if missing).
async fn bind(
    ctx: &EngineContext,
    handle: &ExecutionHandle,
    bootstrap: Bootstrap,
) -> Result<Order, RepoError> {
    let repo = &ctx.repo;

    let mut order = match bootstrap {
        Bootstrap::Create(order) => {
            let row = &order;
            run_activity("create_order", &ctx.policy, |_| async move {
                // An earlier attempt may have landed before its reply was lost.
                match repo.create(row).await {
                    Err(RepoError::AlreadyExists(_)) => Ok(()),
                    other => other,
                }
            })
            .await
            .map_err(repo_failure)?;
            ctx.publish(&order.id, &order.security, OrderStatus::Pending);
            order
        }
        Bootstrap::Rehydrate(order) => order,
    };

    // The row exists from here on. Leaving without the handle recorded would
    // strand it Pending where the dispatcher cannot address it, so storage
    // failures are retried until storage answers.
    if order.execution_handle.is_none() {
        let id = order.id.as_str();
        until_answered(ctx, "associate_handle", id, |_| async move {
            match repo.associate_handle(id, handle).await {
                Err(RepoError::HandleAlreadySet { existing, .. }) if &existing == handle => Ok(()),
                other => other,
            }
        })
        .await?;
        order.execution_handle = Some(handle.clone());
    }
    Ok(order)
}

/// Run `op` under the policy in rounds, sleeping `max_interval` between
/// rounds, until it succeeds or fails with a non-retryable error.
async fn until_answered<T, F, Fut>(
    ctx: &EngineContext,
    activity: &str,
    order_id: &str,
    mut op: F,
) -> Result<T, RepoError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RepoError>>,
{
    loop {
        let err = match run_activity(activity, &ctx.policy, &mut op).await {
            Ok(v) => return Ok(v),
            Err(e) => repo_failure(e),
        };
        if !err.is_retryable() {
            return Err(err);
        }
        error!(
            order_id = %order_id,
            activity,
            error = %err,
            "storage unavailable; will keep trying"
        );
        tokio::time::sleep(ctx.policy.max_interval).await;
    }
}

struct OrderInstance {
    machine: OrderMachine,
    ctx: EngineContext,
}

impl OrderInstance {
    async fn listen(mut self, mut inbox: mpsc::UnboundedReceiver<OrderSignal>) {
        while let Some(signal) = inbox.recv().await {
            if self.handle_signal(signal).await.is_break() {
                break;
            }
        }
        debug!(
            order_id = %self.machine.order_id,
            state = ?self.machine.state(),
            "order instance stopped"
        );
    }

    async fn handle_signal(&mut self, signal: OrderSignal) -> ControlFlow<()> {
        if let Err(e) = self.refresh().await {
            warn!(
                order_id = %self.machine.order_id,
                error = %e,
                "could not read order status; signal dropped"
            );
            return ControlFlow::Continue(());
        }
        if self.machine.is_terminal() {
            debug!(
                order_id = %self.machine.order_id,
                state = ?self.machine.state(),
                "order already settled; ignoring signal"
            );
            return ControlFlow::Break(());
        }

        match signal {
            OrderSignal::Price(ev) => self.on_price(ev).await,
            OrderSignal::Cancel => self.on_cancel().await,
        }
    }

    async fn refresh(&mut self) -> Result<(), RepoError> {
        let repo = &self.ctx.repo;
        let id = self.machine.order_id.as_str();
        let order = run_activity("load_order", &self.ctx.policy, |_| async move {
            repo.get(id).await
        })
        .await
        .map_err(repo_failure)?;
        self.machine.observe(order.status);
        Ok(())
    }

    async fn on_price(&mut self, ev: PriceEvent) -> ControlFlow<()> {
        match self.machine.on_price(&ev) {
            PriceDecision::Ignore(reason) => {
                debug!(
                    order_id = %self.machine.order_id,
                    price = ev.price,
                    ?reason,
                    "price ignored"
                );
                ControlFlow::Continue(())
            }
            PriceDecision::Trigger => {
                self.apply(MachineEvent::PriceAccepted);
                info!(
                    order_id = %self.machine.order_id,
                    security = %self.machine.security,
                    price = ev.price,
                    trigger_price = self.machine.trigger_price,
                    "stop triggered; executing"
                );
                self.execute().await;
                ControlFlow::Break(())
            }
        }
    }

    async fn execute(&mut self) {
        let gateway = &self.ctx.gateway;
        let security = self.machine.security.as_str();
        let quantity = self.machine.quantity;
        let outcome = run_activity("execute_order", &self.ctx.policy, |_| async move {
            gateway.execute(security, quantity).await
        })
        .await;

        match outcome {
            Ok(report) => {
                info!(
                    order_id = %self.machine.order_id,
                    execution_id = %report.execution_id,
                    "order executed"
                );
                self.settle(OrderStatus::Executed, MachineEvent::ExecutionSucceeded)
                    .await;
            }
            Err(e) => {
                error!(
                    order_id = %self.machine.order_id,
                    error = %e,
                    "execution gave up; marking order FAILED"
                );
                self.settle(OrderStatus::Failed, MachineEvent::ExecutionFailed)
                    .await;
            }
        }
    }

    async fn on_cancel(&mut self) -> ControlFlow<()> {
        match self.machine.on_cancel() {
            CancelDecision::Ignore => ControlFlow::Break(()),
            CancelDecision::PersistCancel => {
                self.settle(OrderStatus::Cancelled, MachineEvent::Cancelled)
                    .await;
                ControlFlow::Break(())
            }
        }
    }

    /// Persist `status` (from Pending) and move the machine accordingly.
    /// If storage already holds another terminal status, storage wins.
    async fn settle(&mut self, status: OrderStatus, event: MachineEvent) {
        match self.persist_terminal(status).await {
            Ok(()) => {
                self.apply(event);
                self.ctx
                    .publish(&self.machine.order_id, &self.machine.security, status);
            }
            Err(RepoError::NotPending { status: actual, .. }) => {
                if status == OrderStatus::Executed {
                    error!(
                        order_id = %self.machine.order_id,
                        persisted = %actual,
                        "executed after cancel; persisted status kept"
                    );
                } else {
                    info!(
                        order_id = %self.machine.order_id,
                        wanted = %status,
                        persisted = %actual,
                        "order already settled"
                    );
                }
                self.machine.observe(actual);
            }
            Err(e) => {
                error!(
                    order_id = %self.machine.order_id,
                    wanted = %status,
                    error = %e,
                    "terminal status could not be written"
                );
            }
        }
    }

    /// Conditional Pending -> `status` write. Storage failures are retried
    /// until the write lands; only a definite answer from storage ends the
    /// loop.
    async fn persist_terminal(&self, status: OrderStatus) -> Result<(), RepoError> {
        let repo = &self.ctx.repo;
        let id = self.machine.order_id.as_str();
        until_answered(&self.ctx, "update_order_status", id, |_| async move {
            repo.update_status(id, OrderStatus::Pending, status).await
        })
        .await
    }

    fn apply(&mut self, event: MachineEvent) {
        if let Err(e) = self.machine.apply(event) {
            error!(order_id = %self.machine.order_id, error = %e, "order state machine refused event");
        }
    }
}

impl EngineContext {
    pub(crate) fn publish(&self, order_id: &str, security: &str, status: OrderStatus) {
        // No subscribers is fine.
        let _ = self.updates.send(OrderUpdate {
            order_id: order_id.to_string(),
            security: security.to_string(),
            status,
            ts_utc: Utc::now(),
        });
    }
}
