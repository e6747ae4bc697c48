use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sld_db::{OrderRepository, RepoError};
use sld_schemas::{ExecutionHandle, Order, OrderStatus};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    Create,
    Get,
    PendingHandles,
    AssociateHandle,
    UpdateStatus,
}

/// Delegates to `inner` unless the operation has been switched to fail, in
/// which case it returns `RepoError::Persistence`.
#[derive(Clone)]
pub struct FaultyOrderRepository<R> {
    inner: R,
    failing: Arc<Mutex<HashSet<RepoOp>>>,
}

impl<R> FaultyOrderRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            failing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn fail(&self, op: RepoOp) {
        if let Ok(mut set) = self.failing.lock() {
            set.insert(op);
        }
    }

    pub fn heal(&self, op: RepoOp) {
        if let Ok(mut set) = self.failing.lock() {
            set.remove(&op);
        }
    }

    fn check(&self, op: RepoOp) -> Result<(), RepoError> {
        let failing = self.failing.lock().map(|s| s.contains(&op)).unwrap_or(false);
        if failing {
            return Err(RepoError::Persistence(format!("injected failure: {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: OrderRepository> OrderRepository for FaultyOrderRepository<R> {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        self.check(RepoOp::Create)?;
        self.inner.create(order).await
    }

    async fn get(&self, id: &str) -> Result<Order, RepoError> {
        self.check(RepoOp::Get)?;
        self.inner.get(id).await
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepoError> {
        self.inner.list_all().await
    }

    async fn list_pending(&self) -> Result<Vec<Order>, RepoError> {
        self.inner.list_pending().await
    }

    async fn pending_handles_for_security(
        &self,
        security: &str,
    ) -> Result<Vec<ExecutionHandle>, RepoError> {
        self.check(RepoOp::PendingHandles)?;
        self.inner.pending_handles_for_security(security).await
    }

    async fn associate_handle(&self, id: &str, handle: &ExecutionHandle) -> Result<(), RepoError> {
        self.check(RepoOp::AssociateHandle)?;
        self.inner.associate_handle(id, handle).await
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), RepoError> {
        self.check(RepoOp::UpdateStatus)?;
        self.inner.update_status(id, expected, new).await
    }
}
