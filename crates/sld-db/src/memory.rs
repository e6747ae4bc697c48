//! In-memory order repository.
//!
//! Used when no database URL is configured and by the scenario tests. The
//! single write lock makes each operation atomic, matching the per-row
//! guarantees of the Postgres implementation.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sld_schemas::{ExecutionHandle, Order, OrderStatus};

use crate::{check_transition, OrderRepository, RepoError};

type OrderMap = HashMap<String, Order>;

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<OrderMap>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepoError::AlreadyExists(order.id.clone()));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Order, RepoError> {
        let orders = self.orders.read().await;
        orders
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepoError> {
        let orders = self.orders.read().await;
        let mut out: Vec<Order> = orders.values().cloned().collect();
        out.sort_by_key(|o| (Reverse(o.placed_at), o.id.clone()));
        Ok(out)
    }

    async fn list_pending(&self) -> Result<Vec<Order>, RepoError> {
        let orders = self.orders.read().await;
        let mut out: Vec<Order> = orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.placed_at, o.id.clone()));
        Ok(out)
    }

    async fn pending_handles_for_security(
        &self,
        security: &str,
    ) -> Result<Vec<ExecutionHandle>, RepoError> {
        let orders = self.orders.read().await;
        let mut out: Vec<ExecutionHandle> = orders
            .values()
            .filter(|o| o.security == security && o.status == OrderStatus::Pending)
            .filter_map(|o| o.execution_handle.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    async fn associate_handle(&self, id: &str, handle: &ExecutionHandle) -> Result<(), RepoError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        if let Some(existing) = &order.execution_handle {
            return Err(RepoError::HandleAlreadySet {
                id: id.to_string(),
                existing: existing.clone(),
            });
        }
        order.execution_handle = Some(handle.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), RepoError> {
        check_transition(expected, new)?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        if order.status != expected {
            return Err(RepoError::NotPending {
                id: id.to_string(),
                status: order.status,
            });
        }
        order.status = new;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn order(id: &str, security: &str, minutes_ago: i64) -> Order {
        Order {
            id: id.to_string(),
            security: security.to_string(),
            trigger_price: 100.0,
            quantity: 1,
            status: OrderStatus::Pending,
            placed_at: Utc::now() - Duration::minutes(minutes_ago),
            execution_handle: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let repo = InMemoryOrderRepository::new();
        repo.create(&order("a", "AAPL", 0)).await.unwrap();
        assert_eq!(
            repo.create(&order("a", "AAPL", 0)).await,
            Err(RepoError::AlreadyExists("a".into()))
        );
    }

    #[tokio::test]
    async fn list_all_is_newest_first() {
        let repo = InMemoryOrderRepository::new();
        repo.create(&order("old", "AAPL", 10)).await.unwrap();
        repo.create(&order("new", "AAPL", 1)).await.unwrap();
        let ids: Vec<String> = repo.list_all().await.unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn orders_without_handle_are_not_addressable() {
        let repo = InMemoryOrderRepository::new();
        repo.create(&order("a", "AAPL", 0)).await.unwrap();
        assert!(repo.pending_handles_for_security("AAPL").await.unwrap().is_empty());

        let h = ExecutionHandle::for_order("a");
        repo.associate_handle("a", &h).await.unwrap();
        assert_eq!(repo.pending_handles_for_security("AAPL").await.unwrap(), vec![h]);
        assert!(repo.pending_handles_for_security("GOOG").await.unwrap().is_empty());
    }
}
