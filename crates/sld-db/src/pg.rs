//! Postgres order repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use sld_schemas::{ExecutionHandle, Order, OrderStatus};

use crate::{check_transition, OrderRepository, RepoError};

const ORDER_COLUMNS: &str =
    "id, security, trigger_price, quantity, status, placed_at, execution_handle";

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain a conditional write that matched no row.
    async fn miss(&self, id: &str) -> RepoError {
        match self.get(id).await {
            Ok(order) => RepoError::NotPending {
                id: id.to_string(),
                status: order.status,
            },
            Err(e) => e,
        }
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, RepoError> {
    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status).map_err(|e| RepoError::Persistence(e.to_string()))?;
    let handle: Option<String> = row.try_get("execution_handle")?;
    let placed_at: DateTime<Utc> = row.try_get("placed_at")?;
    Ok(Order {
        id: row.try_get("id")?,
        security: row.try_get("security")?,
        trigger_price: row.try_get("trigger_price")?,
        quantity: row.try_get("quantity")?,
        status,
        placed_at,
        execution_handle: handle.map(ExecutionHandle::new),
    })
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        let res = sqlx::query(
            r#"
            insert into orders (
              id, security, trigger_price, quantity, status, placed_at, execution_handle
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.security)
        .bind(order.trigger_price)
        .bind(order.quantity)
        .bind(order.status.as_str())
        .bind(order.placed_at)
        .bind(order.execution_handle.as_ref().map(|h| h.as_str()))
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_constraint_violation(&e, "orders_pkey") => {
                Err(RepoError::AlreadyExists(order.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Order, RepoError> {
        let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(RepoError::NotFound(id.to_string())),
        }
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders order by placed_at desc, id asc"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_pending(&self) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from orders where status = 'PENDING' order by placed_at asc, id asc"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn pending_handles_for_security(
        &self,
        security: &str,
    ) -> Result<Vec<ExecutionHandle>, RepoError> {
        let handles: Vec<(String,)> = sqlx::query_as(
            r#"
            select execution_handle
            from orders
            where security = $1
              and status = 'PENDING'
              and execution_handle is not null
            order by execution_handle
            "#,
        )
        .bind(security)
        .fetch_all(&self.pool)
        .await?;
        Ok(handles.into_iter().map(|(h,)| ExecutionHandle::new(h)).collect())
    }

    async fn associate_handle(&self, id: &str, handle: &ExecutionHandle) -> Result<(), RepoError> {
        let res = sqlx::query(
            r#"
            update orders
            set execution_handle = $2
            where id = $1
              and execution_handle is null
            "#,
        )
        .bind(id)
        .bind(handle.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 1 {
            return Ok(());
        }
        let order = self.get(id).await?;
        match order.execution_handle {
            Some(existing) => Err(RepoError::HandleAlreadySet {
                id: id.to_string(),
                existing,
            }),
            // Row exists with no handle yet the guarded update missed it;
            // only a concurrent delete could cause this.
            None => Err(RepoError::Persistence(format!(
                "associate_handle matched no row for {id}"
            ))),
        }
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), RepoError> {
        check_transition(expected, new)?;
        let res = sqlx::query(
            r#"
            update orders
            set status = $3
            where id = $1
              and status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 1 {
            debug!(order_id = %id, from = %expected, to = %new, "order status written");
            return Ok(());
        }
        Err(self.miss(id).await)
    }
}
