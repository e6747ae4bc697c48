//! sld-db
//!
//! Order repository: the source of truth for order status.
//!
//! Every status change is a single conditional write keyed on the expected
//! prior status. When the write matches no row the repository re-reads the
//! order to tell `NotFound` apart from `NotPending`. Callers must never
//! read-then-write to change status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use sld_schemas::{ExecutionHandle, Order, OrderStatus, Retryable};

pub mod memory;
pub mod pg;

pub use memory::InMemoryOrderRepository;
pub use pg::PgOrderRepository;

pub const ENV_DB_URL: &str = "SLD_DATABASE_URL";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepoError {
    #[error("order not found: {0}")]
    NotFound(String),

    /// The order exists but its status is no longer the expected one.
    #[error("order {id} is not pending (status {status})")]
    NotPending { id: String, status: OrderStatus },

    #[error("order {id} already has execution handle {existing}")]
    HandleAlreadySet {
        id: String,
        existing: ExecutionHandle,
    },

    #[error("order already exists: {0}")]
    AlreadyExists(String),

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl Retryable for RepoError {
    /// Only storage failures are worth another attempt; every other variant
    /// describes the row's actual state and will not change on retry.
    fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Persistence(_))
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        RepoError::Persistence(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Repository contract
// ---------------------------------------------------------------------------

/// Durable order store.
///
/// All operations are atomic with respect to a single order row.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order. Fails with `AlreadyExists` on a duplicate id.
    async fn create(&self, order: &Order) -> Result<(), RepoError>;

    async fn get(&self, id: &str) -> Result<Order, RepoError>;

    /// Every order, newest `placed_at` first.
    async fn list_all(&self) -> Result<Vec<Order>, RepoError>;

    /// Pending orders, oldest first.
    async fn list_pending(&self) -> Result<Vec<Order>, RepoError>;

    /// Handles of orders with this security that are Pending at query time
    /// and have a handle recorded.
    async fn pending_handles_for_security(
        &self,
        security: &str,
    ) -> Result<Vec<ExecutionHandle>, RepoError>;

    /// Record the live instance handle. Write-once: fails with
    /// `HandleAlreadySet` when a handle is already present.
    async fn associate_handle(&self, id: &str, handle: &ExecutionHandle) -> Result<(), RepoError>;

    /// Pending -> Cancelled.
    async fn cancel(&self, id: &str) -> Result<(), RepoError> {
        self.update_status(id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
    }

    /// Conditional status write: succeeds only if the current status equals
    /// `expected`.
    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), RepoError>;
}

/// Reject transitions that leave a terminal status or go nowhere.
pub(crate) fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<(), RepoError> {
    if from.is_terminal() || from == to {
        return Err(RepoError::InvalidTransition { from, to });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pool plumbing
// ---------------------------------------------------------------------------

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect to Postgres using SLD_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
    pub pending_orders: i64,
}

/// Connectivity, schema presence and the live order count.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let pending_orders = if exists {
        let (n,): (i64,) =
            sqlx::query_as::<_, (i64,)>("select count(*)::bigint from orders where status = 'PENDING'")
                .fetch_one(pool)
                .await
                .context("status pending count failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
        pending_orders,
    })
}
