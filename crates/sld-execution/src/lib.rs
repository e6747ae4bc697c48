//! sld-execution
//!
//! The execution side-effect and the retry driver that wraps it.
//!
//! - [`ExecutionGateway`] performs one trade attempt. It is stateless per
//!   call and knows nothing about retries.
//! - [`run_activity`] drives any fallible async step (execution or a
//!   repository write) under a [`RetryPolicy`]: exponential intervals,
//!   bounded attempts and an overall schedule-to-close deadline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sld_schemas::Retryable;

pub mod paper;
pub mod retry;

pub use paper::PaperExecutionGateway;
pub use retry::{run_activity, ActivityError, RetryPolicy};

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Venue-side identifier of the execution.
    pub execution_id: String,
    pub security: String,
    pub quantity: i64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The venue could not be reached or answered with a temporary failure.
    #[error("transient execution failure: {0}")]
    Transient(String),

    /// The venue refused the order. Retrying will not help.
    #[error("execution rejected: {0}")]
    Rejected(String),
}

impl Retryable for ExecutionError {
    fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}

/// Performs the external trade effect for a triggered order.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn execute(&self, security: &str, quantity: i64)
        -> Result<ExecutionReport, ExecutionError>;
}
