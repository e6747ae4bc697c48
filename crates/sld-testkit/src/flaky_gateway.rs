use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use sld_execution::{ExecutionError, ExecutionGateway, ExecutionReport};

/// Execution double: the first `failures` calls fail with the configured
/// error, later calls fill after `latency`.
#[derive(Clone)]
pub struct FlakyExecutionGateway {
    failures: u32,
    error: ExecutionError,
    latency: Duration,
    calls: Arc<AtomicU32>,
    executed: Arc<Mutex<Vec<(String, i64)>>>,
}

impl FlakyExecutionGateway {
    /// Always fills, immediately.
    pub fn reliable() -> Self {
        Self::failing(0)
    }

    /// Fails transiently `failures` times, then fills.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            error: ExecutionError::Transient("venue unavailable".to_string()),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never fills.
    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    /// Rejects every call (non-retryable).
    pub fn rejecting() -> Self {
        Self {
            error: ExecutionError::Rejected("order refused".to_string()),
            ..Self::failing(u32::MAX)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `execute` calls so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful executions, in order.
    pub fn executed(&self) -> Vec<(String, i64)> {
        self.executed
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionGateway for FlakyExecutionGateway {
    async fn execute(
        &self,
        security: &str,
        quantity: i64,
    ) -> Result<ExecutionReport, ExecutionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if n < self.failures {
            return Err(self.error.clone());
        }
        if let Ok(mut v) = self.executed.lock() {
            v.push((security.to_string(), quantity));
        }
        Ok(ExecutionReport {
            execution_id: format!("flaky-{n}"),
            security: security.to_string(),
            quantity,
            executed_at: Utc::now(),
        })
    }
}
