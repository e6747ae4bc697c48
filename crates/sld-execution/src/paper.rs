//! Paper execution: waits out a simulated venue latency, then fills.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{ExecutionError, ExecutionGateway, ExecutionReport};

#[derive(Debug, Clone)]
pub struct PaperExecutionGateway {
    latency: Duration,
}

impl PaperExecutionGateway {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for PaperExecutionGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ExecutionGateway for PaperExecutionGateway {
    async fn execute(
        &self,
        security: &str,
        quantity: i64,
    ) -> Result<ExecutionReport, ExecutionError> {
        if quantity <= 0 {
            return Err(ExecutionError::Rejected(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        tokio::time::sleep(self.latency).await;

        let report = ExecutionReport {
            execution_id: format!("paper-{}", Uuid::new_v4()),
            security: security.to_string(),
            quantity,
            executed_at: Utc::now(),
        };
        info!(
            security,
            quantity,
            execution_id = %report.execution_id,
            "paper execution filled"
        );
        Ok(report)
    }
}
