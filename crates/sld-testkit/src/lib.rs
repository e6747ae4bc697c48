//! sld-testkit
//!
//! Test doubles shared by the scenario tests:
//! - [`ScriptedPriceServer`]: a local websocket price feed that plays a
//!   script per connection and can push live prices.
//! - [`FlakyExecutionGateway`]: fails a configurable number of times, then
//!   fills; records every call.
//! - [`FaultyOrderRepository`]: wraps a repository and injects storage
//!   failures into selected operations.
//! - [`wait_for_status`]: polls a repository until an order settles.

use std::time::Duration;

use anyhow::{bail, Result};

use sld_db::OrderRepository;
use sld_execution::RetryPolicy;
use sld_schemas::{NewOrder, OrderStatus};

mod faulty_repo;
mod flaky_gateway;
mod price_server;

pub use faulty_repo::{FaultyOrderRepository, RepoOp};
pub use flaky_gateway::FlakyExecutionGateway;
pub use price_server::{price_frame, ScriptedPriceServer, Session};

/// Poll `repo` until order `id` reaches `want`, or fail after `within`.
pub async fn wait_for_status(
    repo: &dyn OrderRepository,
    id: &str,
    want: OrderStatus,
    within: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let current = repo.get(id).await.ok().map(|o| o.status);
        if current == Some(want) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("order {id} did not reach {want} within {within:?} (last seen {current:?})");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Retry policy with millisecond intervals, for tests on the real clock.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        backoff_coefficient: 2.0,
        max_interval: Duration::from_millis(5),
        max_attempts: 5,
        schedule_to_close: Duration::from_secs(5),
    }
}

pub fn stop_loss(security: &str, trigger_price: f64, quantity: i64) -> NewOrder {
    NewOrder {
        security: security.to_string(),
        trigger_price,
        quantity,
    }
}

/// Yield to the runtime long enough for spawned tasks to drain their inboxes.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
