//! Execution that never succeeds ends in a persisted FAILED status, and the
//! instance stops listening.

use std::sync::Arc;
use std::time::Duration;

use sld_db::{InMemoryOrderRepository, OrderRepository};
use sld_execution::RetryPolicy;
use sld_runtime::OrderService;
use sld_schemas::{ExecutionHandle, OrderStatus, PriceEvent};
use sld_testkit::{settle, stop_loss, wait_for_status, FlakyExecutionGateway};

fn aapl(price: f64) -> PriceEvent {
    PriceEvent {
        security: "AAPL".into(),
        price,
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_the_default_policy() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::always_failing();
    let service = OrderService::new(
        repo.clone(),
        Arc::new(gateway.clone()),
        RetryPolicy::default(),
    );
    let mut updates = service.subscribe();

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    let started = tokio::time::Instant::now();
    service.dispatcher().dispatch(&aapl(148.0)).await;

    wait_for_status(repo.as_ref(), &order.id, OrderStatus::Failed, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(gateway.calls(), 5);
    // 5 + 10 + 20 + 40 seconds between the five attempts.
    assert!(started.elapsed() >= Duration::from_secs(75));

    let statuses: Vec<OrderStatus> = std::iter::from_fn(|| updates.try_recv().ok())
        .map(|u| u.status)
        .collect();
    assert_eq!(statuses, vec![OrderStatus::Pending, OrderStatus::Failed]);

    // Failed is terminal: no further triggers, no cancel.
    settle().await;
    assert!(!service.engine().is_running(&ExecutionHandle::for_order(&order.id)).await);
    service.dispatcher().dispatch(&aapl(100.0)).await;
    settle().await;
    assert_eq!(gateway.calls(), 5);
    assert!(service.cancel(&order.id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn rejection_fails_the_order_without_retrying() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::rejecting();
    let service = OrderService::new(
        repo.clone(),
        Arc::new(gateway.clone()),
        RetryPolicy::default(),
    );

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    service.dispatcher().dispatch(&aapl(149.0)).await;

    wait_for_status(repo.as_ref(), &order.id, OrderStatus::Failed, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovering_gateway_executes_within_the_policy() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::failing(3);
    let service = OrderService::new(
        repo.clone(),
        Arc::new(gateway.clone()),
        RetryPolicy::default(),
    );

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    service.dispatcher().dispatch(&aapl(120.0)).await;

    wait_for_status(repo.as_ref(), &order.id, OrderStatus::Executed, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(gateway.calls(), 4);
    assert_eq!(gateway.executed().len(), 1);
}
