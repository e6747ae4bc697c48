//! A terminal status that cannot be written is retried until storage
//! accepts it; the order is never left orphaned as Pending.

use std::sync::Arc;
use std::time::Duration;

use sld_db::{InMemoryOrderRepository, OrderRepository};
use sld_execution::RetryPolicy;
use sld_runtime::OrderService;
use sld_schemas::{OrderStatus, PriceEvent};
use sld_testkit::{stop_loss, wait_for_status, FaultyOrderRepository, FlakyExecutionGateway, RepoOp};

#[tokio::test(start_paused = true)]
async fn executed_status_lands_once_storage_recovers() {
    let repo = FaultyOrderRepository::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::reliable();
    let service = OrderService::new(
        Arc::new(repo.clone()),
        Arc::new(gateway.clone()),
        RetryPolicy::default(),
    );

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    repo.fail(RepoOp::UpdateStatus);
    service
        .dispatcher()
        .dispatch(&PriceEvent {
            security: "AAPL".into(),
            price: 148.0,
        })
        .await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(repo.inner().get(&order.id).await.unwrap().status, OrderStatus::Pending);
    // Executed once; only the write is being retried.
    assert_eq!(gateway.calls(), 1);

    repo.heal(RepoOp::UpdateStatus);
    wait_for_status(repo.inner(), &order.id, OrderStatus::Executed, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn place_reports_storage_failure() {
    let repo = FaultyOrderRepository::new(InMemoryOrderRepository::new());
    repo.fail(RepoOp::Create);
    let service = OrderService::new(
        Arc::new(repo.clone()),
        Arc::new(FlakyExecutionGateway::reliable()),
        RetryPolicy::default(),
    );

    let err = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap_err();
    assert!(matches!(err, sld_runtime::ServiceError::Repository(_)));
    assert_eq!(service.engine().running().await, 0);
    assert!(repo.inner().list_all().await.unwrap().is_empty());
}
