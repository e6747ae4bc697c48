//! Storage failures around intake and cancel never leave an order Pending
//! without a listening instance, and a committed cancel is reported once.

use std::sync::Arc;
use std::time::Duration;

use sld_db::{InMemoryOrderRepository, OrderRepository};
use sld_runtime::{OrderService, ServiceError};
use sld_schemas::{ExecutionHandle, OrderStatus, PriceEvent};
use sld_testkit::{
    fast_policy, settle, stop_loss, wait_for_status, FaultyOrderRepository,
    FlakyExecutionGateway, RepoOp,
};

fn service_over(
    repo: &FaultyOrderRepository<InMemoryOrderRepository>,
    gateway: &FlakyExecutionGateway,
) -> OrderService {
    OrderService::new(Arc::new(repo.clone()), Arc::new(gateway.clone()), fast_policy())
}

#[tokio::test]
async fn handle_write_outage_keeps_the_new_order_owned_until_it_lands() {
    let repo = FaultyOrderRepository::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::reliable();
    let service = service_over(&repo, &gateway);
    repo.fail(RepoOp::AssociateHandle);

    let placing = tokio::spawn({
        let service = service.clone();
        async move { service.place(stop_loss("AAPL", 149.0, 10)).await }
    });

    // Several retry rounds pass; the row exists and an instance still owns it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!placing.is_finished());
    let rows = repo.inner().list_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OrderStatus::Pending);
    assert!(rows[0].execution_handle.is_none());
    assert_eq!(service.engine().running().await, 1);

    // Recovery does not start a second instance for it.
    let report = service.recover().await.unwrap();
    assert_eq!(report.resumed, 0);
    assert_eq!(report.already_running, 1);

    repo.heal(RepoOp::AssociateHandle);
    let order = placing.await.unwrap().unwrap();
    assert_eq!(
        order.execution_handle,
        Some(ExecutionHandle::for_order(&order.id))
    );

    let out = service
        .dispatcher()
        .dispatch(&PriceEvent {
            security: "AAPL".into(),
            price: 100.0,
        })
        .await;
    assert_eq!(out.delivered, 1);
    wait_for_status(repo.inner(), &order.id, OrderStatus::Executed, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(gateway.executed(), vec![("AAPL".to_string(), 10)]);
}

#[tokio::test]
async fn cancel_is_reported_as_success_exactly_once_around_read_failures() {
    let repo = FaultyOrderRepository::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::reliable();
    let service = service_over(&repo, &gateway);
    let mut updates = service.subscribe();

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Pending);

    // A failed cancel leaves nothing committed.
    repo.fail(RepoOp::Get);
    let err = service.cancel(&order.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Repository(_)), "got {err:?}");
    assert_eq!(repo.inner().get(&order.id).await.unwrap().status, OrderStatus::Pending);

    repo.heal(RepoOp::Get);
    let cancelled = service.cancel(&order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.id, order.id);
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Cancelled);

    match service.cancel(&order.id).await {
        Err(ServiceError::NotPending { status, .. }) => assert_eq!(status, OrderStatus::Cancelled),
        other => panic!("expected NotPending, got {other:?}"),
    }

    settle().await;
    assert!(updates.try_recv().is_err());
    assert_eq!(repo.inner().get(&order.id).await.unwrap().status, OrderStatus::Cancelled);

    // The instance saw the cancel and stopped.
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.engine().running().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
