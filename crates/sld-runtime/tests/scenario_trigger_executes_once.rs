//! A qualifying price executes a Pending order exactly once.

use std::sync::Arc;
use std::time::Duration;

use sld_db::{InMemoryOrderRepository, OrderRepository};
use sld_runtime::OrderService;
use sld_schemas::{ExecutionHandle, OrderStatus, PriceEvent};
use sld_testkit::{fast_policy, settle, stop_loss, wait_for_status, FlakyExecutionGateway};

fn px(security: &str, price: f64) -> PriceEvent {
    PriceEvent {
        security: security.to_string(),
        price,
    }
}

#[tokio::test]
async fn executes_only_after_price_crosses_trigger() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::reliable();
    let service = OrderService::new(repo.clone(), Arc::new(gateway.clone()), fast_policy());
    let dispatcher = service.dispatcher();

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(
        order.execution_handle,
        Some(ExecutionHandle::for_order(&order.id))
    );
    // Persisted with the handle before `place` returns.
    assert_eq!(repo.get(&order.id).await.unwrap(), order);

    let out = dispatcher.dispatch(&px("AAPL", 150.0)).await;
    assert_eq!(out.delivered, 1);
    settle().await;
    assert_eq!(repo.get(&order.id).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(gateway.calls(), 0);

    dispatcher.dispatch(&px("AAPL", 148.0)).await;
    wait_for_status(repo.as_ref(), &order.id, OrderStatus::Executed, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(gateway.executed(), vec![("AAPL".to_string(), 10)]);

    // Settled orders are no longer selected.
    let out = dispatcher.dispatch(&px("AAPL", 100.0)).await;
    assert_eq!(out.delivered, 0);
    settle().await;
    assert_eq!(gateway.calls(), 1);
    assert!(!service.engine().is_running(&ExecutionHandle::for_order(&order.id)).await);
}

#[tokio::test]
async fn prices_for_other_securities_never_reach_the_order() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let gateway = FlakyExecutionGateway::reliable();
    let service = OrderService::new(repo.clone(), Arc::new(gateway.clone()), fast_policy());
    let dispatcher = service.dispatcher();

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();

    let out = dispatcher.dispatch(&px("GOOG", 1.0)).await;
    assert_eq!(out.delivered, 0);

    // Delivered directly, a mismatched security is still ignored.
    service
        .engine()
        .signal(
            &ExecutionHandle::for_order(&order.id),
            sld_runtime::OrderSignal::Price(px("GOOG", 1.0)),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(repo.get(&order.id).await.unwrap().status, OrderStatus::Pending);
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn updates_bus_reports_each_persisted_transition() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let service = OrderService::new(
        repo.clone(),
        Arc::new(FlakyExecutionGateway::reliable()),
        fast_policy(),
    );
    let mut updates = service.subscribe();

    let order = service.place(stop_loss("AAPL", 149.0, 10)).await.unwrap();
    service.dispatcher().dispatch(&px("AAPL", 140.0)).await;
    wait_for_status(repo.as_ref(), &order.id, OrderStatus::Executed, Duration::from_secs(5))
        .await
        .unwrap();

    let first = updates.recv().await.unwrap();
    let second = updates.recv().await.unwrap();
    assert_eq!(first.status, OrderStatus::Pending);
    assert_eq!(second.status, OrderStatus::Executed);
    assert_eq!(second.order_id, order.id);
}

#[tokio::test]
async fn invalid_intake_is_rejected_before_anything_is_stored() {
    let repo = Arc::new(InMemoryOrderRepository::new());
    let service = OrderService::new(
        repo.clone(),
        Arc::new(FlakyExecutionGateway::reliable()),
        fast_policy(),
    );

    assert!(matches!(
        service.place(stop_loss("AAPL", -1.0, 10)).await,
        Err(sld_runtime::ServiceError::Validation(_))
    ));
    assert!(matches!(
        service.place(stop_loss("AAPL", 149.0, 0)).await,
        Err(sld_runtime::ServiceError::Validation(_))
    ));
    assert!(repo.list_all().await.unwrap().is_empty());
}
