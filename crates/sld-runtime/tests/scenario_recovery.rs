//! Restart: Pending orders in storage get their instances back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sld_db::{InMemoryOrderRepository, OrderRepository};
use sld_runtime::{OrderService, RecoveryReport};
use sld_schemas::{ExecutionHandle, NewOrder, Order, OrderStatus, PriceEvent};
use sld_testkit::{fast_policy, settle, wait_for_status, FlakyExecutionGateway};

fn stored(security: &str, trigger_price: f64) -> Order {
    NewOrder {
        security: security.into(),
        trigger_price,
        quantity: 5,
    }
    .into_order(Utc::now())
    .unwrap()
}

#[tokio::test]
async fn pending_orders_resume_and_settled_ones_stay_put() {
    let repo = Arc::new(InMemoryOrderRepository::new());

    // Left behind by a previous process.
    let with_handle = stored("AAPL", 149.0);
    repo.create(&with_handle).await.unwrap();
    repo.associate_handle(&with_handle.id, &ExecutionHandle::for_order(&with_handle.id))
        .await
        .unwrap();

    // Crashed between insert and handle assignment.
    let without_handle = stored("AAPL", 145.0);
    repo.create(&without_handle).await.unwrap();

    let done = stored("AAPL", 149.0);
    repo.create(&done).await.unwrap();
    repo.update_status(&done.id, OrderStatus::Pending, OrderStatus::Executed)
        .await
        .unwrap();

    let gateway = FlakyExecutionGateway::reliable();
    let service = OrderService::new(repo.clone(), Arc::new(gateway.clone()), fast_policy());

    let report = service.recover().await.unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            resumed: 2,
            already_running: 0,
            failed: 0
        }
    );
    assert_eq!(
        repo.get(&without_handle.id).await.unwrap().execution_handle,
        Some(ExecutionHandle::for_order(&without_handle.id))
    );
    assert_eq!(service.engine().running().await, 2);

    // Idempotent.
    let again = service.recover().await.unwrap();
    assert_eq!(again.already_running, 2);
    assert_eq!(again.resumed, 0);

    service
        .dispatcher()
        .dispatch(&PriceEvent {
            security: "AAPL".into(),
            price: 140.0,
        })
        .await;
    for id in [&with_handle.id, &without_handle.id] {
        wait_for_status(repo.as_ref(), id, OrderStatus::Executed, Duration::from_secs(5))
            .await
            .unwrap();
    }
    settle().await;
    assert_eq!(gateway.calls(), 2);
    assert_eq!(repo.get(&done.id).await.unwrap().status, OrderStatus::Executed);
}
