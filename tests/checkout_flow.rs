//! Checkout, payment and administration against a real PostgreSQL.
//!
//! Set `TEST_DATABASE_URL` to run these; without it every test returns early.

mod common;

use std::sync::Arc;

use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;
use gym_orderservice::{
    error::OrderError,
    infra::app_error::AppError,
    schema::order_items,
    services::{
        gateway::SimulatedGateway,
        orders::{self, OrderFilter},
        payments::{self, ProcessOutcome},
    },
    status::{OrderStatus, PaymentMethod, PaymentState, PaymentStatus},
};

use common::{CountingGateway, price, product, reserve, stock_of, test_state, unique_user};

fn simulated() -> Arc<SimulatedGateway> {
    Arc::new(SimulatedGateway::default())
}

#[tokio::test]
async fn last_unit_goes_to_exactly_one_buyer() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "25.00", 1).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let product_id = p.id;
            tokio::spawn(async move { reserve(&state, unique_user(), &[(product_id, 1)]).await })
        })
        .collect();

    let mut won = 0;
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(AppError::Order(OrderError::InsufficientStock { product_id, .. })) => {
                assert_eq!(product_id, p.id);
                short += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((won, short), (1, 1));
    assert_eq!(stock_of(&state, p.id).await, 0);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "9.99", 5).await;

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let state = state.clone();
            let product_id = p.id;
            tokio::spawn(async move { reserve(&state, unique_user(), &[(product_id, 1)]).await })
        })
        .collect();

    let mut reserved = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 5);
    assert_eq!(stock_of(&state, p.id).await, 0);
}

#[tokio::test]
async fn order_is_priced_from_catalog_not_cart() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "1200", 10).await;

    let order = reserve(&state, unique_user(), &[(p.id, 3)]).await.unwrap();

    assert_eq!(order.order.total_amount, price("3600"));
    assert_eq!(order.items[0].unit_price, price("1200"));
    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
    assert_eq!(stock_of(&state, p.id).await, 7);
}

#[tokio::test]
async fn totals_reconcile_for_persisted_orders() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let a = product(&state, "19.99", 10).await;
    let b = product(&state, "5.50", 10).await;

    let created = reserve(&state, unique_user(), &[(a.id, 2), (b.id, 3)])
        .await
        .unwrap();

    let mut conn = state.db_pool.get().await.unwrap();
    let stored = orders::get_order_with_items(&mut conn, created.order.id)
        .await
        .unwrap();

    let sum = stored
        .items
        .iter()
        .fold(price("0"), |acc, item| acc + &item.total_price);
    assert_eq!(stored.order.total_amount, sum);
    for item in &stored.items {
        assert_eq!(
            item.total_price,
            &item.unit_price * bigdecimal::BigDecimal::from(item.quantity)
        );
    }
}

#[tokio::test]
async fn short_line_leaves_no_trace() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let plenty = product(&state, "10", 5).await;
    let scarce = product(&state, "10", 1).await;
    let user = unique_user();

    let err = reserve(&state, user, &[(plenty.id, 2), (scarce.id, 2)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::InsufficientStock { product_id, .. }) if product_id == scarce.id
    ));

    assert_eq!(stock_of(&state, plenty.id).await, 5);
    assert_eq!(stock_of(&state, scarce.id).await, 1);

    let mut conn = state.db_pool.get().await.unwrap();
    let filter = OrderFilter {
        user_id: Some(user),
        ..Default::default()
    };
    assert!(orders::list_orders(&mut conn, &filter).await.unwrap().is_empty());

    let items: i64 = order_items::table
        .filter(order_items::product_id.eq_any(vec![plenty.id, scarce.id]))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(items, 0);
}

#[tokio::test]
async fn repeated_processing_confirms_once() {
    let gateway = Arc::new(CountingGateway::default());
    let Some(state) = test_state(gateway.clone()).await else {
        return;
    };
    let p = product(&state, "40", 3).await;
    let order = reserve(&state, unique_user(), &[(p.id, 2)]).await.unwrap();

    let payment = {
        let mut conn = state.db_pool.get().await.unwrap();
        payments::initiate(
            &mut conn,
            order.order.id,
            order.order.total_amount.clone(),
            PaymentMethod::Card,
        )
        .await
        .unwrap()
    };

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let id = payment.id;
            tokio::spawn(async move {
                let mut conn = state.db_pool.get().await.unwrap();
                payments::process(&mut conn, state.gateway.clone(), id).await
            })
        })
        .collect();

    let mut completed = 0;
    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ProcessOutcome::Completed(_) => completed += 1,
            ProcessOutcome::Replayed(replay) => {
                assert_eq!(replay.status, PaymentState::Completed);
                replayed += 1;
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!((completed, replayed), (1, 1));

    let mut conn = state.db_pool.get().await.unwrap();
    let again = payments::process(&mut conn, state.gateway.clone(), payment.id)
        .await
        .unwrap();
    assert!(matches!(again, ProcessOutcome::Replayed(_)));
    assert_eq!(gateway.count(), 1);

    let stored = orders::get_order_with_items(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(stored.order.status, OrderStatus::Confirmed);
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);

    let attempts = payments::list_order_payments(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentState::Completed);
    assert!(attempts[0].transaction_id.is_some());
}

#[tokio::test]
async fn declined_payment_keeps_order_pending_and_allows_retry() {
    let gateway = Arc::new(CountingGateway::declining(vec![PaymentMethod::Card]));
    let Some(state) = test_state(gateway.clone()).await else {
        return;
    };
    let p = product(&state, "15", 4).await;
    let order = reserve(&state, unique_user(), &[(p.id, 1)]).await.unwrap();
    let total = order.order.total_amount.clone();
    let mut conn = state.db_pool.get().await.unwrap();

    let first = payments::initiate(&mut conn, order.order.id, total.clone(), PaymentMethod::Card)
        .await
        .unwrap();
    let outcome = payments::process(&mut conn, state.gateway.clone(), first.id)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed(_)));

    let stored = orders::get_order_with_items(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(stored.order.status, OrderStatus::Pending);
    assert_eq!(stored.order.payment_status, PaymentStatus::Failed);
    // Payment failure does not return stock.
    assert_eq!(stock_of(&state, p.id).await, 3);

    let retry = payments::initiate(
        &mut conn,
        order.order.id,
        total,
        PaymentMethod::QrPayment,
    )
    .await
    .unwrap();
    assert_ne!(retry.id, first.id);

    let outcome = payments::process(&mut conn, state.gateway.clone(), retry.id)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));

    let attempts = payments::list_order_payments(&mut conn, order.order.id)
        .await
        .unwrap();
    let states: Vec<_> = attempts.iter().map(|p| p.status).collect();
    assert_eq!(states, vec![PaymentState::Failed, PaymentState::Completed]);
    assert_eq!(gateway.count(), 2);
}

#[tokio::test]
async fn payment_must_match_order_total() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "30", 2).await;
    let order = reserve(&state, unique_user(), &[(p.id, 2)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    let err = payments::initiate(&mut conn, order.order.id, price("59.99"), PaymentMethod::Card)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::AmountMismatch { .. })
    ));
    assert!(
        payments::list_order_payments(&mut conn, order.order.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn only_one_active_payment_per_order() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "12", 2).await;
    let order = reserve(&state, unique_user(), &[(p.id, 1)]).await.unwrap();
    let total = order.order.total_amount.clone();
    let mut conn = state.db_pool.get().await.unwrap();

    payments::initiate(&mut conn, order.order.id, total.clone(), PaymentMethod::Card)
        .await
        .unwrap();
    let err = payments::initiate(&mut conn, order.order.id, total, PaymentMethod::Card)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Order(OrderError::PaymentAlreadyActive { .. })
    ));
}

#[tokio::test]
async fn pending_order_cannot_jump_to_delivered() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "8", 2).await;
    let order = reserve(&state, unique_user(), &[(p.id, 1)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    let err = orders::advance_status(&mut conn, order.order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::IllegalTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered
        })
    ));

    let err = orders::advance_status(&mut conn, order.order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::ConfirmationRequiresPayment)
    ));

    let stored = orders::get_order_with_items(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(stored.order.status, OrderStatus::Pending);
}

async fn paid_order(
    state: &gym_orderservice::infra::app_state::AppState,
    lines: &[(i32, i32)],
) -> i32 {
    let order = reserve(state, unique_user(), lines).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();
    let payment = payments::initiate(
        &mut conn,
        order.order.id,
        order.order.total_amount.clone(),
        PaymentMethod::Card,
    )
    .await
    .unwrap();
    payments::process(&mut conn, state.gateway.clone(), payment.id)
        .await
        .unwrap();
    order.order.id
}

#[tokio::test]
async fn cancelling_confirmed_order_restocks() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let a = product(&state, "20", 5).await;
    let b = product(&state, "35", 3).await;
    let order_id = paid_order(&state, &[(a.id, 2), (b.id, 1)]).await;
    assert_eq!(stock_of(&state, a.id).await, 3);
    assert_eq!(stock_of(&state, b.id).await, 2);

    let mut conn = state.db_pool.get().await.unwrap();
    let cancelled = orders::advance_status(&mut conn, order_id, OrderStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, a.id).await, 5);
    assert_eq!(stock_of(&state, b.id).await, 3);
}

#[tokio::test]
async fn full_lifecycle_then_terminal() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "99", 2).await;
    let order_id = paid_order(&state, &[(p.id, 1)]).await;
    let mut conn = state.db_pool.get().await.unwrap();

    orders::advance_status(&mut conn, order_id, OrderStatus::Shipped)
        .await
        .unwrap();
    let delivered = orders::advance_status(&mut conn, order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.order.status, OrderStatus::Delivered);

    let err = orders::advance_status(&mut conn, order_id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::IllegalTransition { .. })
    ));
    // Delivered goods are not restocked.
    assert_eq!(stock_of(&state, p.id).await, 1);
}

#[tokio::test]
async fn deleting_confirmed_order_restocks_then_removes() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let a = product(&state, "11", 6).await;
    let b = product(&state, "22", 4).await;
    let order_id = paid_order(&state, &[(a.id, 3), (b.id, 2)]).await;
    let mut conn = state.db_pool.get().await.unwrap();

    let deleted = orders::delete_order(&mut conn, order_id).await.unwrap();
    assert_eq!(deleted.status, OrderStatus::Confirmed);

    assert_eq!(stock_of(&state, a.id).await, 6);
    assert_eq!(stock_of(&state, b.id).await, 4);
    assert!(matches!(
        orders::get_order_with_items(&mut conn, order_id).await,
        Err(AppError::NotFound)
    ));

    let items: i64 = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(items, 0);
}

#[tokio::test]
async fn deleting_cancelled_order_does_not_restock_twice() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "5", 4).await;
    let order = reserve(&state, unique_user(), &[(p.id, 3)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    orders::advance_status(&mut conn, order.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(stock_of(&state, p.id).await, 4);

    orders::delete_order(&mut conn, order.order.id).await.unwrap();
    assert_eq!(stock_of(&state, p.id).await, 4);
}

#[tokio::test]
async fn customer_can_cancel_only_own_order() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "14", 2).await;
    let owner = unique_user();
    let order = reserve(&state, owner, &[(p.id, 2)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    let err = orders::cancel_own_order(&mut conn, order.order.id, owner + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    assert_eq!(stock_of(&state, p.id).await, 0);

    let cancelled = orders::cancel_own_order(&mut conn, order.order.id, owner)
        .await
        .unwrap();
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, p.id).await, 2);
}

#[tokio::test]
async fn customer_cannot_cancel_paid_order() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "14", 2).await;
    let owner = unique_user();
    let order = reserve(&state, owner, &[(p.id, 2)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    let payment = payments::initiate(
        &mut conn,
        order.order.id,
        order.order.total_amount.clone(),
        PaymentMethod::Card,
    )
    .await
    .unwrap();
    payments::process(&mut conn, state.gateway.clone(), payment.id)
        .await
        .unwrap();

    let err = orders::cancel_own_order(&mut conn, order.order.id, owner)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::IllegalTransition {
            from: OrderStatus::Confirmed,
            to: OrderStatus::Cancelled
        })
    ));

    let stored = orders::get_order_with_items(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(stored.order.status, OrderStatus::Confirmed);
    assert_eq!(stored.order.payment_status, PaymentStatus::Paid);
    assert_eq!(stock_of(&state, p.id).await, 0);
}

#[tokio::test]
async fn payment_for_cancelled_order_fails_without_charging() {
    let gateway = Arc::new(CountingGateway::default());
    let Some(state) = test_state(gateway.clone()).await else {
        return;
    };
    let p = product(&state, "60", 1).await;
    let order = reserve(&state, unique_user(), &[(p.id, 1)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();

    let payment = payments::initiate(
        &mut conn,
        order.order.id,
        order.order.total_amount.clone(),
        PaymentMethod::BankTransfer,
    )
    .await
    .unwrap();
    orders::advance_status(&mut conn, order.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();

    let outcome = payments::process(&mut conn, state.gateway.clone(), payment.id)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Failed(_)));
    assert_eq!(gateway.count(), 0);

    let stored = orders::get_order_with_items(&mut conn, order.order.id)
        .await
        .unwrap();
    assert_eq!(stored.order.status, OrderStatus::Cancelled);
}

async fn pending_payment(
    state: &gym_orderservice::infra::app_state::AppState,
    product_id: i32,
) -> (i32, uuid::Uuid) {
    let order = reserve(state, unique_user(), &[(product_id, 1)]).await.unwrap();
    let mut conn = state.db_pool.get().await.unwrap();
    let payment = payments::initiate(
        &mut conn,
        order.order.id,
        order.order.total_amount.clone(),
        PaymentMethod::Card,
    )
    .await
    .unwrap();
    (order.order.id, payment.id)
}

#[tokio::test]
async fn delete_racing_payment_processing_never_deadlocks() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "18", 10).await;

    for _ in 0..10 {
        let (order_id, payment_id) = pending_payment(&state, p.id).await;

        let deleter = {
            let state = state.clone();
            tokio::spawn(async move {
                let mut conn = state.db_pool.get().await.unwrap();
                orders::delete_order(&mut conn, order_id).await
            })
        };
        let processor = {
            let state = state.clone();
            tokio::spawn(async move {
                let mut conn = state.db_pool.get().await.unwrap();
                payments::process(&mut conn, state.gateway.clone(), payment_id).await
            })
        };

        let deleted = deleter.await.unwrap();
        let processed = processor.await.unwrap();
        assert!(deleted.is_ok(), "delete failed: {deleted:?}");
        assert!(processed.is_ok(), "process failed: {processed:?}");

        let mut conn = state.db_pool.get().await.unwrap();
        let payment = payments::get_payment(&mut conn, payment_id).await.unwrap();
        assert_eq!(payment.order_id, None);
        assert!(payment.status.is_terminal());
    }

    // Every deleted order held its unit, paid or not.
    assert_eq!(stock_of(&state, p.id).await, 10);
}

#[tokio::test]
async fn cancel_racing_payment_processing_never_deadlocks() {
    let Some(state) = test_state(simulated()).await else {
        return;
    };
    let p = product(&state, "18", 10).await;

    for _ in 0..10 {
        let (order_id, payment_id) = pending_payment(&state, p.id).await;

        let canceller = {
            let state = state.clone();
            tokio::spawn(async move {
                let mut conn = state.db_pool.get().await.unwrap();
                orders::advance_status(&mut conn, order_id, OrderStatus::Cancelled).await
            })
        };
        let processor = {
            let state = state.clone();
            tokio::spawn(async move {
                let mut conn = state.db_pool.get().await.unwrap();
                payments::process(&mut conn, state.gateway.clone(), payment_id).await
            })
        };

        let cancelled = canceller.await.unwrap();
        let processed = processor.await.unwrap();
        assert!(cancelled.is_ok(), "cancel failed: {cancelled:?}");
        assert!(processed.is_ok(), "process failed: {processed:?}");

        let mut conn = state.db_pool.get().await.unwrap();
        let stored = orders::get_order_with_items(&mut conn, order_id)
            .await
            .unwrap();
        assert_eq!(stored.order.status, OrderStatus::Cancelled);
    }

    assert_eq!(stock_of(&state, p.id).await, 10);
}
