//! Order store and the status machine's write path.

use std::collections::HashMap;

use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::OrderError,
    infra::app_error::AppError,
    models::{OrderEntity, OrderItemEntity},
    schema::{order_items, orders},
    services::catalog,
    status::{OrderStatus, PaymentStatus},
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OrderWithItems {
    pub order: OrderEntity,
    pub items: Vec<OrderItemEntity>,
}

#[derive(Deserialize, Debug, Default, Clone, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub user_id: Option<i32>,
    /// Page size, at most 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderFilter {
    pub fn page(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

pub async fn get_order_with_items(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<OrderWithItems, AppError> {
    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .get_result(conn)
        .await?;
    let items = load_items(conn, order.id).await?;

    Ok(OrderWithItems { order, items })
}

pub async fn list_orders(
    conn: &mut AsyncPgConnection,
    filter: &OrderFilter,
) -> Result<Vec<OrderWithItems>, AppError> {
    let (limit, offset) = filter.page();

    let mut query = orders::table
        .select(OrderEntity::as_select())
        .order_by((orders::created_at.desc(), orders::id.desc()))
        .limit(limit)
        .offset(offset)
        .into_boxed();

    if let Some(status) = filter.status {
        query = query.filter(orders::status.eq(status));
    }
    if let Some(payment_status) = filter.payment_status {
        query = query.filter(orders::payment_status.eq(payment_status));
    }
    if let Some(user_id) = filter.user_id {
        query = query.filter(orders::user_id.eq(user_id));
    }

    let orders: Vec<OrderEntity> = query.get_results(conn).await?;
    attach_items(conn, orders).await
}

async fn attach_items(
    conn: &mut AsyncPgConnection,
    orders: Vec<OrderEntity>,
) -> Result<Vec<OrderWithItems>, AppError> {
    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .order_by(order_items::id.asc())
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await?;

    let mut group: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = group.remove(&order.id).unwrap_or_default();
            OrderWithItems { order, items }
        })
        .collect())
}

pub async fn load_items(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<Vec<OrderItemEntity>, AppError> {
    let items = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .order_by(order_items::id.asc())
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await?;

    Ok(items)
}

/// `SELECT ... FOR UPDATE` on one order. Serializes concurrent admin edits,
/// cancellations and payment confirmation of the same order.
pub async fn lock_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<OrderEntity, AppError> {
    let order = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .for_update()
        .get_result(conn)
        .await?;

    Ok(order)
}

/// Moves a locked order to `next`, restocking when the move is a
/// cancellation. The caller has already validated the transition.
async fn apply_transition(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
    next: OrderStatus,
) -> Result<OrderWithItems, AppError> {
    let items = load_items(conn, order.id).await?;

    if next == OrderStatus::Cancelled && order.status.holds_reserved_stock() {
        catalog::restock_items(conn, &items).await?;
    }

    let updated: OrderEntity = diesel::update(orders::table.find(order.id))
        .set((
            orders::status.eq(next),
            orders::updated_at.eq(diesel::dsl::now),
        ))
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(
        "Order #{} moved from {} to {}",
        order.id, order.status, updated.status
    );

    Ok(OrderWithItems {
        order: updated,
        items,
    })
}

/// Administrative status change.
///
/// `CONFIRMED` is reserved for the payment processor: an operator cannot
/// confirm an order that has not been paid.
pub async fn advance_status(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    target: OrderStatus,
) -> Result<OrderWithItems, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            let next = order.status.transition_to(target)?;

            if next == OrderStatus::Confirmed && order.payment_status != PaymentStatus::Paid {
                return Err(OrderError::ConfirmationRequiresPayment.into());
            }

            apply_transition(conn, &order, next).await
        })
    })
    .await
}

/// Cancellation requested by the customer who placed the order. Only a
/// PENDING order can be withdrawn this way.
pub async fn cancel_own_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    user_id: i32,
) -> Result<OrderWithItems, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            if order.user_id != user_id {
                return Err(AppError::NotFound);
            }

            // Customers may only withdraw an unpaid order.
            if order.status != OrderStatus::Pending {
                return Err(OrderError::IllegalTransition {
                    from: order.status,
                    to: OrderStatus::Cancelled,
                }
                .into());
            }

            apply_transition(conn, &order, OrderStatus::Cancelled).await
        })
    })
    .await
}

/// Confirms a locked PENDING order after its payment completed.
pub(crate) async fn confirm_paid(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
) -> Result<OrderEntity, AppError> {
    let next = order.status.transition_to(OrderStatus::Confirmed)?;

    let updated: OrderEntity = diesel::update(orders::table.find(order.id))
        .set((
            orders::status.eq(next),
            orders::payment_status.eq(PaymentStatus::Paid),
            orders::updated_at.eq(diesel::dsl::now),
        ))
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await?;

    info!("Order #{} paid and confirmed", updated.id);
    Ok(updated)
}

/// Restocks whatever the order still holds, then removes it. Items go with
/// it through `ON DELETE CASCADE`; payments keep their row with the order
/// reference cleared.
pub async fn delete_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<OrderEntity, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;

            if order.status.holds_reserved_stock() {
                let items = load_items(conn, order.id).await?;
                catalog::restock_items(conn, &items).await?;
            }

            diesel::delete(orders::table.find(order.id))
                .execute(conn)
                .await?;

            info!("Order #{} ({}) deleted", order.id, order.status);
            Ok::<OrderEntity, AppError>(order)
        })
    })
    .await
}
