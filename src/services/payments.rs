//! Payment processor.
//!
//! The payment id doubles as the idempotency key: `process` locks the
//! payment row, and once the row is terminal every further call returns it
//! untouched.
//!
//! Locks are always taken order first, then payment, matching `initiate`
//! and the `ON DELETE SET NULL` cascade of an order deletion.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::OrderError,
    infra::app_error::AppError,
    models::{CreatePaymentEntity, OrderEntity, PaymentEntity},
    schema::{orders, payments},
    services::{
        gateway::{ChargeOutcome, ChargeRequest, PaymentGateway},
        orders::{confirm_paid, lock_order},
    },
    status::{OrderStatus, PaymentMethod, PaymentState, PaymentStatus},
};

/// What a `process` call did.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(PaymentEntity),
    Failed(PaymentEntity),
    /// Already terminal before this call; nothing was changed.
    Replayed(PaymentEntity),
}

impl ProcessOutcome {
    pub fn payment(&self) -> &PaymentEntity {
        match self {
            ProcessOutcome::Completed(p)
            | ProcessOutcome::Failed(p)
            | ProcessOutcome::Replayed(p) => p,
        }
    }

    pub fn into_payment(self) -> PaymentEntity {
        match self {
            ProcessOutcome::Completed(p)
            | ProcessOutcome::Failed(p)
            | ProcessOutcome::Replayed(p) => p,
        }
    }
}

/// Opens a PENDING payment for the order's exact total.
///
/// A retry after a failed attempt creates a new payment row and moves the
/// order's payment status back to PENDING.
pub async fn initiate(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    amount: BigDecimal,
    method: PaymentMethod,
) -> Result<PaymentEntity, AppError> {
    let payment = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order = lock_order(conn, order_id).await?;

                if order.status != OrderStatus::Pending
                    || order.payment_status == PaymentStatus::Paid
                {
                    return Err(OrderError::OrderNotPayable {
                        order_id,
                        status: order.status,
                    }
                    .into());
                }

                if amount != order.total_amount {
                    return Err(OrderError::AmountMismatch {
                        expected: order.total_amount,
                        actual: amount,
                    }
                    .into());
                }

                let active: i64 = payments::table
                    .filter(payments::order_id.eq(order_id))
                    .filter(payments::status.ne(PaymentState::Failed))
                    .count()
                    .get_result(conn)
                    .await?;
                if active > 0 {
                    return Err(OrderError::PaymentAlreadyActive { order_id }.into());
                }

                let payment: PaymentEntity = diesel::insert_into(payments::table)
                    .values(CreatePaymentEntity {
                        order_id,
                        amount,
                        status: PaymentState::Pending,
                        method,
                    })
                    .returning(PaymentEntity::as_returning())
                    .get_result(conn)
                    .await?;

                diesel::update(orders::table.find(order_id))
                    .set((
                        orders::payment_status.eq(PaymentStatus::Pending),
                        orders::payment_method.eq(method),
                        orders::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await?;

                Ok::<PaymentEntity, AppError>(payment)
            })
        })
        .await?;

    info!(
        "Payment {} initiated for order #{}: {} via {}",
        payment.id, order_id, payment.amount, payment.method
    );

    Ok(payment)
}

/// Charges a PENDING payment once. Safe to call repeatedly and concurrently
/// for the same id: callers queue on the order and payment row locks and all
/// but the first see a terminal payment.
pub async fn process(
    conn: &mut AsyncPgConnection,
    gateway: Arc<dyn PaymentGateway>,
    payment_id: Uuid,
) -> Result<ProcessOutcome, AppError> {
    let outcome = conn
        .transaction(move |conn| {
            Box::pin(async move {
                // Same lock order as every other writer: order row first,
                // then the payment row.
                let order_id: Option<i32> = payments::table
                    .find(payment_id)
                    .select(payments::order_id)
                    .get_result(conn)
                    .await?;

                let order = match order_id {
                    Some(order_id) => match lock_order(conn, order_id).await {
                        Ok(order) => Some(order),
                        Err(AppError::NotFound) => None,
                        Err(err) => return Err(err),
                    },
                    None => None,
                };

                let payment: PaymentEntity = payments::table
                    .find(payment_id)
                    .select(PaymentEntity::as_select())
                    .for_update()
                    .get_result(conn)
                    .await?;

                if payment.status.is_terminal() {
                    return Ok(ProcessOutcome::Replayed(payment));
                }

                let Some(order) = order.filter(|o| o.status == OrderStatus::Pending) else {
                    let failed = finish(
                        conn,
                        payment.id,
                        PaymentState::Failed,
                        None,
                        Some("Order is no longer awaiting payment".into()),
                    )
                    .await?;
                    return Ok(ProcessOutcome::Failed(failed));
                };

                let request = ChargeRequest {
                    payment_id: payment.id,
                    order_id: order.id,
                    amount: payment.amount.clone(),
                    method: payment.method,
                };

                match gateway.charge(&request).await {
                    ChargeOutcome::Approved { transaction_id } => {
                        let completed = finish(
                            conn,
                            payment.id,
                            PaymentState::Completed,
                            Some(transaction_id),
                            None,
                        )
                        .await?;
                        confirm_paid(conn, &order).await?;
                        Ok(ProcessOutcome::Completed(completed))
                    }
                    ChargeOutcome::Declined { reason } => {
                        let failed =
                            finish(conn, payment.id, PaymentState::Failed, None, Some(reason))
                                .await?;
                        mark_order_payment_failed(conn, &order).await?;
                        Ok::<ProcessOutcome, AppError>(ProcessOutcome::Failed(failed))
                    }
                }
            })
        })
        .await?;

    match &outcome {
        ProcessOutcome::Completed(p) => {
            info!("Payment {} completed ({:?})", p.id, p.transaction_id)
        }
        ProcessOutcome::Failed(p) => {
            warn!(
                "Payment {} failed: {}",
                p.id,
                p.failure_reason.as_deref().unwrap_or("unknown reason")
            )
        }
        ProcessOutcome::Replayed(p) => {
            info!("Payment {} already {}, returning as is", p.id, p.status)
        }
    }

    Ok(outcome)
}

async fn finish(
    conn: &mut AsyncPgConnection,
    payment_id: Uuid,
    status: PaymentState,
    transaction_id: Option<String>,
    failure_reason: Option<String>,
) -> Result<PaymentEntity, AppError> {
    let payment = diesel::update(
        payments::table
            .find(payment_id)
            .filter(payments::status.eq(PaymentState::Pending)),
    )
    .set((
        payments::status.eq(status),
        payments::transaction_id.eq(transaction_id),
        payments::failure_reason.eq(failure_reason),
        payments::processed_at.eq(diesel::dsl::now),
        payments::updated_at.eq(diesel::dsl::now),
    ))
    .returning(PaymentEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(payment)
}

async fn mark_order_payment_failed(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
) -> Result<(), AppError> {
    diesel::update(orders::table.find(order.id))
        .set((
            orders::payment_status.eq(PaymentStatus::Failed),
            orders::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn get_payment(
    conn: &mut AsyncPgConnection,
    payment_id: Uuid,
) -> Result<PaymentEntity, AppError> {
    let payment = payments::table
        .find(payment_id)
        .select(PaymentEntity::as_select())
        .get_result(conn)
        .await
        .optional()?;

    payment.ok_or(AppError::NotFound)
}

/// Every attempt for the order, oldest first.
pub async fn list_order_payments(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<Vec<PaymentEntity>, AppError> {
    let payments = payments::table
        .filter(payments::order_id.eq(order_id))
        .order_by(payments::created_at.asc())
        .select(PaymentEntity::as_select())
        .get_results(conn)
        .await?;

    Ok(payments)
}
