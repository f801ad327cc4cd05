use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::PaymentEntity,
    services::payments::{self, ProcessOutcome},
    status::{PaymentMethod, PaymentState},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(initiate_payment))
            .routes(utoipa_axum::routes!(get_payment))
            .routes(utoipa_axum::routes!(process_payment)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct InitiatePaymentReq {
    pub order_id: i32,
    /// Must equal the order's total exactly.
    #[schema(value_type = String, example = "3600.00")]
    pub amount: BigDecimal,
    pub payment_method: PaymentMethod,
}

#[derive(Serialize, ToSchema)]
pub struct InitiatePaymentRes {
    pub payment_id: Uuid,
    pub payment: PaymentEntity,
}

/// Open a payment for an order's total.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Payments"],
    request_body = InitiatePaymentReq,
    responses(
        (status = 200, description = "Created payment successfully", body = StdResponse<InitiatePaymentRes, String>),
        (status = 400, description = "Amount does not match the order total"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is not payable or already has an active payment")
    )
)]
async fn initiate_payment(
    State(state): State<AppState>,
    Json(body): Json<InitiatePaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment = payments::initiate(conn, body.order_id, body.amount, body.payment_method).await?;

    Ok(StdResponse {
        data: Some(InitiatePaymentRes {
            payment_id: payment.id,
            payment,
        }),
        message: Some("Created payment successfully"),
    })
}

/// Fetch a payment.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Payments"],
    params(
        ("id" = Uuid, Path, description = "Payment ID to fetch")
    ),
    responses(
        (status = 200, description = "Get payment successfully", body = StdResponse<PaymentEntity, String>),
        (status = 404, description = "Payment not found")
    )
)]
async fn get_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment = payments::get_payment(conn, id).await?;

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Get payment successfully"),
    })
}

/// Charge a pending payment. Repeat calls return the settled payment without
/// charging again.
#[utoipa::path(
    post,
    path = "/{id}/process",
    tags = ["Payments"],
    params(
        ("id" = Uuid, Path, description = "Payment ID to process")
    ),
    responses(
        (status = 200, description = "Payment settled, check `status`", body = StdResponse<PaymentEntity, String>),
        (status = 404, description = "Payment not found")
    )
)]
async fn process_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let outcome = payments::process(conn, state.gateway.clone(), id).await?;
    let message = outcome_message(&outcome);

    Ok(StdResponse {
        data: Some(outcome.into_payment()),
        message: Some(message),
    })
}

fn outcome_message(outcome: &ProcessOutcome) -> &'static str {
    match outcome.payment().status {
        PaymentState::Completed => "Payment paid successfully",
        PaymentState::Failed => "Payment failed, please try again",
        PaymentState::Pending => "Payment is still pending",
    }
}
