use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::PaymentEntity,
    services::{
        orders::{self, OrderFilter, OrderWithItems},
        payments,
        reservation::{self, CheckoutRequest},
    },
};

/// Storefront order routes: checkout, order lookup, self-service cancel.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/orders",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(create_order))
                .routes(utoipa_axum::routes!(get_order))
                .routes(utoipa_axum::routes!(cancel_order))
                .routes(utoipa_axum::routes!(get_order_payments)),
        )
        .routes(utoipa_axum::routes!(get_user_orders))
}

/// Convert a cart into an order, reserving stock.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<OrderWithItems, String>),
        (status = 400, description = "Empty cart, bad quantity, bad address or amount mismatch"),
        (status = 409, description = "A product is unavailable or short on stock")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.validate()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = reservation::reserve(conn, request).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Create order successfully"),
    })
}

/// Fetch a specific order with its items.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderWithItems, String>),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order = orders::get_order_with_items(conn, id).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Get order successfully"),
    })
}

/// Fetch all orders placed by a user, newest first.
#[utoipa::path(
    get,
    path = "/users/{user_id}/orders",
    tags = ["Orders"],
    params(
        ("user_id" = i32, Path, description = "Owner of the orders")
    ),
    responses(
        (status = 200, description = "List user orders", body = StdResponse<Vec<OrderWithItems>, String>)
    )
)]
async fn get_user_orders(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let filter = OrderFilter {
        user_id: Some(user_id),
        ..Default::default()
    };
    let orders = orders::list_orders(conn, &filter).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get user orders successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CancelOrderReq {
    user_id: i32,
}

/// Cancel an order on behalf of the user who placed it. Reserved stock is
/// returned to the catalog.
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to cancel")
    ),
    request_body = CancelOrderReq,
    responses(
        (status = 200, description = "Cancelled order successfully", body = StdResponse<OrderWithItems, String>),
        (status = 404, description = "Order not found for this user"),
        (status = 409, description = "Order can no longer be cancelled")
    )
)]
async fn cancel_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<CancelOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cancelled = orders::cancel_own_order(conn, id, body.user_id).await?;

    Ok(StdResponse {
        data: Some(cancelled),
        message: Some("Cancelled order successfully"),
    })
}

/// Every payment attempt recorded for an order.
#[utoipa::path(
    get,
    path = "/{id}/payments",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "List order payments", body = StdResponse<Vec<PaymentEntity>, String>)
    )
)]
async fn get_order_payments(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payments = payments::list_order_payments(conn, id).await?;

    Ok(StdResponse {
        data: Some(payments),
        message: Some("Get order payments successfully"),
    })
}
