use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
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
    services::orders::{self, OrderFilter, OrderWithItems},
    status::OrderStatus,
};

/// Back-office order routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(list_orders))
            .routes(utoipa_axum::routes!(advance_status))
            .routes(utoipa_axum::routes!(delete_order)),
    )
}

/// List orders, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Admin"],
    params(OrderFilter),
    responses(
        (status = 200, description = "List orders", body = StdResponse<Vec<OrderWithItems>, String>)
    )
)]
async fn list_orders(
    Query(filter): Query<OrderFilter>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders = orders::list_orders(conn, &filter).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct AdvanceStatusReq {
    target_status: OrderStatus,
}

/// Move an order along its lifecycle. Cancelling returns reserved stock.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Admin"],
    params(
        ("id" = i32, Path, description = "Order ID to update")
    ),
    request_body = AdvanceStatusReq,
    responses(
        (status = 200, description = "Updated order status successfully", body = StdResponse<OrderWithItems, String>),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Transition not allowed from the current status")
    )
)]
async fn advance_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<AdvanceStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated = orders::advance_status(conn, id, body.target_status).await?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated order status successfully"),
    })
}

/// Delete an order, restocking anything it still holds.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Admin"],
    params(
        ("id" = i32, Path, description = "Order ID to delete")
    ),
    responses(
        (status = 204, description = "Deleted order"),
        (status = 404, description = "Order not found")
    )
)]
async fn delete_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    orders::delete_order(conn, id).await?;

    Ok(StatusCode::NO_CONTENT)
}
