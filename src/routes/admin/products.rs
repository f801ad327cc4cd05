use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    infra::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::{CreateProductEntity, ProductEntity, UpdateProductEntity},
    services::catalog,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin/products",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(create_product))
            .routes(utoipa_axum::routes!(update_product)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct CreateProductReq {
    pub name: String,
    #[schema(value_type = String, example = "1200.00")]
    pub price: BigDecimal,
    pub stock: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Price, name and visibility only. Stock changes go through orders.
#[derive(Deserialize, ToSchema)]
pub struct UpdateProductReq {
    pub name: Option<String>,
    #[schema(value_type = Option<String>, example = "1250.00")]
    pub price: Option<BigDecimal>,
    pub active: Option<bool>,
}

fn validate_price(price: &BigDecimal) -> Result<(), AppError> {
    if *price <= BigDecimal::from(0) {
        return Err(AppError::BadRequest("Price must be positive".into()));
    }
    Ok(())
}

/// Add a product to the catalog with its opening stock.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Admin"],
    request_body = CreateProductReq,
    responses(
        (status = 200, description = "Created product successfully", body = StdResponse<ProductEntity, String>),
        (status = 400, description = "Invalid name, price or stock")
    )
)]
async fn create_product(
    State(state): State<AppState>,
    Json(body): Json<CreateProductReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Product name must not be empty".into()));
    }
    validate_price(&body.price)?;
    if body.stock < 0 {
        return Err(AppError::BadRequest("Stock must not be negative".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product = catalog::create_product(
        conn,
        CreateProductEntity {
            name: body.name,
            price: body.price,
            stock: body.stock,
            active: body.active,
        },
    )
    .await
    .context("Failed to create product")?;

    tracing::info!("Product #{} created with stock {}", product.id, product.stock);

    Ok(StdResponse {
        data: Some(product),
        message: Some("Created product successfully"),
    })
}

/// Change a product's name, price or visibility. Existing orders keep the
/// price they were placed at.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Admin"],
    params(
        ("id" = i32, Path, description = "Product ID to update")
    ),
    request_body = UpdateProductReq,
    responses(
        (status = 200, description = "Updated product successfully", body = StdResponse<ProductEntity, String>),
        (status = 400, description = "Nothing to update or invalid price"),
        (status = 404, description = "Product not found")
    )
)]
async fn update_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<UpdateProductReq>,
) -> Result<impl IntoResponse, AppError> {
    let changes = UpdateProductEntity {
        name: body.name,
        price: body.price,
        active: body.active,
    };
    if changes.is_empty() {
        return Err(AppError::BadRequest("No product fields to update".into()));
    }
    if let Some(price) = &changes.price {
        validate_price(price)?;
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product = catalog::update_product(conn, id, changes).await?;

    Ok(StdResponse {
        data: Some(product),
        message: Some("Updated product successfully"),
    })
}
