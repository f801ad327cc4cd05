use axum::response::IntoResponse;
use utoipa_axum::router::OpenApiRouter;

use crate::infra::{app_error::StdResponse, app_state::AppState};

pub mod admin;
pub mod orders;
pub mod payments;
pub mod products;

/// Every route of the service, storefront and back office.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(health))
        .merge(products::routes_with_openapi())
        .merge(orders::routes_with_openapi())
        .merge(payments::routes_with_openapi())
        .merge(admin::orders::routes_with_openapi())
        .merge(admin::products::routes_with_openapi())
}

/// Liveness probe. Does not touch the database.
#[utoipa::path(
    get,
    path = "/health",
    tags = ["Health"],
    responses(
        (status = 200, description = "Service is up", body = StdResponse<String, String>)
    )
)]
async fn health() -> impl IntoResponse {
    StdResponse::<String, &str> {
        data: Some("ok".into()),
        message: Some("OrderService is running"),
    }
}
