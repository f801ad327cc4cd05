use anyhow::Result;
use axum::Router;
use gym_orderservice::{
    infra::{
        app_state::AppState,
        bootstrap::{self, serve},
        config, db, swagger,
    },
    routes,
};

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let routes = routes::routes_with_openapi();

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Gym OrderService API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi);

    let app = Router::new().merge(routes).merge(swagger_ui);

    tracing::info!("Running migrations...");
    let config = config::load()?;
    let migrations_count =
        db::run_migrations_blocking(db::MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    tracing::info!("Bootstrapping...");
    let db_pool = db::create_pool(&config.database).await?;
    let state = AppState::from_config(db_pool, &config);

    serve("OrderService", app, state, &config.server).await?;
    Ok(())
}
