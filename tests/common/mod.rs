#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bigdecimal::BigDecimal;
use futures::future::BoxFuture;
use gym_orderservice::{
    infra::{
        app_state::AppState,
        config::DatabaseConfig,
        db::{self, MIGRATIONS},
    },
    models::{CreateProductEntity, ProductEntity, ShippingAddress},
    services::{
        catalog,
        gateway::{ChargeOutcome, ChargeRequest, PaymentGateway, SimulatedGateway},
        orders::OrderWithItems,
        reservation::{self, CartLine, ReservationRequest},
    },
    status::PaymentMethod,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Gateway that counts charges and delegates to the simulator.
#[derive(Default)]
pub struct CountingGateway {
    pub calls: AtomicUsize,
    inner: SimulatedGateway,
}

impl CountingGateway {
    pub fn declining(methods: Vec<PaymentMethod>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            inner: SimulatedGateway::new(methods),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaymentGateway for CountingGateway {
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> BoxFuture<'a, ChargeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.charge(request)
    }
}

/// `None` when `TEST_DATABASE_URL` is not set; callers return early.
pub async fn test_state(gateway: Arc<dyn PaymentGateway>) -> Option<AppState> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    MIGRATED
        .get_or_init(|| async {
            db::run_migrations_blocking(MIGRATIONS, &url)
                .await
                .expect("migrations failed");
        })
        .await;

    let pool = db::create_pool(&DatabaseConfig {
        url,
        max_connections: 16,
    })
    .await
    .expect("failed to build pool");

    Some(AppState::new(pool, gateway))
}

pub fn price(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap()
}

/// Users are never cleaned up, so each test takes a fresh id.
pub fn unique_user() -> i32 {
    (Uuid::new_v4().as_u128() % 1_000_000_000) as i32 + 1
}

pub async fn product(state: &AppState, unit_price: &str, stock: i32) -> ProductEntity {
    let mut conn = state.db_pool.get().await.unwrap();
    catalog::create_product(
        &mut conn,
        CreateProductEntity {
            name: format!("Test product {}", Uuid::new_v4()),
            price: price(unit_price),
            stock,
            active: true,
        },
    )
    .await
    .unwrap()
}

pub async fn stock_of(state: &AppState, product_id: i32) -> i32 {
    let mut conn = state.db_pool.get().await.unwrap();
    catalog::get_product(&mut conn, product_id)
        .await
        .unwrap()
        .stock
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Jo Brennan".into(),
        line1: "88 Iron Street".into(),
        line2: None,
        city: "Dublin".into(),
        postal_code: "D02 X285".into(),
        country: "IE".into(),
        phone: Some("+353 1 555 0100".into()),
    }
}

pub fn request(user_id: i32, lines: &[(i32, i32)]) -> ReservationRequest {
    ReservationRequest {
        user_id,
        lines: lines
            .iter()
            .map(|&(product_id, quantity)| CartLine {
                product_id,
                quantity,
            })
            .collect(),
        shipping_address: address(),
        payment_method: PaymentMethod::Card,
    }
}

pub async fn reserve(
    state: &AppState,
    user_id: i32,
    lines: &[(i32, i32)],
) -> Result<OrderWithItems, gym_orderservice::infra::app_error::AppError> {
    let mut conn = state.db_pool.get().await.unwrap();
    reservation::reserve(&mut conn, request(user_id, lines)).await
}
