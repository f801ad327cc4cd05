use std::sync::Arc;

use crate::{
    infra::{config::Config, db::DbPool},
    services::gateway::{PaymentGateway, SimulatedGateway},
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub fn new(db_pool: DbPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db_pool, gateway }
    }

    pub fn from_config(db_pool: DbPool, config: &Config) -> Self {
        let gateway = SimulatedGateway::new(config.payments.declined_methods.clone());
        Self::new(db_pool, Arc::new(gateway))
    }
}
