pub mod cart;
pub mod error;
pub mod infra;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod status;
