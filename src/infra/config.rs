use std::{fmt::Display, str::FromStr};

use anyhow::{Context, Result, anyhow};

use crate::status::PaymentMethod;

/// Service configuration, read from the environment.
///
/// | Variable                   | Default   |
/// |----------------------------|-----------|
/// | `DATABASE_URL`             | required  |
/// | `DATABASE_MAX_CONNECTIONS` | `10`      |
/// | `SERVER_HOST`              | `0.0.0.0` |
/// | `SERVER_PORT`              | `3000`    |
/// | `PAYMENT_DECLINED_METHODS` | empty     |
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payments: PaymentConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentConfig {
    /// Methods the simulated gateway declines, e.g. `card,qr_payment`.
    pub declined_methods: Vec<PaymentMethod>,
}

pub fn load() -> Result<Config> {
    load_from(|key| std::env::var(key).ok())
}

pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

    Ok(Config {
        server: ServerConfig {
            host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
        },
        payments: PaymentConfig {
            declined_methods: parse_methods(lookup("PAYMENT_DECLINED_METHODS").as_deref())?,
        },
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("Invalid {key} `{raw}`: {err}")),
        None => Ok(default),
    }
}

fn parse_methods(raw: Option<&str>) -> Result<Vec<PaymentMethod>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<PaymentMethod>()
                .context("Invalid PAYMENT_DECLINED_METHODS")
        })
        .collect()
}
