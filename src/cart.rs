//! Storefront cart.
//!
//! Lives on the client only. Nothing here talks to the server or checks
//! stock; the prices are the ones the shopper saw and are re-read from the
//! catalog at checkout.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::{
    models::ShippingAddress,
    services::reservation::{CheckoutItem, CheckoutRequest},
    status::PaymentMethod,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CartEntry {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price_snapshot: BigDecimal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Cart {
    entries: Vec<CartEntry>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` units, merging with an existing entry for the same
    /// product. The first price snapshot taken for a product is kept.
    pub fn add_item(&mut self, product_id: i32, unit_price: BigDecimal, quantity: i32) {
        if quantity <= 0 {
            return;
        }

        match self.entry_mut(product_id) {
            Some(entry) => entry.quantity = entry.quantity.saturating_add(quantity),
            None => self.entries.push(CartEntry {
                product_id,
                quantity,
                unit_price_snapshot: unit_price,
            }),
        }
    }

    pub fn remove_item(&mut self, product_id: i32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.product_id != product_id);
        self.entries.len() != before
    }

    /// Sets the quantity of an existing entry; `quantity <= 0` removes it.
    pub fn update_quantity(&mut self, product_id: i32, quantity: i32) {
        if quantity <= 0 {
            self.remove_item(product_id);
        } else if let Some(entry) = self.entry_mut(product_id) {
            entry.quantity = quantity;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn total(&self) -> BigDecimal {
        self.entries.iter().fold(BigDecimal::from(0), |acc, entry| {
            acc + &entry.unit_price_snapshot * BigDecimal::from(entry.quantity)
        })
    }

    pub fn entries(&self) -> &[CartEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the `POST /orders` body for this cart.
    pub fn checkout_request(
        &self,
        user_id: i32,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
    ) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            items: self
                .entries
                .iter()
                .map(|entry| CheckoutItem {
                    product_id: entry.product_id,
                    quantity: entry.quantity,
                    unit_price: entry.unit_price_snapshot.clone(),
                })
                .collect(),
            total_amount: self.total(),
            shipping_address,
            payment_method,
        }
    }

    fn entry_mut(&mut self, product_id: i32) -> Option<&mut CartEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.product_id == product_id)
    }
}

/// JSON file holding the cart between sessions on one device.
#[derive(Debug, Clone)]
pub struct LocalCartStore {
    path: PathBuf,
}

impl LocalCartStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns an empty cart when nothing has been saved yet.
    pub fn load(&self) -> Result<Cart> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Cart::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read cart {}", self.path.display()));
            }
        };

        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse cart {}", self.path.display()))
    }

    /// Writes through a temporary file so a crash never leaves half a cart.
    pub fn save(&self, cart: &Cart) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(cart).context("Failed to serialize cart")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    /// Forgets the saved cart, e.g. after a successful checkout.
    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
        }
    }
}
