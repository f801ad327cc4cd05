//! Inventory reservation: cart to order in one transaction.

use std::collections::HashMap;

use anyhow::Context;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::SelectableHelper;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::OrderError,
    infra::app_error::AppError,
    models::{
        CreateOrderEntity, CreateOrderItemEntity, OrderEntity, OrderItemEntity, ProductEntity,
        ShippingAddress,
    },
    schema::{order_items, orders},
    services::{catalog, orders::OrderWithItems},
    status::{OrderStatus, PaymentMethod, PaymentStatus},
};

/// Body of `POST /orders`, as the storefront cart submits it.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct CheckoutRequest {
    pub user_id: i32,
    pub items: Vec<CheckoutItem>,
    #[schema(value_type = String, example = "3600.00")]
    pub total_amount: BigDecimal,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct CheckoutItem {
    pub product_id: i32,
    pub quantity: i32,
    /// Price the cart displayed. Advisory: the order is priced from the catalog.
    #[schema(value_type = String, example = "1200.00")]
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub user_id: i32,
    pub lines: Vec<CartLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationPlan {
    pub items: Vec<PlannedItem>,
    pub total_amount: BigDecimal,
}

impl CheckoutRequest {
    /// Checks the request on its own terms, before any stock is looked at.
    pub fn validate(self) -> Result<ReservationRequest, OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        if let Some(item) = self.items.iter().find(|item| item.quantity < 1) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id,
                quantity: item.quantity,
            });
        }

        let submitted = self
            .items
            .iter()
            .fold(BigDecimal::from(0), |acc, item| {
                acc + &item.unit_price * BigDecimal::from(item.quantity)
            });
        if submitted != self.total_amount {
            return Err(OrderError::AmountMismatch {
                expected: submitted,
                actual: self.total_amount,
            });
        }

        self.shipping_address.validate()?;

        let lines = self
            .items
            .iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();

        Ok(ReservationRequest {
            user_id: self.user_id,
            lines: merge_lines(lines)?,
            shipping_address: self.shipping_address,
            payment_method: self.payment_method,
        })
    }
}

/// Collapses repeated products into one line, keeping first-seen order.
pub fn merge_lines(lines: Vec<CartLine>) -> Result<Vec<CartLine>, OrderError> {
    if lines.is_empty() {
        return Err(OrderError::EmptyCart);
    }

    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity < 1 {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }

        match merged.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or(
                    OrderError::InvalidQuantity {
                        product_id: line.product_id,
                        quantity: i32::MAX,
                    },
                )?;
            }
            None => merged.push(line),
        }
    }

    Ok(merged)
}

/// Exclusive upper bound of a `NUMERIC(12,2)` money column.
const MAX_AMOUNT: i64 = 10_000_000_000;

/// Prices and checks every line against the locked catalog rows. A line
/// that would push a total past what the money columns hold is rejected as
/// an invalid quantity.
///
/// All-or-nothing: the first unsatisfiable line fails the whole plan.
pub fn plan_reservation(
    lines: &[CartLine],
    catalog: &HashMap<i32, ProductEntity>,
) -> Result<ReservationPlan, OrderError> {
    if lines.is_empty() {
        return Err(OrderError::EmptyCart);
    }

    let max_amount = BigDecimal::from(MAX_AMOUNT);
    let mut running_total = BigDecimal::from(0);
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let product = catalog
            .get(&line.product_id)
            .filter(|p| p.active)
            .ok_or(OrderError::ProductUnavailable {
                product_id: line.product_id,
            })?;

        if line.quantity > product.stock {
            return Err(OrderError::InsufficientStock {
                product_id: product.id,
                requested: line.quantity,
                available: product.stock,
            });
        }

        let unit_price = product.price.clone();
        let total_price = &unit_price * BigDecimal::from(line.quantity);
        running_total += &total_price;
        if running_total >= max_amount {
            return Err(OrderError::InvalidQuantity {
                product_id: product.id,
                quantity: line.quantity,
            });
        }
        items.push(PlannedItem {
            product_id: product.id,
            quantity: line.quantity,
            unit_price,
            total_price,
        });
    }

    Ok(ReservationPlan {
        items,
        total_amount: running_total,
    })
}

/// `ORD-<yyyymmddHHMMSS>-<6 hex>`; sorts roughly by creation time.
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        suffix[..6].to_uppercase()
    )
}

/// Locks the products, decrements their stock and writes the order with its
/// items, all in one transaction.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    request: ReservationRequest,
) -> Result<OrderWithItems, AppError> {
    let lines = merge_lines(request.lines)?;
    request.shipping_address.validate()?;

    let user_id = request.user_id;
    let payment_method = request.payment_method;
    let shipping_address = serde_json::to_value(&request.shipping_address)
        .context("Failed to serialize shipping address")?;
    let order_number = generate_order_number();

    let reserved = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let ids: Vec<i32> = lines.iter().map(|line| line.product_id).collect();
                let locked = catalog::lock_products(conn, &ids).await?;

                let plan = plan_reservation(&lines, &locked).inspect_err(|err| {
                    warn!("Reservation rejected for user #{}: {}", user_id, err)
                })?;

                for item in &plan.items {
                    catalog::decrement_stock(conn, item.product_id, item.quantity).await?;
                }

                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        order_number,
                        user_id,
                        total_amount: plan.total_amount,
                        status: OrderStatus::Pending,
                        payment_status: PaymentStatus::Pending,
                        payment_method,
                        shipping_address,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await?;

                let new_items: Vec<CreateOrderItemEntity> = plan
                    .items
                    .into_iter()
                    .map(|item| CreateOrderItemEntity {
                        order_id: order.id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        total_price: item.total_price,
                    })
                    .collect();

                let items: Vec<OrderItemEntity> = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await?;

                Ok::<OrderWithItems, AppError>(OrderWithItems { order, items })
            })
        })
        .await?;

    info!(
        "Order {} (#{}) reserved for user #{}: {} line(s), total {}",
        reserved.order.order_number,
        reserved.order.id,
        user_id,
        reserved.items.len(),
        reserved.order.total_amount
    );

    Ok(reserved)
}
