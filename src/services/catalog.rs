//! Catalog store access.
//!
//! Every function takes the caller's connection so stock mutations commit or
//! roll back together with the order and payment writes around them.

use std::collections::{BTreeMap, HashMap};

use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::info;

use crate::{
    error::OrderError,
    infra::app_error::AppError,
    models::{CreateProductEntity, OrderItemEntity, ProductEntity, UpdateProductEntity},
    schema::products,
};

pub async fn get_product(conn: &mut AsyncPgConnection, id: i32) -> Result<ProductEntity, AppError> {
    let product = products::table
        .find(id)
        .select(ProductEntity::as_select())
        .get_result(conn)
        .await?;

    Ok(product)
}

pub async fn list_products(
    conn: &mut AsyncPgConnection,
    include_inactive: bool,
) -> QueryResult<Vec<ProductEntity>> {
    let mut query = products::table
        .select(ProductEntity::as_select())
        .order_by(products::id.asc())
        .into_boxed();

    if !include_inactive {
        query = query.filter(products::active.eq(true));
    }

    query.get_results(conn).await
}

pub async fn create_product(
    conn: &mut AsyncPgConnection,
    product: CreateProductEntity,
) -> QueryResult<ProductEntity> {
    diesel::insert_into(products::table)
        .values(product)
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
}

pub async fn update_product(
    conn: &mut AsyncPgConnection,
    id: i32,
    changes: UpdateProductEntity,
) -> Result<ProductEntity, AppError> {
    let product = diesel::update(products::table.find(id))
        .set((&changes, products::updated_at.eq(diesel::dsl::now)))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await?;

    Ok(product)
}

/// Row-locks the given products (`SELECT ... FOR UPDATE`) in ascending id
/// order. Must be called inside a transaction; the locks are held until it
/// ends. A consistent lock order keeps concurrent checkouts and restocks from
/// deadlocking.
pub async fn lock_products(
    conn: &mut AsyncPgConnection,
    ids: &[i32],
) -> QueryResult<HashMap<i32, ProductEntity>> {
    let locked: Vec<ProductEntity> = products::table
        .filter(products::id.eq_any(ids))
        .order_by(products::id.asc())
        .select(ProductEntity::as_select())
        .for_update()
        .get_results(conn)
        .await?;

    Ok(locked.into_iter().map(|p| (p.id, p)).collect())
}

/// Takes `quantity` units off the shelf. The `stock >= quantity` guard in the
/// statement makes this safe even without a prior lock.
pub async fn decrement_stock(
    conn: &mut AsyncPgConnection,
    product_id: i32,
    quantity: i32,
) -> Result<ProductEntity, AppError> {
    let updated = diesel::update(
        products::table
            .find(product_id)
            .filter(products::stock.ge(quantity)),
    )
    .set((
        products::stock.eq(products::stock - quantity),
        products::updated_at.eq(diesel::dsl::now),
    ))
    .returning(ProductEntity::as_returning())
    .get_result(conn)
    .await
    .optional()?;

    if let Some(product) = updated {
        return Ok(product);
    }

    let available: Option<i32> = products::table
        .find(product_id)
        .select(products::stock)
        .get_result(conn)
        .await
        .optional()?;

    Err(match available {
        Some(available) => OrderError::InsufficientStock {
            product_id,
            requested: quantity,
            available,
        },
        None => OrderError::ProductUnavailable { product_id },
    }
    .into())
}

pub async fn increment_stock(
    conn: &mut AsyncPgConnection,
    product_id: i32,
    quantity: i32,
) -> QueryResult<ProductEntity> {
    diesel::update(products::table.find(product_id))
        .set((
            products::stock.eq(products::stock + quantity),
            products::updated_at.eq(diesel::dsl::now),
        ))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
}

/// Compensating action for cancelled or deleted orders: puts every item's
/// quantity back on its product.
pub async fn restock_items(
    conn: &mut AsyncPgConnection,
    items: &[OrderItemEntity],
) -> QueryResult<()> {
    let mut quantities: BTreeMap<i32, i32> = BTreeMap::new();
    for item in items {
        *quantities.entry(item.product_id).or_default() += item.quantity;
    }

    let ids: Vec<i32> = quantities.keys().copied().collect();
    lock_products(conn, &ids).await?;

    for (product_id, quantity) in quantities {
        let product = increment_stock(conn, product_id, quantity).await?;
        info!(
            "Restocked {} x product #{} (stock now {})",
            quantity, product_id, product.stock
        );
    }

    Ok(())
}
