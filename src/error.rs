use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::status::OrderStatus;

/// How a caller should react to an [`OrderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before anything was written; fix the request and resend.
    Validation,
    /// Rejected against authoritative state; re-fetch before retrying.
    Conflict,
}

/// Domain failures of checkout, payment and order administration.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Quantity {quantity} for product #{product_id} must be at least 1")]
    InvalidQuantity { product_id: i32, quantity: i32 },

    #[error("Shipping address is missing `{field}`")]
    InvalidShippingAddress { field: &'static str },

    #[error("Product #{product_id} is not available")]
    ProductUnavailable { product_id: i32 },

    #[error("Product #{product_id} has only {available} in stock, {requested} requested")]
    InsufficientStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Amount {actual} does not match the expected {expected}")]
    AmountMismatch {
        expected: BigDecimal,
        actual: BigDecimal,
    },

    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Orders are confirmed by a completed payment")]
    ConfirmationRequiresPayment,

    #[error("Order #{order_id} already has an active payment")]
    PaymentAlreadyActive { order_id: i32 },

    #[error("Order #{order_id} is {status} and cannot be paid")]
    OrderNotPayable { order_id: i32, status: OrderStatus },
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::EmptyCart
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidShippingAddress { .. }
            | OrderError::AmountMismatch { .. } => ErrorKind::Validation,
            OrderError::ProductUnavailable { .. }
            | OrderError::InsufficientStock { .. }
            | OrderError::IllegalTransition { .. }
            | OrderError::ConfirmationRequiresPayment
            | OrderError::PaymentAlreadyActive { .. }
            | OrderError::OrderNotPayable { .. } => ErrorKind::Conflict,
        }
    }

    /// Stable machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::EmptyCart => "EMPTY_CART",
            OrderError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            OrderError::InvalidShippingAddress { .. } => "INVALID_SHIPPING_ADDRESS",
            OrderError::ProductUnavailable { .. } => "PRODUCT_UNAVAILABLE",
            OrderError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            OrderError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            OrderError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            OrderError::ConfirmationRequiresPayment => "CONFIRMATION_REQUIRES_PAYMENT",
            OrderError::PaymentAlreadyActive { .. } => "PAYMENT_ALREADY_ACTIVE",
            OrderError::OrderNotPayable { .. } => "ORDER_NOT_PAYABLE",
        }
    }
}
