use bigdecimal::BigDecimal;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::status::PaymentMethod;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub order_id: i32,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// External charge step of payment processing.
///
/// Called at most once per payment, while the payment row is locked.
pub trait PaymentGateway: Send + Sync {
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> BoxFuture<'a, ChargeOutcome>;
}

/// Local stand-in for a card processor. Approves everything except the
/// configured methods.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    declined_methods: Vec<PaymentMethod>,
}

impl SimulatedGateway {
    pub fn new(declined_methods: Vec<PaymentMethod>) -> Self {
        Self { declined_methods }
    }
}

impl PaymentGateway for SimulatedGateway {
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> BoxFuture<'a, ChargeOutcome> {
        Box::pin(async move {
            if self.declined_methods.contains(&request.method) {
                ChargeOutcome::Declined {
                    reason: format!("{} payments are declined", request.method),
                }
            } else {
                ChargeOutcome::Approved {
                    transaction_id: format!("TXN-{}", Uuid::new_v4().simple()),
                }
            }
        })
    }
}
