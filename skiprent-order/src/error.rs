use crate::models::OrderStatus;
use skiprent_catalog::PricingError;
use skiprent_core::StoreError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state transition from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order changed concurrently: expected {expected}, found {actual}")]
    StaleState { expected: OrderStatus, actual: OrderStatus },

    #[error("Validation token is invalid")]
    TokenInvalid,

    #[error("Validation token has expired")]
    TokenExpired,

    #[error("Validation token has already been used")]
    TokenAlreadyUsed,

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type OrderResult<T> = Result<T, OrderError>;
