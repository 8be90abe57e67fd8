use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skiprent_catalog::PricingError;
use skiprent_order::OrderError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Order(OrderError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::AuthenticationError(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AppError::AuthorizationError(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::InternalServerError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            AppError::Order(err) => order_parts(err),
        }
    }
}

fn order_parts(err: &OrderError) -> (StatusCode, &'static str) {
    match err {
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
        OrderError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        OrderError::IllegalTransition { .. } => (StatusCode::CONFLICT, "ILLEGAL_TRANSITION"),
        OrderError::StaleState { .. } => (StatusCode::CONFLICT, "STALE_STATE"),
        OrderError::TokenInvalid => (StatusCode::NOT_FOUND, "TOKEN_INVALID"),
        OrderError::TokenExpired => (StatusCode::GONE, "TOKEN_EXPIRED"),
        OrderError::TokenAlreadyUsed => (StatusCode::CONFLICT, "TOKEN_ALREADY_USED"),
        OrderError::Pricing(PricingError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        OrderError::Pricing(PricingError::InvalidTariff(_)) => (StatusCode::BAD_REQUEST, "INVALID_TARIFF"),
        OrderError::Pricing(PricingError::ServiceNotFound(_)) => (StatusCode::NOT_FOUND, "SERVICE_NOT_FOUND"),
        OrderError::Pricing(PricingError::TariffNotConfigured(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "TARIFF_NOT_CONFIGURED")
        }
        OrderError::Pricing(PricingError::Store(_)) | OrderError::Store(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        AppError::Order(err)
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        AppError::Order(OrderError::Pricing(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiprent_core::StoreError;
    use skiprent_order::OrderStatus;
    use uuid::Uuid;

    fn status_of(err: OrderError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_order_error_statuses() {
        assert_eq!(status_of(OrderError::NotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrderError::TokenInvalid), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrderError::TokenExpired), StatusCode::GONE);
        assert_eq!(status_of(OrderError::TokenAlreadyUsed), StatusCode::CONFLICT);
        assert_eq!(
            status_of(OrderError::StaleState {
                expected: OrderStatus::Pending,
                actual: OrderStatus::Cancelled,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrderError::Pricing(PricingError::TariffNotConfigured("transport".into()))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(OrderError::Store(StoreError::Backend("pool timed out".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
