use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use skiprent_catalog::PriceBreakdown;
use skiprent_core::PaymentStatus;
use skiprent_order::{
    CheckoutRequest, ClientAction, ClientValidationStatus, DeliveryAddress, EmailFlags, NotificationAttempt, Order,
    OrderError, OrderStatus,
};
use skiprent_shared::Masked;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Order as shown outside the service. The validation token never leaves
/// through this type; only its expiry does.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<Masked<String>>,
    pub delivery_address: DeliveryAddress,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub price: PriceBreakdown,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub confirmed_delivery_date: Option<NaiveDate>,
    pub proposed_delivery_date: Option<NaiveDate>,
    pub client_validation_status: Option<ClientValidationStatus>,
    pub proposal_expires_at: Option<DateTime<Utc>>,
    pub email_flags: EmailFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_log: Option<Vec<NotificationAttempt>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    /// Anyone holding the order id
    pub fn public(order: Order) -> Self {
        Self::build(order, false)
    }

    /// Back office, with contact details and the delivery log
    pub fn for_admin(order: Order) -> Self {
        Self::build(order, true)
    }

    fn build(order: Order, admin: bool) -> Self {
        let proposal_expires_at = order
            .validation_token
            .as_ref()
            .filter(|t| !t.is_consumed())
            .map(|t| t.expires_at);

        Self {
            id: order.id,
            customer_id: order.customer_id,
            customer_email: admin.then_some(order.customer_email),
            delivery_address: order.delivery_address,
            status: order.status,
            payment_status: order.payment_status,
            price: order.price,
            estimated_delivery_date: order.estimated_delivery_date,
            confirmed_delivery_date: order.confirmed_delivery_date,
            proposed_delivery_date: order.proposed_delivery_date,
            client_validation_status: order.client_validation_status,
            proposal_expires_at,
            email_flags: order.email_flags,
            notification_log: admin.then_some(order.notification_log),
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
            delivered_at: order.delivered_at,
            completed_at: order.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateDeliveryQuery {
    pub token: String,
    pub action: ClientAction,
}

#[derive(Debug, Serialize)]
pub struct DeliveryAnswerResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub client_validation_status: Option<ClientValidationStatus>,
    pub confirmed_delivery_date: Option<NaiveDate>,
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(place_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/validate-delivery", get(validate_delivery))
}

/// POST /v1/orders
///
/// Guest checkout unless `customer_id` is given.
async fn place_order(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let order = state.lifecycle.place_order(req).await?;
    state.metrics.transition("place_order");
    Ok((StatusCode::CREATED, Json(OrderResponse::public(order))))
}

/// GET /v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.lifecycle.get_order(id).await?;
    Ok(Json(OrderResponse::public(order)))
}

/// GET /v1/validate-delivery?token=..&action=accept|reject
///
/// Target of the links in the proposal email. Possession of the link is the
/// only credential.
async fn validate_delivery(
    State(state): State<AppState>,
    Query(query): Query<ValidateDeliveryQuery>,
) -> Result<Json<DeliveryAnswerResponse>, AppError> {
    let result = state.lifecycle.client_respond(&query.token, query.action).await;
    state.metrics.redemption(redemption_outcome(&result, query.action));

    let order = result?;
    state.metrics.transition(match query.action {
        ClientAction::Accept => "client_accept",
        ClientAction::Reject => "client_reject",
    });
    info!(order_id = %order.id, action = query.action.as_str(), "Delivery link redeemed");

    let message = match query.action {
        ClientAction::Accept => "Delivery date confirmed".to_string(),
        ClientAction::Reject => "Proposal declined, we will contact you with another date".to_string(),
    };
    Ok(Json(DeliveryAnswerResponse {
        order_id: order.id,
        status: order.status,
        client_validation_status: order.client_validation_status,
        confirmed_delivery_date: order.confirmed_delivery_date,
        message,
    }))
}

fn redemption_outcome(result: &Result<Order, OrderError>, action: ClientAction) -> &'static str {
    match result {
        Ok(_) => match action {
            ClientAction::Accept => "accepted",
            ClientAction::Reject => "rejected",
        },
        Err(OrderError::TokenInvalid) => "invalid",
        Err(OrderError::TokenExpired) => "expired",
        Err(OrderError::TokenAlreadyUsed) => "already_used",
        Err(OrderError::IllegalTransition { .. }) => "illegal_state",
        Err(_) => "error",
    }
}
