use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use skiprent_catalog::PriceBreakdown;
use skiprent_core::PaymentStatus;
use skiprent_order::{NotificationKind, OrderStatus};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::orders::OrderResponse;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body shared by the lifecycle commands. `expected_status` turns the command
/// into a conditional one: it fails with a conflict if the order moved.
#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_status: Option<OrderStatus>,
}

impl TransitionRequest {
    fn required_date(&self) -> Result<NaiveDate, AppError> {
        self.date
            .ok_or_else(|| AppError::ValidationError("date is required".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Serialize)]
pub struct RequoteResponse {
    pub order: OrderResponse,
    pub previous: PriceBreakdown,
    pub changed: bool,
}

// ============================================================================
// Order Management Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/orders", get(list_orders))
        .route("/v1/admin/orders/{id}", get(get_order).delete(delete_order))
        .route("/v1/admin/orders/{id}/confirm-date", post(confirm_date))
        .route("/v1/admin/orders/{id}/propose-date", post(propose_date))
        .route("/v1/admin/orders/{id}/delivered", post(mark_delivered))
        .route("/v1/admin/orders/{id}/completed", post(mark_completed))
        .route("/v1/admin/orders/{id}/cancel", post(cancel))
        .route("/v1/admin/orders/{id}/requote", post(requote))
        .route("/v1/admin/orders/{id}/payment-status", post(update_payment_status))
        .route("/v1/admin/orders/{id}/notifications/{kind}/resend", post(resend_notification))
}

/// GET /v1/admin/orders?status=PENDING
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = state.lifecycle.list_orders(query.status).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::for_admin).collect()))
}

/// GET /v1/admin/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.lifecycle.get_order(id).await?;
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/confirm-date
async fn confirm_date(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let date = req.required_date()?;
    let order = state
        .lifecycle
        .confirm_delivery_date(id, date, req.expected_status)
        .await?;
    committed(&state, &claims, "confirm_date", id);
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/propose-date
///
/// Issues a fresh validation link; any earlier one stops working.
async fn propose_date(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let date = req.required_date()?;
    let order = state
        .lifecycle
        .propose_delivery_date(id, date, req.expected_status)
        .await?;
    committed(&state, &claims, "propose_date", id);
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/delivered
async fn mark_delivered(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<OrderResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let order = state.lifecycle.mark_delivered(id, req.expected_status).await?;
    committed(&state, &claims, "delivered", id);
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/completed
async fn mark_completed(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<OrderResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let order = state.lifecycle.mark_completed(id, req.expected_status).await?;
    committed(&state, &claims, "completed", id);
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/cancel
async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<OrderResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let order = state.lifecycle.cancel(id, req.expected_status).await?;
    committed(&state, &claims, "cancel", id);
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/requote
async fn requote(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<RequoteResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let outcome = state.lifecycle.requote(id, req.expected_status).await?;
    committed(&state, &claims, "requote", id);
    Ok(Json(RequoteResponse {
        order: OrderResponse::for_admin(outcome.order),
        previous: outcome.previous,
        changed: outcome.changed,
    }))
}

/// POST /v1/admin/orders/{id}/payment-status
///
/// Relay for the payment gateway. Leaves the lifecycle alone.
async fn update_payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentStatusRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.lifecycle.update_payment_status(id, req.status).await?;
    info!(admin = %claims.sub, order_id = %id, status = req.status.as_str(), "Payment status set");
    Ok(Json(OrderResponse::for_admin(order)))
}

/// POST /v1/admin/orders/{id}/notifications/{kind}/resend
async fn resend_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path((id, kind)): Path<(Uuid, String)>,
) -> Result<Json<OrderResponse>, AppError> {
    let kind = kind.parse::<NotificationKind>().map_err(AppError::ValidationError)?;
    if kind == NotificationKind::InactivityReminder {
        return Err(AppError::ValidationError(
            "inactivity reminders are not tied to an order".to_string(),
        ));
    }

    let order = state.lifecycle.resend_notification(id, kind).await?;
    info!(admin = %claims.sub, order_id = %id, kind = kind.as_str(), "Notification resent");
    Ok(Json(OrderResponse::for_admin(order)))
}

/// DELETE /v1/admin/orders/{id}
async fn delete_order(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.lifecycle.delete_order(id).await?;
    info!(admin = %claims.sub, order_id = %id, "Order deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

fn committed(state: &AppState, claims: &AdminClaims, transition: &str, id: Uuid) {
    state.metrics.transition(transition);
    info!(admin = %claims.sub, order_id = %id, transition, "Admin command applied");
}
