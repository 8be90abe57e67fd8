use axum::{extract::State, routing::post, Json, Router};
use skiprent_catalog::{PriceBreakdown, QuoteRequest};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/quotes", post(create_quote))
}

/// POST /v1/quotes
///
/// Price simulator. Runs the checkout pricing path and stores nothing.
async fn create_quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<PriceBreakdown>, AppError> {
    let breakdown = state.lifecycle.quote(&req).await?;
    Ok(Json(breakdown))
}
