use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::AppError;
use crate::state::AppState;

/// Counters owned by one process. Each instance has its own registry.
pub struct Metrics {
    registry: Registry,
    pub transitions: IntCounterVec,
    pub token_redemptions: IntCounterVec,
    pub rate_limited: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new("skiprent_order_transitions_total", "Committed order lifecycle commands"),
            &["transition"],
        )?;
        let token_redemptions = IntCounterVec::new(
            Opts::new("skiprent_token_redemptions_total", "Delivery validation link redemptions by outcome"),
            &["outcome"],
        )?;
        let rate_limited = IntCounter::new("skiprent_rate_limited_total", "Requests refused by the rate limiter")?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(token_redemptions.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;

        Ok(Self {
            registry,
            transitions,
            token_redemptions,
            rate_limited,
        })
    }

    pub fn transition(&self, name: &str) {
        self.transitions.with_label_values(&[name]).inc();
    }

    pub fn redemption(&self, outcome: &str) {
        self.token_redemptions.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_labelled_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.transition("cancel");
        metrics.transition("cancel");
        metrics.redemption("expired");

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"skiprent_order_transitions_total{transition="cancel"} 2"#));
        assert!(text.contains(r#"skiprent_token_redemptions_total{outcome="expired"} 1"#));
    }
}
