use crate::metrics::Metrics;
use skiprent_order::OrderLifecycle;
use skiprent_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    /// Rate limiting is skipped when absent
    pub redis: Option<Arc<RedisClient>>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
    pub rate_limit_per_minute: i64,
}
