use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use skiprent_api::{app, metrics::Metrics, worker::JobRunner, AppState, AuthConfig};
use skiprent_core::{Clock, SystemClock};
use skiprent_order::{
    InactivitySweep, LifecycleSettings, LogDispatcher, NotificationDispatcher, OrderLifecycle, SatisfactionSurveyJob,
};
use skiprent_store::{
    Config, DbClient, EventProducer, KafkaNotificationDispatcher, PgCustomerRepository, PgOrderRepository,
    PgTariffCatalog, RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skiprent_api=debug,skiprent_order=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting SkipRent API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to read business rules")?;

    let redis = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisClient::new(&redis.url).await.context("Failed to connect to Redis")?,
        )),
        None => {
            tracing::warn!("Redis not configured, rate limiting disabled");
            None
        }
    };

    let producer = match &config.kafka {
        Some(kafka) => Some(EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?),
        None => None,
    };
    let dispatcher: Arc<dyn NotificationDispatcher> = match (&producer, &config.kafka) {
        (Some(producer), Some(kafka)) => Arc::new(KafkaNotificationDispatcher::new(
            producer.clone(),
            kafka.notification_topic.clone(),
        )),
        _ => {
            tracing::warn!("Kafka not configured, notifications are only logged");
            Arc::new(LogDispatcher)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let customers = Arc::new(PgCustomerRepository::new(db.pool.clone()));
    let mut lifecycle = OrderLifecycle::new(
        Arc::new(PgOrderRepository::new(db.pool.clone())),
        customers.clone(),
        Arc::new(PgTariffCatalog::new(db.pool.clone())),
        dispatcher.clone(),
        clock.clone(),
        LifecycleSettings {
            vat_rate: rules.vat_rate,
            token_ttl_days: rules.validation_token_ttl_days,
            public_base_url: rules.public_base_url.clone(),
        },
    );
    if let Some(producer) = producer {
        lifecycle = lifecycle.with_listener(Arc::new(producer));
    }
    let lifecycle = Arc::new(lifecycle);

    let jobs = JobRunner::new(
        SatisfactionSurveyJob::new(lifecycle.clone(), rules.survey_delay_days),
        InactivitySweep::new(customers, dispatcher, clock, rules.inactivity_days),
    );
    tokio::spawn(jobs.run(Duration::from_secs(rules.job_interval_seconds)));

    let app_state = AppState {
        lifecycle,
        redis,
        metrics: Arc::new(Metrics::new().context("Failed to register metrics")?),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        rate_limit_per_minute: rules.rate_limit_per_minute,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
