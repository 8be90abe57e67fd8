pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod events;
pub mod order_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use catalog_repo::PgTariffCatalog;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotificationDispatcher};
pub use order_repo::{PgCustomerRepository, PgOrderRepository};
pub use redis_repo::RedisClient;
