use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_vat_rate")]
    pub vat_rate: Decimal,
    #[serde(default = "default_token_ttl_days")]
    pub validation_token_ttl_days: i64,
    pub public_base_url: String,
    #[serde(default = "default_survey_delay_days")]
    pub survey_delay_days: i64,
    #[serde(default = "default_inactivity_days")]
    pub inactivity_days: i64,
    #[serde(default = "default_job_interval_seconds")]
    pub job_interval_seconds: u64,
    /// Requests per minute per client IP on the public routes
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: i64,
}

/// Upper bound for every day-count rule
pub const MAX_RULE_DAYS: i64 = 3650;

impl BusinessRules {
    pub fn validate(&self) -> Result<(), String> {
        for (name, days) in [
            ("validation_token_ttl_days", self.validation_token_ttl_days),
            ("survey_delay_days", self.survey_delay_days),
            ("inactivity_days", self.inactivity_days),
        ] {
            if !(1..=MAX_RULE_DAYS).contains(&days) {
                return Err(format!("{name} must be between 1 and {MAX_RULE_DAYS}, got {days}"));
            }
        }
        if self.vat_rate.is_sign_negative() && !self.vat_rate.is_zero() {
            return Err(format!("vat_rate must not be negative, got {}", self.vat_rate));
        }
        Ok(())
    }
}

fn default_vat_rate() -> Decimal {
    skiprent_core::money::DEFAULT_VAT_RATE
}

fn default_token_ttl_days() -> i64 { 7 }

fn default_survey_delay_days() -> i64 { 7 }

fn default_inactivity_days() -> i64 { 90 }

fn default_job_interval_seconds() -> u64 { 3600 }

fn default_rate_limit_per_minute() -> i64 { 120 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
}

fn default_notification_topic() -> String {
    "order.notifications".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. SKIPRENT__DATABASE__URL
            .add_source(config::Environment::with_prefix("SKIPRENT").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.business_rules.validate().map_err(config::ConfigError::Message)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_business_rule_defaults() {
        let s = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 3000

                [database]
                url = "postgres://localhost/skiprent"

                [auth]
                jwt_secret = "secret"

                [business_rules]
                public_base_url = "https://skiprent.example/v1"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = s.try_deserialize().unwrap();

        assert!(config.redis.is_none());
        assert!(config.kafka.is_none());
        assert_eq!(config.business_rules.vat_rate, dec!(0.20));
        assert_eq!(config.business_rules.validation_token_ttl_days, 7);
        assert_eq!(config.business_rules.inactivity_days, 90);
        assert!(config.business_rules.validate().is_ok());
    }

    #[test]
    fn test_day_rules_are_bounded() {
        let mut rules = BusinessRules {
            vat_rate: dec!(0.20),
            validation_token_ttl_days: MAX_RULE_DAYS,
            public_base_url: "https://skiprent.example/v1".to_string(),
            survey_delay_days: 7,
            inactivity_days: 90,
            job_interval_seconds: 3600,
            rate_limit_per_minute: 120,
        };
        assert!(rules.validate().is_ok());

        rules.validation_token_ttl_days = 1_000_000_000_000_000;
        assert!(rules.validate().unwrap_err().contains("validation_token_ttl_days"));

        rules.validation_token_ttl_days = 7;
        rules.inactivity_days = 0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_vat_rate_from_string() {
        let s = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 3000
                [database]
                url = "postgres://localhost/skiprent"
                [kafka]
                brokers = "localhost:9092"
                [auth]
                jwt_secret = "secret"
                [business_rules]
                vat_rate = "0.055"
                public_base_url = "https://skiprent.example/v1"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = s.try_deserialize().unwrap();

        assert_eq!(config.business_rules.vat_rate, dec!(0.055));
        assert_eq!(config.kafka.unwrap().notification_topic, "order.notifications");
    }
}
