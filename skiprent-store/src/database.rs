use crate::app_config::{BusinessRules, MAX_RULE_DAYS};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay the `business_rules` table on top of the file configuration.
    /// Rows are `{"value": ...}` documents keyed by rule name.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows = sqlx::query("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            let key: String = row.try_get("rule_key")?;
            let value: Value = row.try_get("rule_value")?;
            if !apply_rule(&mut rules, &key, &value) {
                warn!(rule = %key, "Ignoring unusable business rule override");
            }
        }
        Ok(rules)
    }
}

fn apply_rule(rules: &mut BusinessRules, key: &str, document: &Value) -> bool {
    let Some(v) = document.get("value") else {
        return false;
    };
    match key {
        "vat_rate" => {
            // Stored as a string to keep it exact; numbers are accepted too
            let parsed = match v {
                Value::String(s) => Decimal::from_str(s).ok(),
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                _ => None,
            };
            match parsed {
                Some(rate) if rate >= Decimal::ZERO => {
                    rules.vat_rate = rate;
                    true
                }
                _ => false,
            }
        }
        "validation_token_ttl_days" => set_days(&mut rules.validation_token_ttl_days, v),
        "survey_delay_days" => set_days(&mut rules.survey_delay_days, v),
        "inactivity_days" => set_days(&mut rules.inactivity_days, v),
        "public_base_url" => match v.as_str() {
            Some(s) => {
                rules.public_base_url = s.to_string();
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn set_days(target: &mut i64, v: &Value) -> bool {
    match v.as_i64() {
        Some(days) if (1..=MAX_RULE_DAYS).contains(&days) => {
            *target = days;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn rules() -> BusinessRules {
        BusinessRules {
            vat_rate: dec!(0.20),
            validation_token_ttl_days: 7,
            public_base_url: "https://skiprent.example/v1".to_string(),
            survey_delay_days: 7,
            inactivity_days: 90,
            job_interval_seconds: 3600,
            rate_limit_per_minute: 120,
        }
    }

    #[test]
    fn test_rule_overrides() {
        let mut r = rules();
        assert!(apply_rule(&mut r, "vat_rate", &json!({"value": "0.10"})));
        assert_eq!(r.vat_rate, dec!(0.10));

        assert!(apply_rule(&mut r, "validation_token_ttl_days", &json!({"value": 3})));
        assert_eq!(r.validation_token_ttl_days, 3);

        assert!(!apply_rule(&mut r, "inactivity_days", &json!({"value": -1})));
        assert_eq!(r.inactivity_days, 90);

        assert!(!apply_rule(&mut r, "validation_token_ttl_days", &json!({"value": 1_000_000_000_000_000i64})));
        assert_eq!(r.validation_token_ttl_days, 3);
        assert!(apply_rule(&mut r, "survey_delay_days", &json!({"value": MAX_RULE_DAYS})));

        assert!(!apply_rule(&mut r, "vat_rate", &json!({"rate": "0.3"})));
        assert!(!apply_rule(&mut r, "unknown", &json!({"value": 1})));
    }
}
