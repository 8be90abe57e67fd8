use async_trait::async_trait;
use rust_decimal::Decimal;
use skiprent_catalog::{RentalPricing, RentalTier, Service, TariffCatalog, TransportPricing, TreatmentCode, TreatmentPricing};
use skiprent_core::{Amount, StoreError, StoreResult};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub(crate) fn non_negative(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {value}")))
}

/// Tariff tables in Postgres. Every read filters on `is_active`.
pub struct PgTariffCatalog {
    pool: PgPool,
}

impl PgTariffCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rental_from_row(row: &PgRow) -> StoreResult<RentalPricing> {
    let mut tiers = Vec::new();
    for n in 1..=3 {
        let threshold: Option<i32> = row.try_get(format!("tier{n}_threshold_days").as_str()).map_err(backend)?;
        let supplement: Option<Decimal> = row.try_get(format!("tier{n}_supplement").as_str()).map_err(backend)?;
        if let (Some(threshold), Some(supplement)) = (threshold, supplement) {
            tiers.push(RentalTier {
                threshold_days: non_negative(threshold, "threshold_days")?,
                supplement_per_day: supplement,
            });
        }
    }

    Ok(RentalPricing {
        id: row.try_get("id").map_err(backend)?,
        service_id: row.try_get("service_id").map_err(backend)?,
        daily_rate: row.try_get("daily_rate").map_err(backend)?,
        billing_start_day: non_negative(row.try_get("billing_start_day").map_err(backend)?, "billing_start_day")?,
        tiers,
        is_active: row.try_get("is_active").map_err(backend)?,
    })
}

#[async_trait]
impl TariffCatalog for PgTariffCatalog {
    async fn service(&self, service_id: Uuid) -> StoreResult<Option<Service>> {
        let row = sqlx::query("SELECT id, name, volume_m3, is_active FROM services WHERE id = $1 AND is_active")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|r| {
            Ok(Service {
                id: r.try_get("id").map_err(backend)?,
                name: r.try_get("name").map_err(backend)?,
                volume_m3: non_negative(r.try_get("volume_m3").map_err(backend)?, "volume_m3")?,
                is_active: r.try_get("is_active").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn rental_rate_for(&self, service_id: Uuid) -> StoreResult<Option<RentalPricing>> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, daily_rate, billing_start_day,
                   tier1_threshold_days, tier1_supplement,
                   tier2_threshold_days, tier2_supplement,
                   tier3_threshold_days, tier3_supplement,
                   is_active
            FROM rental_pricing
            WHERE service_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(rental_from_row).transpose()
    }

    async fn transport_rate(&self) -> StoreResult<Option<TransportPricing>> {
        let row = sqlx::query(
            r#"
            SELECT id, price_per_km, minimum_flat_rate, hourly_rate, is_active
            FROM transport_pricing
            WHERE is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|r| {
            Ok(TransportPricing {
                id: r.try_get("id").map_err(backend)?,
                price_per_km: r.try_get("price_per_km").map_err(backend)?,
                minimum_flat_rate: r.try_get("minimum_flat_rate").map_err(backend)?,
                hourly_rate: r.try_get("hourly_rate").map_err(backend)?,
                is_active: r.try_get("is_active").map_err(backend)?,
            })
        })
        .transpose()
    }

    async fn treatment_rate_for(&self, waste_type_id: Uuid) -> StoreResult<Option<TreatmentPricing>> {
        let rows = sqlx::query(
            r#"
            SELECT id, waste_type_id, price_per_ton, treatment_code, outlet_address, is_active
            FROM treatment_pricing
            WHERE waste_type_id = $1 AND is_active
            "#,
        )
        .bind(waste_type_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        if rows.len() > 1 {
            return Err(StoreError::Corrupt(format!(
                "several active treatment rows for waste type {waste_type_id}"
            )));
        }

        rows.first()
            .map(|r| {
                let code: String = r.try_get("treatment_code").map_err(backend)?;
                Ok(TreatmentPricing {
                    id: r.try_get("id").map_err(backend)?,
                    waste_type_id: r.try_get("waste_type_id").map_err(backend)?,
                    price_per_ton: r.try_get("price_per_ton").map_err(backend)?,
                    treatment_code: code.parse::<TreatmentCode>().map_err(StoreError::Corrupt)?,
                    outlet_address: r.try_get("outlet_address").map_err(backend)?,
                    is_active: r.try_get("is_active").map_err(backend)?,
                })
            })
            .transpose()
    }

    async fn deposit_for(&self, service_id: Uuid, waste_type_id: Uuid) -> StoreResult<Option<Amount>> {
        let amount: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT deposit_amount
            FROM bank_deposits
            WHERE service_id = $1 AND waste_type_id = $2 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .bind(waste_type_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(amount)
    }
}
