use crate::catalog_repo::{backend, non_negative};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skiprent_catalog::PriceBreakdown;
use serde_json::Value;
use skiprent_core::{PaymentStatus, StoreError, StoreResult};
use skiprent_order::{
    Customer, CustomerRepository, DeliveryValidationToken, EmailFlags, NotificationAttempt, NotificationKind,
    NotificationOutcome, Order, OrderRepository, OrderStatus,
};
use skiprent_shared::Masked;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ORDER_COLUMNS: &str = r#"
    id, customer_id, customer_email, delivery_address, service_id, waste_type_ids,
    duration_days, quote_request, price, status, payment_status,
    estimated_delivery_date, confirmed_delivery_date, proposed_delivery_date,
    client_validation_status, client_validation_token, client_validation_issued_at,
    client_validation_expires_at, client_validation_consumed_at,
    order_placed_email_sent, delivery_confirmed_email_sent, delivery_proposed_email_sent,
    proposal_accepted_email_sent, proposal_rejected_email_sent, satisfaction_survey_email_sent,
    notification_log, version, created_at, updated_at, delivered_at, completed_at
"#;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn json<T: serde::de::DeserializeOwned>(row: &PgRow, column: &str) -> StoreResult<T> {
    let value: Value = row.try_get(column).map_err(backend)?;
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parsed<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> StoreResult<T> {
    let text: String = row.try_get(column).map_err(backend)?;
    text.parse().map_err(StoreError::Corrupt)
}

/// Scalar copies of the breakdown kept for reporting queries. The columns are
/// unconstrained NUMERIC so they hold the exact values carried in `price`.
#[derive(Debug, PartialEq, Eq)]
struct PriceColumns {
    base_price: Decimal,
    duration_price: Decimal,
    delivery_fee: Decimal,
    total_ht: Decimal,
    vat: Decimal,
    total_ttc: Decimal,
    deposit_total: Decimal,
}

impl From<&PriceBreakdown> for PriceColumns {
    fn from(price: &PriceBreakdown) -> Self {
        Self {
            base_price: price.base_price(),
            duration_price: price.duration_price(),
            delivery_fee: price.delivery_fee(),
            total_ht: price.total_ht,
            vat: price.vat,
            total_ttc: price.total_ttc,
            deposit_total: price.deposit_total,
        }
    }
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let id: Uuid = row.try_get("id").map_err(backend)?;

    let token: Option<String> = row.try_get("client_validation_token").map_err(backend)?;
    let validation_token = match token {
        Some(token) => Some(DeliveryValidationToken {
            order_id: id,
            token,
            issued_at: row
                .try_get::<Option<DateTime<Utc>>, _>("client_validation_issued_at")
                .map_err(backend)?
                .ok_or_else(|| StoreError::Corrupt(format!("order {id}: token without issue time")))?,
            expires_at: row
                .try_get::<Option<DateTime<Utc>>, _>("client_validation_expires_at")
                .map_err(backend)?
                .ok_or_else(|| StoreError::Corrupt(format!("order {id}: token without expiry")))?,
            consumed_at: row.try_get("client_validation_consumed_at").map_err(backend)?,
        }),
        None => None,
    };

    let client_validation_status: Option<String> = row.try_get("client_validation_status").map_err(backend)?;
    let client_validation_status = client_validation_status
        .map(|s| s.parse())
        .transpose()
        .map_err(StoreError::Corrupt)?;

    Ok(Order {
        id,
        customer_id: row.try_get("customer_id").map_err(backend)?,
        customer_email: Masked::new(row.try_get("customer_email").map_err(backend)?),
        delivery_address: json(row, "delivery_address")?,
        service_id: row.try_get("service_id").map_err(backend)?,
        waste_type_ids: row.try_get("waste_type_ids").map_err(backend)?,
        duration_days: non_negative(row.try_get("duration_days").map_err(backend)?, "duration_days")?,
        quote_request: json(row, "quote_request")?,
        price: json(row, "price")?,
        status: parsed::<OrderStatus>(row, "status")?,
        payment_status: parsed::<PaymentStatus>(row, "payment_status")?,
        estimated_delivery_date: row.try_get("estimated_delivery_date").map_err(backend)?,
        confirmed_delivery_date: row.try_get("confirmed_delivery_date").map_err(backend)?,
        proposed_delivery_date: row.try_get("proposed_delivery_date").map_err(backend)?,
        client_validation_status,
        validation_token,
        email_flags: EmailFlags {
            order_placed: row.try_get("order_placed_email_sent").map_err(backend)?,
            delivery_confirmed: row.try_get("delivery_confirmed_email_sent").map_err(backend)?,
            delivery_proposed: row.try_get("delivery_proposed_email_sent").map_err(backend)?,
            proposal_accepted: row.try_get("proposal_accepted_email_sent").map_err(backend)?,
            proposal_rejected: row.try_get("proposal_rejected_email_sent").map_err(backend)?,
            satisfaction_survey: row.try_get("satisfaction_survey_email_sent").map_err(backend)?,
        },
        notification_log: json(row, "notification_log")?,
        version: row.try_get("version").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        delivered_at: row.try_get("delivered_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
    })
}

fn flag_column(kind: NotificationKind) -> Option<&'static str> {
    match kind {
        NotificationKind::OrderPlaced => Some("order_placed_email_sent"),
        NotificationKind::DeliveryConfirmed => Some("delivery_confirmed_email_sent"),
        NotificationKind::DeliveryProposed => Some("delivery_proposed_email_sent"),
        NotificationKind::ProposalAccepted => Some("proposal_accepted_email_sent"),
        NotificationKind::ProposalRejected => Some("proposal_rejected_email_sent"),
        NotificationKind::SatisfactionSurvey => Some("satisfaction_survey_email_sent"),
        NotificationKind::InactivityReminder => None,
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        let token = order.validation_token.as_ref();
        let columns = PriceColumns::from(&order.price);
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, customer_id, customer_email, delivery_address, service_id, waste_type_ids,
                duration_days, quote_request, price, base_price, duration_price, delivery_fee,
                total_ht, vat, total_ttc, deposit_total, status, payment_status,
                estimated_delivery_date, confirmed_delivery_date, proposed_delivery_date,
                client_validation_status, client_validation_token, client_validation_issued_at,
                client_validation_expires_at, client_validation_consumed_at,
                order_placed_email_sent, delivery_confirmed_email_sent, delivery_proposed_email_sent,
                proposal_accepted_email_sent, proposal_rejected_email_sent, satisfaction_survey_email_sent,
                notification_log, version, created_at, updated_at, delivered_at, completed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19,
                $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, $36,
                $37, $38
            )
            "#,
        )
        .bind(order.id)
        .bind(&order.customer_id)
        .bind(order.customer_email.expose())
        .bind(to_json(&order.delivery_address)?)
        .bind(order.service_id)
        .bind(&order.waste_type_ids)
        .bind(order.duration_days as i32)
        .bind(to_json(&order.quote_request)?)
        .bind(to_json(&order.price)?)
        .bind(columns.base_price)
        .bind(columns.duration_price)
        .bind(columns.delivery_fee)
        .bind(columns.total_ht)
        .bind(columns.vat)
        .bind(columns.total_ttc)
        .bind(columns.deposit_total)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.estimated_delivery_date)
        .bind(order.confirmed_delivery_date)
        .bind(order.proposed_delivery_date)
        .bind(order.client_validation_status.map(|s| s.as_str()))
        .bind(token.map(|t| t.token.as_str()))
        .bind(token.map(|t| t.issued_at))
        .bind(token.map(|t| t.expires_at))
        .bind(token.and_then(|t| t.consumed_at))
        .bind(order.email_flags.order_placed)
        .bind(order.email_flags.delivery_confirmed)
        .bind(order.email_flags.delivery_proposed)
        .bind(order.email_flags.proposal_accepted)
        .bind(order.email_flags.proposal_rejected)
        .bind(order.email_flags.satisfaction_survey)
        .bind(to_json(&order.notification_log)?)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.delivered_at)
        .bind(order.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE client_validation_token = $1");
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at DESC");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn compare_and_swap(
        &self,
        expected_status: OrderStatus,
        expected_version: i64,
        next: &Order,
    ) -> StoreResult<bool> {
        let token = next.validation_token.as_ref();
        let columns = PriceColumns::from(&next.price);
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                price = $4,
                base_price = $5,
                duration_price = $6,
                delivery_fee = $7,
                total_ht = $8,
                vat = $9,
                total_ttc = $10,
                deposit_total = $11,
                status = $12,
                confirmed_delivery_date = $13,
                proposed_delivery_date = $14,
                client_validation_status = $15,
                client_validation_token = $16,
                client_validation_issued_at = $17,
                client_validation_expires_at = $18,
                client_validation_consumed_at = $19,
                order_placed_email_sent = $20,
                delivery_confirmed_email_sent = $21,
                delivery_proposed_email_sent = $22,
                proposal_accepted_email_sent = $23,
                proposal_rejected_email_sent = $24,
                satisfaction_survey_email_sent = $25,
                version = $26,
                updated_at = $27,
                delivered_at = $28,
                completed_at = $29
            WHERE id = $1 AND status = $2 AND version = $3
            "#,
        )
        .bind(next.id)
        .bind(expected_status.as_str())
        .bind(expected_version)
        .bind(to_json(&next.price)?)
        .bind(columns.base_price)
        .bind(columns.duration_price)
        .bind(columns.delivery_fee)
        .bind(columns.total_ht)
        .bind(columns.vat)
        .bind(columns.total_ttc)
        .bind(columns.deposit_total)
        .bind(next.status.as_str())
        .bind(next.confirmed_delivery_date)
        .bind(next.proposed_delivery_date)
        .bind(next.client_validation_status.map(|s| s.as_str()))
        .bind(token.map(|t| t.token.as_str()))
        .bind(token.map(|t| t.issued_at))
        .bind(token.map(|t| t.expires_at))
        .bind(token.and_then(|t| t.consumed_at))
        .bind(next.email_flags.order_placed)
        .bind(next.email_flags.delivery_confirmed)
        .bind(next.email_flags.delivery_proposed)
        .bind(next.email_flags.proposal_accepted)
        .bind(next.email_flags.proposal_rejected)
        .bind(next.email_flags.satisfaction_survey)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(next.delivered_at)
        .bind(next.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE orders SET payment_status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_notification(&self, id: Uuid, attempt: &NotificationAttempt) -> StoreResult<bool> {
        let entry = to_json(&vec![attempt])?;
        let sent = attempt.outcome == NotificationOutcome::Sent;
        let query = match flag_column(attempt.kind) {
            Some(column) => sqlx::query(&format!(
                "UPDATE orders SET notification_log = notification_log || $2, {column} = ({column} OR $3) WHERE id = $1"
            ))
            .bind(id)
            .bind(entry)
            .bind(sent)
            .execute(&self.pool)
            .await,
            None => sqlx::query("UPDATE orders SET notification_log = notification_log || $2 WHERE id = $1")
                .bind(id)
                .bind(entry)
                .execute(&self.pool)
                .await,
        };
        let result = query.map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }
}

pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn customer_from_row(row: &PgRow) -> StoreResult<Customer> {
    Ok(Customer {
        id: row.try_get("id").map_err(backend)?,
        email: Masked::new(row.try_get("email").map_err(backend)?),
        last_active_at: row.try_get("last_active_at").map_err(backend)?,
        inactivity_notified_at: row.try_get("inactivity_notified_at").map_err(backend)?,
    })
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    async fn upsert(&self, id: &str, email: &Masked<String>, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, email, last_active_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email,
                last_active_at = EXCLUDED.last_active_at,
                inactivity_notified_at = NULL
            "#,
        )
        .bind(id)
        .bind(email.expose())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Customer>> {
        let row = sqlx::query("SELECT id, email, last_active_at, inactivity_notified_at FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(customer_from_row).transpose()
    }

    async fn list_inactive_unnotified(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Customer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, last_active_at, inactivity_notified_at
            FROM customers
            WHERE last_active_at < $1 AND inactivity_notified_at IS NULL
            ORDER BY last_active_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(customer_from_row).collect()
    }

    async fn mark_inactivity_notified(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE customers SET inactivity_notified_at = $2 WHERE id = $1 AND inactivity_notified_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }
}
