use crate::models::{NotificationAttempt, Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiprent_core::{PaymentStatus, StoreResult};
use skiprent_shared::Masked;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence for orders.
///
/// Every lifecycle write goes through [`OrderRepository::compare_and_swap`]: the
/// stored row is replaced only if it still carries the expected status and
/// version. Payment status and notification bookkeeping are side channels
/// that never bump the version.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Look an order up by the value of its current validation token
    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Order>>;

    async fn list(&self) -> StoreResult<Vec<Order>>;

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>>;

    /// Write `next` iff the stored order is still at `expected_status` and
    /// `expected_version`. Returns false when another writer got there first.
    /// Payment status and the notification log are left as stored.
    async fn compare_and_swap(
        &self,
        expected_status: OrderStatus,
        expected_version: i64,
        next: &Order,
    ) -> StoreResult<bool>;

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Append to the notification log; a `Sent` outcome also raises the matching flag
    async fn record_notification(&self, id: Uuid, attempt: &NotificationAttempt) -> StoreResult<bool>;

    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> StoreResult<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.validation_token.as_ref().is_some_and(|t| t.token == token))
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn compare_and_swap(
        &self,
        expected_status: OrderStatus,
        expected_version: i64,
        next: &Order,
    ) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&next.id) {
            Some(current) if current.status == expected_status && current.version == expected_version => {
                // Side channels are written outside the swap
                let mut stored = next.clone();
                stored.payment_status = current.payment_status;
                stored.notification_log = std::mem::take(&mut current.notification_log);
                *current = stored;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) => {
                order.payment_status = status;
                order.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_notification(&self, id: Uuid, attempt: &NotificationAttempt) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) => {
                order.record_notification(attempt.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.orders.write().await.remove(&id).is_some())
    }
}

/// Registered customer, tracked for the inactivity reminder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Masked<String>,
    pub last_active_at: DateTime<Utc>,
    pub inactivity_notified_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Create the customer or refresh their email and activity timestamp
    async fn upsert(&self, id: &str, email: &Masked<String>, at: DateTime<Utc>) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Customer>>;

    /// Customers idle since before `cutoff` who were not reminded since
    async fn list_inactive_unnotified(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Customer>>;

    /// Conditional: only succeeds for a customer still unreminded
    async fn mark_inactivity_notified(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool>;
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<HashMap<String, Customer>>,
}

impl InMemoryCustomerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn upsert(&self, id: &str, email: &Masked<String>, at: DateTime<Utc>) -> StoreResult<()> {
        let mut customers = self.customers.write().await;
        customers
            .entry(id.to_string())
            .and_modify(|c| {
                c.email = email.clone();
                c.last_active_at = at;
                c.inactivity_notified_at = None;
            })
            .or_insert_with(|| Customer {
                id: id.to_string(),
                email: email.clone(),
                last_active_at: at,
                inactivity_notified_at: None,
            });
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.customers.read().await.get(id).cloned())
    }

    async fn list_inactive_unnotified(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Customer>> {
        Ok(self
            .customers
            .read()
            .await
            .values()
            .filter(|c| c.last_active_at < cutoff && c.inactivity_notified_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_inactivity_notified(&self, id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut customers = self.customers.write().await;
        match customers.get_mut(id) {
            Some(c) if c.inactivity_notified_at.is_none() => {
                c.inactivity_notified_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
