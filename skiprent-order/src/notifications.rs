use crate::models::{Audience, NotificationKind, Order};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skiprent_shared::Masked;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// An email the lifecycle wants sent. The dispatcher resolves the template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationIntent {
    pub kind: NotificationKind,
    pub order_id: Option<Uuid>,
    pub audience: Audience,
    /// None for back-office mail; the transport knows the staff mailbox
    pub recipient: Option<Masked<String>>,
    pub variables: BTreeMap<String, String>,
}

impl NotificationIntent {
    pub fn for_order(kind: NotificationKind, order: &Order) -> Self {
        let audience = kind.audience();
        let recipient = match audience {
            Audience::Customer => Some(order.customer_email.clone()),
            Audience::BackOffice => None,
        };

        let mut variables = BTreeMap::new();
        variables.insert("order_id".to_string(), order.id.to_string());
        variables.insert("total_ttc".to_string(), order.price.total_ttc.to_string());
        if let Some(date) = order.confirmed_delivery_date {
            variables.insert("confirmed_delivery_date".to_string(), date.to_string());
        }
        if let Some(date) = order.proposed_delivery_date {
            variables.insert("proposed_delivery_date".to_string(), date.to_string());
        }

        Self {
            kind,
            order_id: Some(order.id),
            audience,
            recipient,
            variables,
        }
    }

    pub fn with_variable(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }
}

/// Outbound email transport
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), DispatchError>;
}

/// Logs instead of sending. Used when no broker is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), DispatchError> {
        tracing::info!(
            kind = intent.kind.as_str(),
            template = intent.kind.template(),
            order_id = ?intent.order_id,
            recipient = ?intent.recipient,
            "Notification requested"
        );
        Ok(())
    }
}

/// Records every intent; can be switched to fail
#[derive(Default)]
pub struct MockNotificationDispatcher {
    sent: Mutex<Vec<NotificationIntent>>,
    failing: AtomicBool,
}

impl MockNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<NotificationIntent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_of(&self, kind: NotificationKind) -> Vec<NotificationIntent> {
        self.sent().into_iter().filter(|i| i.kind == kind).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for MockNotificationDispatcher {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("mock transport down".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(intent.clone());
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Notification could not be encoded: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_back_office_mail_has_no_customer_recipient() {
        let order = fixtures::order().await;

        let customer = NotificationIntent::for_order(NotificationKind::OrderPlaced, &order);
        assert_eq!(customer.audience, Audience::Customer);
        assert_eq!(customer.recipient.as_ref().map(|r| r.expose().as_str()), Some("client@example.com"));

        let staff = NotificationIntent::for_order(NotificationKind::ProposalRejected, &order);
        assert_eq!(staff.audience, Audience::BackOffice);
        assert!(staff.recipient.is_none());
        assert_eq!(staff.variables["order_id"], order.id.to_string());
    }

    #[tokio::test]
    async fn test_mock_dispatcher_failure_toggle() {
        let order = fixtures::order().await;
        let dispatcher = MockNotificationDispatcher::new();
        let intent = NotificationIntent::for_order(NotificationKind::OrderPlaced, &order);

        dispatcher.set_failing(true);
        assert!(dispatcher.dispatch(&intent).await.is_err());
        assert!(dispatcher.sent().is_empty());

        dispatcher.set_failing(false);
        dispatcher.dispatch(&intent).await.unwrap();
        assert_eq!(dispatcher.sent_of(NotificationKind::OrderPlaced).len(), 1);
    }
}
