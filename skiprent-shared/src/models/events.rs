use uuid::Uuid;

/// Published for the external mailer whenever an email is wanted.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct NotificationRequestedEvent {
    /// None for customer-level mail such as the inactivity reminder
    pub order_id: Option<Uuid>,
    pub kind: String,
    pub audience: String,
    /// None when the mail goes to the back office mailbox
    pub recipient: Option<String>,
    pub template: String,
    pub variables: serde_json::Value,
    pub timestamp: i64,
}

/// Audit trail of committed lifecycle writes
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderTransitionedEvent {
    pub order_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub actor: String,
    pub version: i64,
    pub timestamp: i64,
}
