use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use skiprent_catalog::{PriceBreakdown, QuoteRequest};
use skiprent_core::PaymentStatus;
use skiprent_shared::Masked;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order status in the delivery negotiation lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    DateProposed,
    Confirmed,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::DateProposed => "DATE_PROPOSED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Edges of the lifecycle graph
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, next),
            (Pending, Confirmed)
                | (Pending, DateProposed)
                | (Pending, Cancelled)
                | (DateProposed, DateProposed)
                | (DateProposed, Confirmed)
                | (DateProposed, Pending)
                | (DateProposed, Cancelled)
                | (Confirmed, Delivered)
                | (Confirmed, Cancelled)
                | (Delivered, Completed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "DATE_PROPOSED" => Ok(OrderStatus::DateProposed),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

/// Client answer to the latest delivery date proposal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientValidationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ClientValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientValidationStatus::Pending => "PENDING",
            ClientValidationStatus::Accepted => "ACCEPTED",
            ClientValidationStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for ClientValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ClientValidationStatus::Pending),
            "ACCEPTED" => Ok(ClientValidationStatus::Accepted),
            "REJECTED" => Ok(ClientValidationStatus::Rejected),
            other => Err(format!("unknown client validation status {other}")),
        }
    }
}

/// `action` query parameter of the emailed link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Accept,
    Reject,
}

impl ClientAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAction::Accept => "accept",
            ClientAction::Reject => "reject",
        }
    }
}

/// Single-use credential for one order and one pending proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryValidationToken {
    pub order_id: Uuid,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl DeliveryValidationToken {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryAddress {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    #[serde(default)]
    pub access_notes: Option<String>,
}

/// Emails the order can ask for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    DeliveryConfirmed,
    DeliveryProposed,
    ProposalAccepted,
    ProposalRejected,
    SatisfactionSurvey,
    /// Customer-level; never tracked on an order
    InactivityReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderPlaced => "order_placed",
            NotificationKind::DeliveryConfirmed => "delivery_confirmed",
            NotificationKind::DeliveryProposed => "delivery_proposed",
            NotificationKind::ProposalAccepted => "proposal_accepted",
            NotificationKind::ProposalRejected => "proposal_rejected",
            NotificationKind::SatisfactionSurvey => "satisfaction_survey",
            NotificationKind::InactivityReminder => "inactivity_reminder",
        }
    }

    pub fn template(&self) -> &'static str {
        match self {
            NotificationKind::OrderPlaced => "order-confirmation",
            NotificationKind::DeliveryConfirmed => "delivery-date-confirmed",
            NotificationKind::DeliveryProposed => "delivery-date-proposal",
            NotificationKind::ProposalAccepted => "admin-proposal-accepted",
            NotificationKind::ProposalRejected => "admin-proposal-rejected",
            NotificationKind::SatisfactionSurvey => "satisfaction-survey",
            NotificationKind::InactivityReminder => "inactivity-reminder",
        }
    }

    /// Who reads the email: client answers are reported to the back office
    pub fn audience(&self) -> Audience {
        match self {
            NotificationKind::ProposalAccepted | NotificationKind::ProposalRejected => Audience::BackOffice,
            _ => Audience::Customer,
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_placed" => Ok(NotificationKind::OrderPlaced),
            "delivery_confirmed" => Ok(NotificationKind::DeliveryConfirmed),
            "delivery_proposed" => Ok(NotificationKind::DeliveryProposed),
            "proposal_accepted" => Ok(NotificationKind::ProposalAccepted),
            "proposal_rejected" => Ok(NotificationKind::ProposalRejected),
            "satisfaction_survey" => Ok(NotificationKind::SatisfactionSurvey),
            "inactivity_reminder" => Ok(NotificationKind::InactivityReminder),
            other => Err(format!("unknown notification kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Audience {
    Customer,
    BackOffice,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Customer => "CUSTOMER",
            Audience::BackOffice => "BACK_OFFICE",
        }
    }
}

/// One "*EmailSent" boolean per order-level notification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailFlags {
    pub order_placed: bool,
    pub delivery_confirmed: bool,
    pub delivery_proposed: bool,
    pub proposal_accepted: bool,
    pub proposal_rejected: bool,
    pub satisfaction_survey: bool,
}

impl EmailFlags {
    pub fn get(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::OrderPlaced => self.order_placed,
            NotificationKind::DeliveryConfirmed => self.delivery_confirmed,
            NotificationKind::DeliveryProposed => self.delivery_proposed,
            NotificationKind::ProposalAccepted => self.proposal_accepted,
            NotificationKind::ProposalRejected => self.proposal_rejected,
            NotificationKind::SatisfactionSurvey => self.satisfaction_survey,
            NotificationKind::InactivityReminder => false,
        }
    }

    pub fn set(&mut self, kind: NotificationKind, sent: bool) {
        match kind {
            NotificationKind::OrderPlaced => self.order_placed = sent,
            NotificationKind::DeliveryConfirmed => self.delivery_confirmed = sent,
            NotificationKind::DeliveryProposed => self.delivery_proposed = sent,
            NotificationKind::ProposalAccepted => self.proposal_accepted = sent,
            NotificationKind::ProposalRejected => self.proposal_rejected = sent,
            NotificationKind::SatisfactionSurvey => self.satisfaction_survey = sent,
            NotificationKind::InactivityReminder => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationOutcome {
    Sent,
    Failed { reason: String },
}

/// Append-only record of each dispatch attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationAttempt {
    pub kind: NotificationKind,
    pub attempted_at: DateTime<Utc>,
    pub outcome: NotificationOutcome,
}

/// Checkout payload, guest or authenticated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// None for guest checkout
    #[serde(default)]
    pub customer_id: Option<String>,
    pub customer_email: String,
    pub delivery_address: DeliveryAddress,
    #[serde(default)]
    pub estimated_delivery_date: Option<NaiveDate>,
    pub quote: QuoteRequest,
}

/// The order under negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Option<String>,
    pub customer_email: Masked<String>,
    pub delivery_address: DeliveryAddress,
    pub service_id: Uuid,
    pub waste_type_ids: Vec<Uuid>,
    pub duration_days: u32,
    pub quote_request: QuoteRequest,
    pub price: PriceBreakdown,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub estimated_delivery_date: Option<NaiveDate>,
    pub confirmed_delivery_date: Option<NaiveDate>,
    pub proposed_delivery_date: Option<NaiveDate>,
    pub client_validation_status: Option<ClientValidationStatus>,
    pub validation_token: Option<DeliveryValidationToken>,
    pub email_flags: EmailFlags,
    pub notification_log: Vec<NotificationAttempt>,
    /// Bumped on every lifecycle write; the compare-and-set key
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(checkout: &CheckoutRequest, price: PriceBreakdown, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id: checkout.customer_id.clone(),
            customer_email: Masked::new(checkout.customer_email.trim().to_string()),
            delivery_address: checkout.delivery_address.clone(),
            service_id: checkout.quote.service_id,
            waste_type_ids: checkout.quote.waste_type_ids(),
            duration_days: checkout.quote.duration_days,
            quote_request: checkout.quote.clone(),
            price,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            estimated_delivery_date: checkout.estimated_delivery_date,
            confirmed_delivery_date: None,
            proposed_delivery_date: None,
            client_validation_status: None,
            validation_token: None,
            email_flags: EmailFlags::default(),
            notification_log: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            completed_at: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.customer_id.is_none()
    }

    /// Apply a dispatch result the same way the repository does
    pub fn record_notification(&mut self, attempt: NotificationAttempt) {
        if attempt.outcome == NotificationOutcome::Sent {
            self.email_flags.set(attempt.kind, true);
        }
        self.notification_log.push(attempt);
    }
}
