use crate::error::{OrderError, OrderResult};
use crate::models::{
    ClientAction, ClientValidationStatus, CheckoutRequest, NotificationAttempt, NotificationKind, NotificationOutcome,
    Order, OrderStatus,
};
use crate::notifications::{NotificationDispatcher, NotificationIntent};
use crate::repository::{CustomerRepository, OrderRepository};
use crate::transitions::{self, Transition};
use crate::validation::{ValidationTokenManager, DEFAULT_TOKEN_TTL_DAYS};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use skiprent_catalog::{PriceBreakdown, PriceCalculator, QuoteRequest, TariffCatalog};
use skiprent_core::money::DEFAULT_VAT_RATE;
use skiprent_core::{Clock, PaymentStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const ACTOR_ADMIN: &str = "admin";
pub const ACTOR_CLIENT: &str = "client";

/// Observer of committed writes, called once per successful CAS
#[async_trait]
pub trait TransitionListener: Send + Sync {
    async fn on_transition(&self, order: &Order, from: OrderStatus, actor: &str);
}

/// Tunables read from `business_rules`
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub vat_rate: Decimal,
    pub token_ttl_days: i64,
    pub public_base_url: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            vat_rate: DEFAULT_VAT_RATE,
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            public_base_url: "http://localhost:3000/v1".to_string(),
        }
    }
}

/// Result of an explicit re-pricing
#[derive(Debug, Clone, Serialize)]
pub struct RequoteOutcome {
    pub order: Order,
    pub previous: PriceBreakdown,
    pub changed: bool,
}

/// Drives orders through checkout and the delivery date negotiation.
///
/// Every write is conditional on the status and version that were read, so of
/// two concurrent commands on the same order exactly one lands; the other gets
/// `StaleState`. Notifications go out after the write is committed and their
/// outcome is recorded on the side.
pub struct OrderLifecycle {
    orders: Arc<dyn OrderRepository>,
    customers: Arc<dyn CustomerRepository>,
    catalog: Arc<dyn TariffCatalog>,
    calculator: PriceCalculator,
    tokens: ValidationTokenManager,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl OrderLifecycle {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        customers: Arc<dyn CustomerRepository>,
        catalog: Arc<dyn TariffCatalog>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        let tokens = ValidationTokenManager::new(
            orders.clone(),
            clock.clone(),
            settings.token_ttl_days,
            settings.public_base_url,
        );
        Self {
            orders,
            customers,
            catalog,
            calculator: PriceCalculator::new(settings.vat_rate),
            tokens,
            dispatcher,
            clock,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    pub fn tokens(&self) -> &ValidationTokenManager {
        &self.tokens
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Same code path as checkout, without persisting anything
    pub async fn quote(&self, request: &QuoteRequest) -> OrderResult<PriceBreakdown> {
        Ok(self.calculator.quote(self.catalog.as_ref(), request).await?)
    }

    pub async fn place_order(&self, checkout: CheckoutRequest) -> OrderResult<Order> {
        validate_checkout(&checkout, self.clock.now())?;

        let price = self.quote(&checkout.quote).await?;
        let now = self.clock.now();
        let mut order = Order::new(&checkout, price, now);
        if let Some(customer_id) = &order.customer_id {
            self.customers.upsert(customer_id, &order.customer_email, now).await?;
        }
        self.orders.insert(&order).await?;

        info!(
            order_id = %order.id,
            guest = order.is_guest(),
            total_ttc = %order.price.total_ttc,
            "Order placed"
        );

        self.notify(NotificationKind::OrderPlaced, &mut order).await;
        Ok(order)
    }

    pub async fn get_order(&self, id: Uuid) -> OrderResult<Order> {
        self.orders.get(id).await?.ok_or(OrderError::NotFound(id))
    }

    pub async fn list_orders(&self, status: Option<OrderStatus>) -> OrderResult<Vec<Order>> {
        Ok(match status {
            Some(status) => self.orders.list_by_status(status).await?,
            None => self.orders.list().await?,
        })
    }

    pub async fn confirm_delivery_date(
        &self,
        id: Uuid,
        date: NaiveDate,
        expected: Option<OrderStatus>,
    ) -> OrderResult<Order> {
        self.apply(id, expected, |order, now| transitions::confirm_date(order, date, now))
            .await
    }

    pub async fn propose_delivery_date(
        &self,
        id: Uuid,
        date: NaiveDate,
        expected: Option<OrderStatus>,
    ) -> OrderResult<Order> {
        self.apply(id, expected, |order, now| {
            let token = self.tokens.issue(order.id);
            transitions::propose_date(order, date, token, now)
        })
        .await
    }

    /// Token redemption from the emailed link
    pub async fn client_respond(&self, token: &str, action: ClientAction) -> OrderResult<Order> {
        let transition = self.tokens.consume(token, action).await?;
        info!(
            order_id = %transition.order.id,
            action = action.as_str(),
            "Delivery proposal answered"
        );
        Ok(self.after_commit(transition, ACTOR_CLIENT).await)
    }

    pub async fn mark_delivered(&self, id: Uuid, expected: Option<OrderStatus>) -> OrderResult<Order> {
        self.apply(id, expected, transitions::mark_delivered).await
    }

    pub async fn mark_completed(&self, id: Uuid, expected: Option<OrderStatus>) -> OrderResult<Order> {
        self.apply(id, expected, transitions::mark_completed).await
    }

    pub async fn cancel(&self, id: Uuid, expected: Option<OrderStatus>) -> OrderResult<Order> {
        self.apply(id, expected, transitions::cancel).await
    }

    /// Re-price from the stored quote request against today's tariffs
    pub async fn requote(&self, id: Uuid, expected: Option<OrderStatus>) -> OrderResult<RequoteOutcome> {
        let current = self.load(id, expected).await?;
        let price = self.quote(&current.quote_request).await?;
        let previous = current.price.clone();
        let changed = price != previous;

        let transition = transitions::requote(&current, price, self.clock.now())?;
        let order = self.commit(transition).await?;
        info!(order_id = %id, changed, total_ttc = %order.price.total_ttc, "Order re-quoted");

        Ok(RequoteOutcome { order, previous, changed })
    }

    /// Payment gateway callback. Never gates or bumps the lifecycle.
    pub async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> OrderResult<Order> {
        if !self.orders.set_payment_status(id, status, self.clock.now()).await? {
            return Err(OrderError::NotFound(id));
        }
        info!(order_id = %id, payment_status = status.as_str(), "Payment status updated");
        self.get_order(id).await
    }

    /// Irreversible. The order's token goes with it.
    pub async fn delete_order(&self, id: Uuid) -> OrderResult<()> {
        if !self.orders.delete(id).await? {
            return Err(OrderError::NotFound(id));
        }
        warn!(order_id = %id, "Order deleted");
        Ok(())
    }

    /// Send an order email again without replaying its transition
    pub async fn resend_notification(&self, id: Uuid, kind: NotificationKind) -> OrderResult<Order> {
        let mut order = self.get_order(id).await?;
        if order.email_flags.get(kind) {
            return Err(OrderError::InvalidInput(format!(
                "{} was already sent for order {}",
                kind.as_str(),
                id
            )));
        }
        resend_allowed(&order, kind, self.clock.now())?;

        self.notify(kind, &mut order).await;
        Ok(order)
    }

    /// Dispatch `kind` for `order` and record the attempt on it
    pub async fn notify(&self, kind: NotificationKind, order: &mut Order) -> NotificationOutcome {
        let intent = self.intent_for(kind, order);
        let outcome = match self.dispatcher.dispatch(&intent).await {
            Ok(()) => NotificationOutcome::Sent,
            Err(e) => {
                warn!(order_id = %order.id, kind = kind.as_str(), error = %e, "Notification failed");
                NotificationOutcome::Failed { reason: e.to_string() }
            }
        };

        let attempt = NotificationAttempt {
            kind,
            attempted_at: self.clock.now(),
            outcome: outcome.clone(),
        };
        match self.orders.record_notification(order.id, &attempt).await {
            Ok(true) => {}
            Ok(false) => warn!(order_id = %order.id, "Order vanished before notification was recorded"),
            Err(e) => warn!(order_id = %order.id, error = %e, "Failed to record notification"),
        }
        order.record_notification(attempt);
        outcome
    }

    fn intent_for(&self, kind: NotificationKind, order: &Order) -> NotificationIntent {
        let intent = NotificationIntent::for_order(kind, order);
        match (kind, order.validation_token.as_ref()) {
            (NotificationKind::DeliveryProposed, Some(token)) => intent
                .with_variable("accept_url", self.tokens.link(&token.token, ClientAction::Accept))
                .with_variable("reject_url", self.tokens.link(&token.token, ClientAction::Reject))
                .with_variable("expires_at", token.expires_at.to_rfc3339()),
            _ => intent,
        }
    }

    async fn load(&self, id: Uuid, expected: Option<OrderStatus>) -> OrderResult<Order> {
        let order = self.get_order(id).await?;
        match expected {
            Some(expected) if expected != order.status => Err(OrderError::StaleState {
                expected,
                actual: order.status,
            }),
            _ => Ok(order),
        }
    }

    async fn apply<F>(&self, id: Uuid, expected: Option<OrderStatus>, build: F) -> OrderResult<Order>
    where
        F: FnOnce(&Order, DateTime<Utc>) -> OrderResult<Transition>,
    {
        let current = self.load(id, expected).await?;
        let transition = build(&current, self.clock.now())?;
        let from = transition.from;
        let order = self.commit(transition).await?;
        info!(order_id = %id, from = from.as_str(), to = order.status.as_str(), "Order transitioned");
        Ok(order)
    }

    async fn commit(&self, transition: Transition) -> OrderResult<Order> {
        let id = transition.order.id;
        if !self
            .orders
            .compare_and_swap(transition.from, transition.from_version, &transition.order)
            .await?
        {
            let actual = self.get_order(id).await?.status;
            warn!(order_id = %id, expected = transition.from.as_str(), actual = actual.as_str(), "Stale order write");
            return Err(OrderError::StaleState {
                expected: transition.from,
                actual,
            });
        }
        Ok(self.after_commit(transition, ACTOR_ADMIN).await)
    }

    async fn after_commit(&self, transition: Transition, actor: &str) -> Order {
        let mut order = transition.order;
        if let Some(listener) = &self.listener {
            listener.on_transition(&order, transition.from, actor).await;
        }
        if let Some(kind) = transition.notification {
            self.notify(kind, &mut order).await;
        }
        order
    }
}

fn validate_checkout(checkout: &CheckoutRequest, now: DateTime<Utc>) -> OrderResult<()> {
    let email = checkout.customer_email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(OrderError::InvalidInput("customer_email is not a valid address".to_string()));
    }
    let address = &checkout.delivery_address;
    if address.street.trim().is_empty() || address.postal_code.trim().is_empty() || address.city.trim().is_empty() {
        return Err(OrderError::InvalidInput("delivery address is incomplete".to_string()));
    }
    if let Some(date) = checkout.estimated_delivery_date {
        if date < now.date_naive() {
            return Err(OrderError::InvalidInput(format!(
                "estimated delivery date {date} is in the past"
            )));
        }
    }
    Ok(())
}

/// A resend only makes sense for an email the order has actually reached
fn resend_allowed(order: &Order, kind: NotificationKind, now: DateTime<Utc>) -> OrderResult<()> {
    let reached = match kind {
        NotificationKind::OrderPlaced => true,
        NotificationKind::DeliveryConfirmed => order.confirmed_delivery_date.is_some(),
        NotificationKind::DeliveryProposed => {
            let live = order
                .validation_token
                .as_ref()
                .is_some_and(|t| !t.is_consumed() && !t.is_expired(now));
            if order.status != OrderStatus::DateProposed || !live {
                return Err(OrderError::IllegalTransition {
                    from: order.status,
                    to: OrderStatus::DateProposed,
                });
            }
            true
        }
        NotificationKind::ProposalAccepted => {
            order.client_validation_status == Some(ClientValidationStatus::Accepted)
        }
        NotificationKind::ProposalRejected => {
            order.client_validation_status == Some(ClientValidationStatus::Rejected)
        }
        NotificationKind::SatisfactionSurvey => order.status == OrderStatus::Completed,
        NotificationKind::InactivityReminder => false,
    };
    if reached {
        Ok(())
    } else {
        Err(OrderError::InvalidInput(format!(
            "{} does not apply to order {} in status {}",
            kind.as_str(),
            order.id,
            order.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Tariffs};
    use crate::notifications::MockNotificationDispatcher;
    use crate::repository::{InMemoryCustomerRepository, InMemoryOrderRepository};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use skiprent_catalog::RentalPricing;
    use skiprent_core::ManualClock;

    struct Harness {
        tariffs: Tariffs,
        clock: Arc<ManualClock>,
        dispatcher: Arc<MockNotificationDispatcher>,
        customers: Arc<InMemoryCustomerRepository>,
        lifecycle: OrderLifecycle,
    }

    /// Yields after every read so joined commands interleave
    #[derive(Default)]
    struct YieldingRepository {
        inner: InMemoryOrderRepository,
    }

    #[async_trait::async_trait]
    impl OrderRepository for YieldingRepository {
        async fn insert(&self, order: &Order) -> skiprent_core::StoreResult<()> {
            self.inner.insert(order).await
        }

        async fn get(&self, id: Uuid) -> skiprent_core::StoreResult<Option<Order>> {
            let order = self.inner.get(id).await;
            tokio::task::yield_now().await;
            order
        }

        async fn find_by_token(&self, token: &str) -> skiprent_core::StoreResult<Option<Order>> {
            let order = self.inner.find_by_token(token).await;
            tokio::task::yield_now().await;
            order
        }

        async fn list(&self) -> skiprent_core::StoreResult<Vec<Order>> {
            self.inner.list().await
        }

        async fn list_by_status(&self, status: OrderStatus) -> skiprent_core::StoreResult<Vec<Order>> {
            self.inner.list_by_status(status).await
        }

        async fn compare_and_swap(
            &self,
            expected_status: OrderStatus,
            expected_version: i64,
            next: &Order,
        ) -> skiprent_core::StoreResult<bool> {
            self.inner.compare_and_swap(expected_status, expected_version, next).await
        }

        async fn set_payment_status(
            &self,
            id: Uuid,
            status: PaymentStatus,
            at: DateTime<Utc>,
        ) -> skiprent_core::StoreResult<bool> {
            self.inner.set_payment_status(id, status, at).await
        }

        async fn record_notification(
            &self,
            id: Uuid,
            attempt: &NotificationAttempt,
        ) -> skiprent_core::StoreResult<bool> {
            self.inner.record_notification(id, attempt).await
        }

        async fn delete(&self, id: Uuid) -> skiprent_core::StoreResult<bool> {
            self.inner.delete(id).await
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryOrderRepository::new()))
    }

    fn harness_with(orders: Arc<dyn OrderRepository>) -> Harness {
        let tariffs = fixtures::tariffs();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = Arc::new(MockNotificationDispatcher::new());
        let customers = Arc::new(InMemoryCustomerRepository::new());
        let lifecycle = OrderLifecycle::new(
            orders,
            customers.clone(),
            tariffs.catalog.clone(),
            dispatcher.clone(),
            clock.clone(),
            LifecycleSettings::default(),
        );
        Harness {
            tariffs,
            clock,
            dispatcher,
            customers,
            lifecycle,
        }
    }

    impl Harness {
        async fn place(&self) -> Order {
            self.lifecycle.place_order(fixtures::checkout(&self.tariffs)).await.unwrap()
        }

        fn in_days(&self, days: i64) -> NaiveDate {
            (self.clock.now() + Duration::days(days)).date_naive()
        }

        fn last_token(&self) -> String {
            let proposal = self
                .dispatcher
                .sent_of(NotificationKind::DeliveryProposed)
                .pop()
                .expect("proposal sent");
            let url = proposal.variables["accept_url"].clone();
            let start = url.find("token=").unwrap() + "token=".len();
            let end = url[start..].find('&').unwrap() + start;
            url[start..end].to_string()
        }
    }

    #[tokio::test]
    async fn test_place_order_prices_and_notifies() {
        let h = harness();
        let order = h.place().await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        // 7 days * 15 + max(20km * 1.5 * 2, 30) + 2t * 50
        assert_eq!(order.price.total_ht, dec!(265));
        assert_eq!(order.price.vat, dec!(53));
        assert_eq!(order.price.deposit_total, dec!(300));
        assert!(order.email_flags.order_placed);
        assert_eq!(h.dispatcher.sent_of(NotificationKind::OrderPlaced).len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_validation() {
        let h = harness();
        let mut checkout = fixtures::checkout(&h.tariffs);
        checkout.customer_email = "not-an-email".to_string();
        assert!(matches!(
            h.lifecycle.place_order(checkout).await,
            Err(OrderError::InvalidInput(_))
        ));

        let mut checkout = fixtures::checkout(&h.tariffs);
        checkout.quote.service_id = Uuid::new_v4();
        assert!(matches!(
            h.lifecycle.place_order(checkout).await,
            Err(OrderError::Pricing(skiprent_catalog::PricingError::ServiceNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_authenticated_checkout_tracks_customer() {
        let h = harness();
        let mut checkout = fixtures::checkout(&h.tariffs);
        checkout.customer_id = Some("cust-42".to_string());
        h.lifecycle.place_order(checkout).await.unwrap();

        let customer = h.customers.get("cust-42").await.unwrap().unwrap();
        assert_eq!(customer.last_active_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_propose_accept_flow() {
        let h = harness();
        let order = h.place().await;

        let proposed = h
            .lifecycle
            .propose_delivery_date(order.id, h.in_days(3), Some(OrderStatus::Pending))
            .await
            .unwrap();
        assert_eq!(proposed.status, OrderStatus::DateProposed);
        assert!(proposed.email_flags.delivery_proposed);

        let token = h.last_token();
        assert_eq!(token, proposed.validation_token.as_ref().unwrap().token);

        let confirmed = h.lifecycle.client_respond(&token, ClientAction::Accept).await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(confirmed.confirmed_delivery_date, Some(h.in_days(3)));
        assert_eq!(h.dispatcher.sent_of(NotificationKind::ProposalAccepted).len(), 1);

        assert!(matches!(
            h.lifecycle.client_respond(&token, ClientAction::Accept).await,
            Err(OrderError::TokenAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_rejection_loop_invalidates_old_token() {
        let h = harness();
        let order = h.place().await;

        h.lifecycle.propose_delivery_date(order.id, h.in_days(3), None).await.unwrap();
        let token_a = h.last_token();

        let pending = h.lifecycle.client_respond(&token_a, ClientAction::Reject).await.unwrap();
        assert_eq!(pending.status, OrderStatus::Pending);
        assert_eq!(pending.proposed_delivery_date, None);

        let reproposed = h.lifecycle.propose_delivery_date(order.id, h.in_days(5), None).await.unwrap();
        let token_b = h.last_token();
        assert_ne!(token_a, token_b);
        assert_eq!(reproposed.proposed_delivery_date, Some(h.in_days(5)));

        assert!(matches!(
            h.lifecycle.client_respond(&token_a, ClientAction::Accept).await,
            Err(OrderError::TokenInvalid)
        ));
        let confirmed = h.lifecycle.client_respond(&token_b, ClientAction::Accept).await.unwrap();
        assert_eq!(confirmed.confirmed_delivery_date, Some(h.in_days(5)));
    }

    #[tokio::test]
    async fn test_client_respond_requires_date_proposed() {
        let h = harness();
        let order = h.place().await;
        h.lifecycle.propose_delivery_date(order.id, h.in_days(3), None).await.unwrap();
        let token = h.last_token();

        h.lifecycle.cancel(order.id, None).await.unwrap();
        assert!(matches!(
            h.lifecycle.client_respond(&token, ClientAction::Accept).await,
            Err(OrderError::IllegalTransition { from: OrderStatus::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_confirm_and_cancel() {
        let h = harness_with(Arc::new(YieldingRepository::default()));
        let order = h.place().await;
        let date = h.in_days(2);

        let (confirm, cancel) = tokio::join!(
            h.lifecycle.confirm_delivery_date(order.id, date, None),
            h.lifecycle.cancel(order.id, None),
        );
        assert_eq!([confirm.is_ok(), cancel.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if confirm.is_ok() { cancel } else { confirm };
        assert!(matches!(loser, Err(OrderError::StaleState { expected: OrderStatus::Pending, .. })));

        let stored = h.lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_expected_status_mismatch_is_stale() {
        let h = harness();
        let order = h.place().await;

        let err = h
            .lifecycle
            .mark_delivered(order.id, Some(OrderStatus::Confirmed))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::StaleState {
                expected: OrderStatus::Confirmed,
                actual: OrderStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn test_full_delivery_chain() {
        let h = harness();
        let order = h.place().await;

        h.lifecycle.confirm_delivery_date(order.id, h.in_days(1), None).await.unwrap();
        assert!(matches!(
            h.lifecycle.mark_completed(order.id, None).await,
            Err(OrderError::IllegalTransition { .. })
        ));
        h.lifecycle.mark_delivered(order.id, Some(OrderStatus::Confirmed)).await.unwrap();
        let completed = h.lifecycle.mark_completed(order.id, None).await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        assert!(completed.completed_at.is_some());

        assert!(matches!(
            h.lifecycle.cancel(order.id, None).await,
            Err(OrderError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_makes_token_invalid() {
        let h = harness();
        let order = h.place().await;
        h.lifecycle.propose_delivery_date(order.id, h.in_days(3), None).await.unwrap();
        let token = h.last_token();

        h.lifecycle.delete_order(order.id).await.unwrap();
        assert!(matches!(
            h.lifecycle.client_respond(&token, ClientAction::Accept).await,
            Err(OrderError::TokenInvalid)
        ));
        assert!(matches!(
            h.lifecycle.delete_order(order.id).await,
            Err(OrderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_transition_and_can_be_resent() {
        let h = harness();
        let order = h.place().await;

        h.dispatcher.set_failing(true);
        let confirmed = h.lifecycle.confirm_delivery_date(order.id, h.in_days(2), None).await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert!(!confirmed.email_flags.delivery_confirmed);

        let stored = h.lifecycle.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert!(!stored.email_flags.delivery_confirmed);
        assert!(matches!(
            stored.notification_log.last().map(|a| &a.outcome),
            Some(NotificationOutcome::Failed { .. })
        ));

        h.dispatcher.set_failing(false);
        let resent = h
            .lifecycle
            .resend_notification(order.id, NotificationKind::DeliveryConfirmed)
            .await
            .unwrap();
        assert!(resent.email_flags.delivery_confirmed);
        assert_eq!(resent.version, stored.version);

        assert!(matches!(
            h.lifecycle
                .resend_notification(order.id, NotificationKind::DeliveryConfirmed)
                .await,
            Err(OrderError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_resend_proposal_needs_live_token() {
        let h = harness();
        let order = h.place().await;

        assert!(matches!(
            h.lifecycle
                .resend_notification(order.id, NotificationKind::DeliveryProposed)
                .await,
            Err(OrderError::IllegalTransition { .. })
        ));

        h.dispatcher.set_failing(true);
        h.lifecycle.propose_delivery_date(order.id, h.in_days(3), None).await.unwrap();
        h.dispatcher.set_failing(false);

        h.lifecycle
            .resend_notification(order.id, NotificationKind::DeliveryProposed)
            .await
            .unwrap();
        let resent = h.dispatcher.sent_of(NotificationKind::DeliveryProposed);
        assert_eq!(resent.len(), 1);
        assert!(resent[0].variables.contains_key("reject_url"));
    }

    #[tokio::test]
    async fn test_payment_status_is_orthogonal() {
        let h = harness();
        let order = h.place().await;

        let paid = h.lifecycle.update_payment_status(order.id, PaymentStatus::Paid).await.unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.status, OrderStatus::Pending);
        assert_eq!(paid.version, order.version);

        // Lifecycle writes keep the gateway's value
        let confirmed = h.lifecycle.confirm_delivery_date(order.id, h.in_days(1), None).await.unwrap();
        let stored = h.lifecycle.get_order(confirmed.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_requote_follows_tariff_change() {
        let h = harness();
        let order = h.place().await;

        let unchanged = h.lifecycle.requote(order.id, None).await.unwrap();
        assert!(!unchanged.changed);

        h.tariffs
            .catalog
            .set_rental(RentalPricing::new(h.tariffs.service_id, dec!(20), 0, vec![]))
            .unwrap();
        let outcome = h.lifecycle.requote(order.id, Some(OrderStatus::Pending)).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.previous.rental_cost, dec!(105));
        assert_eq!(outcome.order.price.rental_cost, dec!(140));
        assert_eq!(outcome.order.status, OrderStatus::Pending);
    }

    #[derive(Default)]
    struct RecordingListener {
        seen: std::sync::Mutex<Vec<(OrderStatus, OrderStatus, String)>>,
    }

    #[async_trait]
    impl TransitionListener for RecordingListener {
        async fn on_transition(&self, order: &Order, from: OrderStatus, actor: &str) {
            self.seen.lock().unwrap().push((from, order.status, actor.to_string()));
        }
    }

    #[tokio::test]
    async fn test_listener_sees_committed_writes_only() {
        let tariffs = fixtures::tariffs();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = Arc::new(MockNotificationDispatcher::new());
        let lifecycle = OrderLifecycle::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryCustomerRepository::new()),
            tariffs.catalog.clone(),
            dispatcher.clone(),
            clock.clone(),
            LifecycleSettings::default(),
        )
        .with_listener(listener.clone());

        let order = lifecycle.place_order(fixtures::checkout(&tariffs)).await.unwrap();
        let date = (clock.now() + Duration::days(2)).date_naive();
        lifecycle.propose_delivery_date(order.id, date, None).await.unwrap();
        let token = lifecycle.get_order(order.id).await.unwrap().validation_token.unwrap().token;
        lifecycle.client_respond(&token, ClientAction::Reject).await.unwrap();

        // Rejected by the expected-status check, never written
        assert!(lifecycle.cancel(order.id, Some(OrderStatus::Confirmed)).await.is_err());

        let seen = listener.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (OrderStatus::Pending, OrderStatus::DateProposed, ACTOR_ADMIN.to_string()),
                (OrderStatus::DateProposed, OrderStatus::Pending, ACTOR_CLIENT.to_string()),
            ]
        );
    }
}
