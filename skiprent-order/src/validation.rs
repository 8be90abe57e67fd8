use crate::error::{OrderError, OrderResult};
use crate::models::{ClientAction, DeliveryValidationToken, Order, OrderStatus};
use crate::repository::OrderRepository;
use crate::transitions::{self, Transition};
use chrono::Duration;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use skiprent_core::Clock;
use std::sync::Arc;
use uuid::Uuid;

pub const TOKEN_LENGTH: usize = 48;
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

/// Mints and redeems the single-use links sent with a delivery date proposal.
///
/// The token lives on the order itself, so "one live token per order" holds by
/// construction: proposing again overwrites it. Redemption consumes the token
/// and moves the order in the same conditional write.
pub struct ValidationTokenManager {
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    public_base_url: String,
}

impl ValidationTokenManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        clock: Arc<dyn Clock>,
        ttl_days: i64,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            clock,
            ttl: Duration::days(ttl_days),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fresh unconsumed token for `order_id`; persisted by the proposal that carries it
    pub fn issue(&self, order_id: Uuid) -> DeliveryValidationToken {
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let now = self.clock.now();
        DeliveryValidationToken {
            order_id,
            token,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed_at: None,
        }
    }

    pub fn link(&self, token: &str, action: ClientAction) -> String {
        format!(
            "{}/validate-delivery?token={}&action={}",
            self.public_base_url,
            token,
            action.as_str()
        )
    }

    /// Resolve a token to its order, applying every check short of consuming it
    pub async fn inspect(&self, token: &str, action: ClientAction) -> OrderResult<Order> {
        let order = self.orders.find_by_token(token).await?.ok_or(OrderError::TokenInvalid)?;
        let Some(stored) = order.validation_token.as_ref() else {
            return Err(OrderError::TokenInvalid);
        };

        if stored.is_consumed() {
            return Err(OrderError::TokenAlreadyUsed);
        }
        if order.status != OrderStatus::DateProposed {
            return Err(OrderError::IllegalTransition {
                from: order.status,
                to: target_of(action),
            });
        }
        if stored.is_expired(self.clock.now()) {
            return Err(OrderError::TokenExpired);
        }
        Ok(order)
    }

    /// Redeem `token`. Exactly one of any number of concurrent calls succeeds.
    pub async fn consume(&self, token: &str, action: ClientAction) -> OrderResult<Transition> {
        let order = self.inspect(token, action).await?;

        let transition = transitions::client_response(&order, action, self.clock.now())?;
        if self
            .orders
            .compare_and_swap(transition.from, transition.from_version, &transition.order)
            .await?
        {
            return Ok(transition);
        }

        // Lost the race; report what the winner left behind
        match self.orders.find_by_token(token).await? {
            None => Err(OrderError::TokenInvalid),
            Some(current) if current.validation_token.as_ref().is_some_and(|t| t.is_consumed()) => {
                Err(OrderError::TokenAlreadyUsed)
            }
            Some(current) => Err(OrderError::StaleState {
                expected: order.status,
                actual: current.status,
            }),
        }
    }
}

fn target_of(action: ClientAction) -> OrderStatus {
    match action {
        ClientAction::Accept => OrderStatus::Confirmed,
        ClientAction::Reject => OrderStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::repository::InMemoryOrderRepository;
    use chrono::Utc;
    use skiprent_core::ManualClock;

    struct Harness {
        repo: Arc<InMemoryOrderRepository>,
        clock: Arc<ManualClock>,
        tokens: ValidationTokenManager,
    }

    fn harness() -> Harness {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = ValidationTokenManager::new(repo.clone(), clock.clone(), 7, "https://skiprent.test/");
        Harness { repo, clock, tokens }
    }

    async fn proposed(h: &Harness) -> (Order, String) {
        let order = fixtures::order().await;
        h.repo.insert(&order).await.unwrap();
        let token = h.tokens.issue(order.id);
        let value = token.token.clone();
        let date = (h.clock.now() + Duration::days(3)).date_naive();
        let t = transitions::propose_date(&order, date, token, h.clock.now()).unwrap();
        assert!(h.repo.compare_and_swap(t.from, t.from_version, &t.order).await.unwrap());
        (t.order, value)
    }

    #[test]
    fn test_issued_tokens_are_long_and_distinct() {
        let h = harness();
        let order_id = Uuid::new_v4();
        let a = h.tokens.issue(order_id);
        let b = h.tokens.issue(order_id);

        assert_eq!(a.token.len(), TOKEN_LENGTH);
        assert!(a.token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.token, b.token);
        assert_eq!(a.expires_at - a.issued_at, Duration::days(7));
        assert!(!a.is_consumed());
    }

    #[test]
    fn test_link_format() {
        let h = harness();
        assert_eq!(
            h.tokens.link("abc", ClientAction::Reject),
            "https://skiprent.test/validate-delivery?token=abc&action=reject"
        );
    }

    #[tokio::test]
    async fn test_second_redemption_is_already_used() {
        let h = harness();
        let (order, token) = proposed(&h).await;

        let first = h.tokens.consume(&token, ClientAction::Accept).await.unwrap();
        assert_eq!(first.to(), OrderStatus::Confirmed);

        let second = h.tokens.consume(&token, ClientAction::Accept).await;
        assert!(matches!(second, Err(OrderError::TokenAlreadyUsed)));

        let stored = h.repo.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.version, order.version + 1);
    }

    #[tokio::test]
    async fn test_concurrent_redemption_succeeds_once() {
        let h = harness();
        let (order, token) = proposed(&h).await;

        let (a, b) = tokio::join!(
            h.tokens.consume(&token, ClientAction::Accept),
            h.tokens.consume(&token, ClientAction::Reject),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(OrderError::TokenAlreadyUsed)));

        let stored = h.repo.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.version, order.version + 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let h = harness();
        proposed(&h).await;
        assert!(matches!(
            h.tokens.consume("nope", ClientAction::Accept).await,
            Err(OrderError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let h = harness();
        let (_, token) = proposed(&h).await;

        h.clock.advance(Duration::days(7));
        assert!(matches!(
            h.tokens.consume(&token, ClientAction::Accept).await,
            Err(OrderError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_token_unusable_once_order_left_date_proposed() {
        let h = harness();
        let (order, token) = proposed(&h).await;

        let cancelled = transitions::cancel(&order, h.clock.now()).unwrap();
        assert!(h
            .repo
            .compare_and_swap(cancelled.from, cancelled.from_version, &cancelled.order)
            .await
            .unwrap());

        // Expiry is irrelevant once the order moved on
        h.clock.advance(Duration::days(30));
        let err = h.tokens.consume(&token, ClientAction::Reject).await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::IllegalTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Pending
            }
        ));
    }
}
