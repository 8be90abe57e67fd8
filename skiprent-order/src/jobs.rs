use crate::error::OrderResult;
use crate::lifecycle::OrderLifecycle;
use crate::models::{NotificationKind, NotificationOutcome, OrderStatus};
use crate::notifications::{NotificationDispatcher, NotificationIntent};
use crate::repository::CustomerRepository;
use chrono::Duration;
use skiprent_core::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_SURVEY_DELAY_DAYS: i64 = 7;
pub const DEFAULT_INACTIVITY_DAYS: i64 = 90;

/// Asks for feedback on orders completed at least `delay` ago.
/// An order whose survey flag is set is never picked again.
pub struct SatisfactionSurveyJob {
    lifecycle: Arc<OrderLifecycle>,
    delay: Duration,
}

impl SatisfactionSurveyJob {
    pub fn new(lifecycle: Arc<OrderLifecycle>, delay_days: i64) -> Self {
        Self {
            lifecycle,
            delay: Duration::days(delay_days),
        }
    }

    /// Number of surveys delivered by this run
    pub async fn run(&self) -> OrderResult<usize> {
        let cutoff = self.lifecycle.clock().now() - self.delay;
        let due: Vec<_> = self
            .lifecycle
            .orders()
            .list_by_status(OrderStatus::Completed)
            .await?
            .into_iter()
            .filter(|o| !o.email_flags.satisfaction_survey)
            .filter(|o| o.completed_at.is_some_and(|at| at <= cutoff))
            .collect();

        let mut sent = 0;
        for mut order in due {
            if self.lifecycle.notify(NotificationKind::SatisfactionSurvey, &mut order).await
                == NotificationOutcome::Sent
            {
                sent += 1;
            }
        }
        if sent > 0 {
            info!(sent, "Satisfaction surveys sent");
        }
        Ok(sent)
    }
}

/// Reminds registered customers who have been idle for `threshold`.
///
/// The customer is marked before the email goes out: a reminder may be lost
/// on transport failure but is never sent twice.
pub struct InactivitySweep {
    customers: Arc<dyn CustomerRepository>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
}

impl InactivitySweep {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        inactivity_days: i64,
    ) -> Self {
        Self {
            customers,
            dispatcher,
            clock,
            threshold: Duration::days(inactivity_days),
        }
    }

    pub async fn run(&self) -> OrderResult<usize> {
        let now = self.clock.now();
        let idle = self.customers.list_inactive_unnotified(now - self.threshold).await?;

        let mut sent = 0;
        for customer in idle {
            if !self.customers.mark_inactivity_notified(&customer.id, now).await? {
                continue;
            }

            let kind = NotificationKind::InactivityReminder;
            let mut variables = BTreeMap::new();
            variables.insert("customer_id".to_string(), customer.id.clone());
            variables.insert("last_active_at".to_string(), customer.last_active_at.to_rfc3339());
            let intent = NotificationIntent {
                kind,
                order_id: None,
                audience: kind.audience(),
                recipient: Some(customer.email.clone()),
                variables,
            };

            match self.dispatcher.dispatch(&intent).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(customer_id = %customer.id, error = %e, "Inactivity reminder failed"),
            }
        }
        if sent > 0 {
            info!(sent, "Inactivity reminders sent");
        }
        Ok(sent)
    }
}
