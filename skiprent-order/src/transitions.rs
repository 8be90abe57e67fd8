use crate::error::{OrderError, OrderResult};
use crate::models::{
    ClientAction, ClientValidationStatus, DeliveryValidationToken, NotificationKind, Order, OrderStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use skiprent_catalog::PriceBreakdown;

/// The next persisted form of an order, plus what to do once it is committed
#[derive(Debug, Clone)]
pub struct Transition {
    pub order: Order,
    pub from: OrderStatus,
    /// Version the write is conditional on
    pub from_version: i64,
    pub notification: Option<NotificationKind>,
}

impl Transition {
    pub fn to(&self) -> OrderStatus {
        self.order.status
    }
}

fn advance(order: &Order, to: OrderStatus, now: DateTime<Utc>) -> OrderResult<Order> {
    if !order.status.can_transition_to(to) {
        return Err(OrderError::IllegalTransition { from: order.status, to });
    }
    let mut next = order.clone();
    next.status = to;
    next.version += 1;
    next.updated_at = now;
    Ok(next)
}

fn require(order: &Order, allowed: &[OrderStatus], to: OrderStatus) -> OrderResult<()> {
    if allowed.contains(&order.status) {
        Ok(())
    } else {
        Err(OrderError::IllegalTransition { from: order.status, to })
    }
}

fn not_in_past(date: NaiveDate, now: DateTime<Utc>) -> OrderResult<()> {
    if date < now.date_naive() {
        return Err(OrderError::InvalidInput(format!("delivery date {date} is in the past")));
    }
    Ok(())
}

fn finish(order: &Order, mut next: Order, notification: Option<NotificationKind>) -> Transition {
    if let Some(kind) = notification {
        next.email_flags.set(kind, false);
    }
    Transition {
        order: next,
        from: order.status,
        from_version: order.version,
        notification,
    }
}

/// Pending -> Confirmed on a date fixed by the back office
pub fn confirm_date(order: &Order, date: NaiveDate, now: DateTime<Utc>) -> OrderResult<Transition> {
    require(order, &[OrderStatus::Pending], OrderStatus::Confirmed)?;
    not_in_past(date, now)?;

    let mut next = advance(order, OrderStatus::Confirmed, now)?;
    next.confirmed_delivery_date = Some(date);
    Ok(finish(order, next, Some(NotificationKind::DeliveryConfirmed)))
}

/// Pending | DateProposed -> DateProposed. The new token replaces any
/// previous one, which stops resolving.
pub fn propose_date(
    order: &Order,
    date: NaiveDate,
    token: DeliveryValidationToken,
    now: DateTime<Utc>,
) -> OrderResult<Transition> {
    require(
        order,
        &[OrderStatus::Pending, OrderStatus::DateProposed],
        OrderStatus::DateProposed,
    )?;
    not_in_past(date, now)?;
    if token.order_id != order.id {
        return Err(OrderError::InvalidInput(format!(
            "token bound to order {} used for order {}",
            token.order_id, order.id
        )));
    }

    let mut next = advance(order, OrderStatus::DateProposed, now)?;
    next.proposed_delivery_date = Some(date);
    next.client_validation_status = Some(ClientValidationStatus::Pending);
    next.validation_token = Some(token);
    Ok(finish(order, next, Some(NotificationKind::DeliveryProposed)))
}

/// The client's answer. Consumes the token in the same write.
pub fn client_response(order: &Order, action: ClientAction, now: DateTime<Utc>) -> OrderResult<Transition> {
    let to = match action {
        ClientAction::Accept => OrderStatus::Confirmed,
        ClientAction::Reject => OrderStatus::Pending,
    };
    require(order, &[OrderStatus::DateProposed], to)?;

    let mut next = advance(order, to, now)?;
    if let Some(token) = next.validation_token.as_mut() {
        token.consumed_at = Some(now);
    }
    let notification = match action {
        ClientAction::Accept => {
            next.confirmed_delivery_date = next.proposed_delivery_date;
            next.client_validation_status = Some(ClientValidationStatus::Accepted);
            NotificationKind::ProposalAccepted
        }
        ClientAction::Reject => {
            next.proposed_delivery_date = None;
            next.client_validation_status = Some(ClientValidationStatus::Rejected);
            NotificationKind::ProposalRejected
        }
    };
    Ok(finish(order, next, Some(notification)))
}

pub fn mark_delivered(order: &Order, now: DateTime<Utc>) -> OrderResult<Transition> {
    let mut next = advance(order, OrderStatus::Delivered, now)?;
    next.delivered_at = Some(now);
    Ok(finish(order, next, None))
}

pub fn mark_completed(order: &Order, now: DateTime<Utc>) -> OrderResult<Transition> {
    let mut next = advance(order, OrderStatus::Completed, now)?;
    next.completed_at = Some(now);
    Ok(finish(order, next, None))
}

/// Any non-terminal state. An outstanding token is left in place; redeeming it
/// fails because the order is no longer awaiting an answer.
pub fn cancel(order: &Order, now: DateTime<Utc>) -> OrderResult<Transition> {
    let next = advance(order, OrderStatus::Cancelled, now)?;
    Ok(finish(order, next, None))
}

/// Replace the stored price; status is unchanged
pub fn requote(order: &Order, price: PriceBreakdown, now: DateTime<Utc>) -> OrderResult<Transition> {
    if order.status.is_terminal() {
        return Err(OrderError::IllegalTransition {
            from: order.status,
            to: order.status,
        });
    }
    let mut next = order.clone();
    next.price = price;
    next.version += 1;
    next.updated_at = now;
    Ok(finish(order, next, None))
}
