pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod transitions;
pub mod validation;

#[cfg(test)]
mod fixtures;

pub use error::{OrderError, OrderResult};
pub use jobs::{InactivitySweep, SatisfactionSurveyJob};
pub use lifecycle::{LifecycleSettings, OrderLifecycle, RequoteOutcome, TransitionListener, ACTOR_ADMIN, ACTOR_CLIENT};
pub use models::{
    Audience, CheckoutRequest, ClientAction, ClientValidationStatus, DeliveryAddress, DeliveryValidationToken,
    EmailFlags, NotificationAttempt, NotificationKind, NotificationOutcome, Order, OrderStatus,
};
pub use notifications::{
    DispatchError, LogDispatcher, MockNotificationDispatcher, NotificationDispatcher, NotificationIntent,
};
pub use repository::{
    Customer, CustomerRepository, InMemoryCustomerRepository, InMemoryOrderRepository, OrderRepository,
};
pub use transitions::Transition;
pub use validation::ValidationTokenManager;
