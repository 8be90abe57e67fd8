use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use skiprent_order::{
    DispatchError, NotificationDispatcher, NotificationIntent, Order, OrderStatus, TransitionListener,
};
use skiprent_shared::models::events::{NotificationRequestedEvent, OrderTransitionedEvent};
use std::time::Duration;
use tracing::{error, info};

pub const ORDER_EVENTS_TOPIC: &str = "order.events";

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Audit record of a committed lifecycle write. Best effort.
    pub async fn publish_transition(&self, order: &Order, from: OrderStatus, actor: &str) {
        let event = transition_event(order, from, actor);
        match serde_json::to_string(&event) {
            Ok(payload) => {
                let _ = self.publish(ORDER_EVENTS_TOPIC, &order.id.to_string(), &payload).await;
            }
            Err(e) => error!(order_id = %order.id, error = %e, "Failed to encode transition event"),
        }
    }
}

#[async_trait]
impl TransitionListener for EventProducer {
    async fn on_transition(&self, order: &Order, from: OrderStatus, actor: &str) {
        self.publish_transition(order, from, actor).await;
    }
}

pub fn transition_event(order: &Order, from: OrderStatus, actor: &str) -> OrderTransitionedEvent {
    OrderTransitionedEvent {
        order_id: order.id,
        from_status: from.as_str().to_string(),
        to_status: order.status.as_str().to_string(),
        actor: actor.to_string(),
        version: order.version,
        timestamp: Utc::now().timestamp(),
    }
}

pub fn notification_event(intent: &NotificationIntent) -> Result<NotificationRequestedEvent, DispatchError> {
    Ok(NotificationRequestedEvent {
        order_id: intent.order_id,
        kind: intent.kind.as_str().to_string(),
        audience: intent.audience.as_str().to_string(),
        recipient: intent.recipient.as_ref().map(|r| r.expose().clone()),
        template: intent.kind.template().to_string(),
        variables: serde_json::to_value(&intent.variables).map_err(|e| DispatchError::Encoding(e.to_string()))?,
        timestamp: Utc::now().timestamp(),
    })
}

/// Hands notifications to the mailer service through Kafka
pub struct KafkaNotificationDispatcher {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotificationDispatcher {
    pub fn new(producer: EventProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for KafkaNotificationDispatcher {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<(), DispatchError> {
        let event = notification_event(intent)?;
        let payload = serde_json::to_string(&event).map_err(|e| DispatchError::Encoding(e.to_string()))?;
        let key = intent.order_id.map(|id| id.to_string()).unwrap_or_else(|| event.kind.clone());

        self.producer
            .publish(&self.topic, &key, &payload)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))
    }
}
