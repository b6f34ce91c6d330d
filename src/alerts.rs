use crate::mqtt::MqttPublisher;
use crate::pipeline::{Ack, IngestStats, MessageHandler, Requeue};
use crate::reading::{parse_alert_payload, AlertEvent};
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("publish not accepted within {0:?}")]
    Timeout(Duration),
    #[error("alert publisher unavailable: {0}")]
    Unavailable(String),
}

/// At-least-once delivery of alert events to the alerts topic.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, event: &AlertEvent) -> Result<(), PublishError>;
}

pub struct MqttAlertPublisher {
    publisher: MqttPublisher,
    topic: String,
}

impl MqttAlertPublisher {
    pub fn new(publisher: MqttPublisher, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl AlertPublisher for MqttAlertPublisher {
    async fn publish(&self, event: &AlertEvent) -> Result<(), PublishError> {
        self.publisher.publish_json(&self.topic, event).await
    }
}

/// Terminal side effect for a received alert.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> anyhow::Result<()>;
}

pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, event: &AlertEvent) -> anyhow::Result<()> {
        tracing::warn!(target: "notifications", "alert received: {}", event.message);
        Ok(())
    }
}

/// Consumes alert events. Every message is acknowledged once handled.
#[derive(Clone)]
pub struct AlertConsumer {
    sink: Arc<dyn AlertSink>,
    stats: Arc<IngestStats>,
}

impl AlertConsumer {
    pub fn new(sink: Arc<dyn AlertSink>, stats: Arc<IngestStats>) -> Self {
        Self { sink, stats }
    }
}

#[async_trait]
impl MessageHandler for AlertConsumer {
    async fn handle(&self, payload: &[u8]) -> Result<Ack, Requeue> {
        let mut buf = payload.to_vec();
        let event = match parse_alert_payload(&mut buf) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error=%err, "dropping malformed alert payload");
                return Ok(Ack::Discarded);
            }
        };
        if let Err(err) = self.sink.notify(&event).await {
            tracing::warn!(error=%err, alert = %event.message, "alert sink failed");
        }
        self.stats.notifications.fetch_add(1, Ordering::Relaxed);
        Ok(Ack::Processed)
    }
}
