use crate::alerts::PublishError;
use crate::config::Config;
use crate::pipeline::{Ack, MessageHandler, Requeue};
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
    options.set_keep_alive(config.mqtt_keepalive());
    // Unacknowledged QoS 1 deliveries are kept by the broker across reconnects.
    options.set_clean_session(false);
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    options
}

/// `$share/<group>/<topic>` when a share group is set, else the bare topic.
pub fn subscription_filter(topic: &str, share_group: Option<&str>) -> String {
    match share_group.map(str::trim).filter(|group| !group.is_empty()) {
        Some(group) => format!("$share/{group}/{topic}"),
        None => topic.to_string(),
    }
}

/// What the consumer does with a delivery once its handler has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send the PUBACK.
    Acknowledge,
    /// Withhold the PUBACK and drop the session so the broker redelivers.
    Reconnect,
}

pub fn disposition(result: &Result<Ack, Requeue>) -> Disposition {
    match result {
        Ok(_) => Disposition::Acknowledge,
        Err(_) => Disposition::Reconnect,
    }
}

/// Consumes `filter` one message at a time, acknowledging only what the
/// handler accepts.
///
/// A `Requeue` drops the connection without the PUBACK; the broker redelivers
/// the message once the session resumes.
pub async fn run_consumer(
    config: Config,
    client_id: String,
    filter: String,
    handler: Arc<dyn MessageHandler>,
) -> Result<()> {
    loop {
        let mut options = mqtt_options(&config, &client_id);
        options.set_manual_acks(true);
        let (client, mut eventloop) = AsyncClient::new(options, 16);

        if let Err(err) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
            tracing::warn!(error=%err, client_id=%client_id, "failed to subscribe to MQTT; retrying");
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!(topic=%filter, client_id=%client_id, "subscribed");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let result = handler.handle(&publish.payload).await;
                    match disposition(&result) {
                        Disposition::Acknowledge => {
                            if matches!(result, Ok(Ack::Discarded)) {
                                tracing::debug!(topic=%publish.topic, "acknowledging discarded message");
                            }
                            if let Err(err) = client.ack(&publish).await {
                                tracing::warn!(error=%err, "failed to acknowledge message; reconnecting");
                                break;
                            }
                        }
                        Disposition::Reconnect => {
                            if let Err(requeue) = &result {
                                tracing::warn!(
                                    error=%requeue,
                                    topic=%publish.topic,
                                    "leaving message unacknowledged for redelivery"
                                );
                            }
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error=%err, client_id=%client_id, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

/// Matches QoS 1 publishes to their PUBACKs.
///
/// Waiters are queued in the order requests enter the client channel. The
/// event loop reports each outgoing publish in that same order, which binds
/// the oldest unbound waiter to the packet id. A packet id that is already
/// bound is a retransmission after reconnect and binds nothing.
#[derive(Debug, Default)]
struct PendingAcks {
    unbound: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl PendingAcks {
    fn enqueue(&mut self, waiter: oneshot::Sender<()>) {
        self.unbound.push_back(waiter);
    }

    fn cancel_last(&mut self) {
        self.unbound.pop_back();
    }

    fn on_outgoing(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.unbound.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn on_puback(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            // The caller may have timed out already.
            let _ = waiter.send(());
        }
    }
}

/// Long-lived QoS 1 publisher. A publish completes once the broker has
/// returned its PUBACK. The event loop task keeps the session alive and
/// retransmits in-flight publishes after reconnecting.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    pending: Arc<Mutex<PendingAcks>>,
    timeout: Duration,
}

impl MqttPublisher {
    pub fn new(config: &Config, client_id: &str) -> (Self, JoinHandle<()>) {
        let options = mqtt_options(config, client_id);
        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let pending = Arc::new(Mutex::new(PendingAcks::default()));
        let loop_pending = pending.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        loop_pending.lock().await.on_outgoing(pkid);
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        loop_pending.lock().await.on_puback(ack.pkid);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt publisher event loop error");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
        (
            Self {
                client,
                pending,
                timeout: config.publish_timeout(),
            },
            handle,
        )
    }

    /// Publishes at QoS 1 and waits for the broker's PUBACK, bounded by the
    /// configured publish timeout. A full request channel fails immediately.
    pub async fn publish_json<T>(&self, topic: &str, payload: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let bytes = serde_json::to_vec(payload)?;
        let (tx, rx) = oneshot::channel();
        {
            // Waiter and request enter their queues together, without an await
            // in between, so their order always matches.
            let mut pending = self.pending.lock().await;
            pending.enqueue(tx);
            if let Err(err) = self
                .client
                .try_publish(topic, QoS::AtLeastOnce, false, bytes)
            {
                pending.cancel_last();
                return Err(PublishError::Client(err));
            }
        }
        let confirmed = async {
            rx.await.map_err(|_| {
                PublishError::Unavailable("publisher event loop stopped before PUBACK".into())
            })
        };
        match tokio::time::timeout(self.timeout, confirmed).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}
