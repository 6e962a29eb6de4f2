use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeReasonCode};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Outbound side used by the report pollers.
pub trait ReportSink: Clone + Send + Sync + 'static {
    /// Publish at QoS 0, not retained. Must not block on the broker.
    fn publish_report(&self, topic: &str, report: Vec<u8>)
    -> impl Future<Output = Result<()>> + Send;
}

/// Issues the command subscription whenever the session (re)connects.
pub trait CommandSubscriber: Send + Sync {
    fn subscribe_commands(&self, topic: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Shared handle to the one broker connection. Clones are cheap and may be
/// used from any task.
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
}

impl ReportSink for MqttHandle {
    /// Never waits for the request queue: while the broker is away the queue
    /// fills up, and a QoS 0 report that can't be queued is dropped.
    async fn publish_report(&self, topic: &str, report: Vec<u8>) -> Result<()> {
        self.client.try_publish(topic, QoS::AtMostOnce, false, report)?;
        Ok(())
    }
}

impl CommandSubscriber for MqttHandle {
    async fn subscribe_commands(&self, topic: &str) -> Result<()> {
        info!("Subscribing to {}", topic);
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }
}

pub struct MqttSession {
    handle: MqttHandle,
    eventloop: EventLoop,
    subscription: String,
}

impl MqttSession {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            handle: MqttHandle { client },
            eventloop,
            subscription: config.command_subscription(),
        }
    }

    pub fn handle(&self) -> MqttHandle {
        self.handle.clone()
    }

    /// Drive the event loop until the broker accepts the first connection.
    /// Any error before that is returned, since there is nothing to fall back to.
    pub async fn connect(mut self, inbound: &mpsc::Sender<MqttMessage>) -> Result<Self> {
        loop {
            let event = self.eventloop.poll().await?;
            if on_event(&self.handle, &self.subscription, event, inbound).await {
                return Ok(self);
            }
        }
    }

    /// Run the event loop forever. Connection errors are logged and the next
    /// poll reconnects; every reconnect re-issues the command subscription.
    pub async fn run(mut self, inbound: mpsc::Sender<MqttMessage>) {
        loop {
            match self.eventloop.poll().await {
                Ok(event) => {
                    on_event(&self.handle, &self.subscription, event, &inbound).await;
                }
                Err(e) => {
                    error!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

/// React to one event from the broker. Returns true if it was a ConnAck.
pub async fn on_event<C: CommandSubscriber>(
    client: &C,
    subscription: &str,
    event: Event,
    inbound: &mpsc::Sender<MqttMessage>,
) -> bool {
    let Event::Incoming(incoming) = event else {
        return false;
    };
    match incoming {
        Incoming::ConnAck(_) => {
            info!("Connected to MQTT broker");
            // Not retried here; the next reconnect tries again.
            if let Err(e) = client.subscribe_commands(subscription).await {
                error!("Subscription to {} failed: {}", subscription, e);
            }
            true
        }
        Incoming::SubAck(suback) => {
            if suback
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                error!("Broker rejected subscription to {}", subscription);
            } else {
                debug!("Subscription to {} acknowledged", subscription);
            }
            false
        }
        Incoming::Publish(publish) => {
            let msg = MqttMessage {
                topic: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).to_string(),
            };
            if inbound.send(msg).await.is_err() {
                warn!("Command channel closed");
            }
            false
        }
        Incoming::Disconnect => {
            warn!("Broker sent disconnect");
            false
        }
        _ => false,
    }
}
