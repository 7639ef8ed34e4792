//! MQTT control bus
//!
//! [`ControlBus`] over a real broker. One client connection is shared by every
//! room; incoming publications are fanned out locally to matching
//! subscriptions, the same way [`crate::bus::LocalBus`] does in-process.

use crate::bus::{BusError, ControlBus, SubscriberSet, Subscription};
use crate::config::BusConfig;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// MQTT keep-alive interval
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How long to wait for the broker's CONNACK at startup
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Control bus connected to an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    subscribers: Arc<SubscriberSet>,
    events: JoinHandle<()>,
}

impl MqttBus {
    /// Connect to the configured broker.
    ///
    /// Fails if the broker refuses the connection or does not answer within
    /// [`CONNECT_TIMEOUT`].
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!("Connecting to MQTT broker {}:{}", config.host, config.port);
        match tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BusError::Connection(format!(
                    "no answer from {}:{} within {:?}",
                    config.host, config.port, CONNECT_TIMEOUT
                )))
            }
        }
        info!("Connected to MQTT broker (client_id={})", config.client_id);

        let subscribers = Arc::new(SubscriberSet::default());
        let events = tokio::spawn(run_events(eventloop, client.clone(), subscribers.clone()));

        Ok(Self {
            client,
            subscribers,
            events,
        })
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.events.abort();
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BusError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(event) => trace!("MQTT event before CONNACK: {:?}", event),
            Err(e) => return Err(BusError::Connection(e.to_string())),
        }
    }
}

/// Drive the connection: deliver publications, restore subscriptions after a
/// reconnect
async fn run_events(mut eventloop: EventLoop, client: AsyncClient, subscribers: Arc<SubscriberSet>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivered = subscribers.dispatch(&publish.topic, &publish.payload).await;
                trace!("Received {} bytes on {} for {} subscribers", publish.payload.len(), publish.topic, delivered);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let filters: BTreeSet<String> = subscribers.filters().await.into_iter().collect();
                info!("Reconnected to MQTT broker, restoring {} subscriptions", filters.len());
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtMostOnce) {
                        error!("Failed to restore subscription {}: {}", filter, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection lost: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl ControlBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish_bytes(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, filters: &[String]) -> Result<Subscription, BusError> {
        let subscription = self.subscribers.add(filters).await;

        for filter in filters {
            debug!("Subscribing to {}", filter);
            self.client
                .subscribe(filter.clone(), QoS::AtMostOnce)
                .await
                .map_err(|_| BusError::Closed)?;
        }

        Ok(subscription)
    }
}
