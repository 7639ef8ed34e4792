//! Control bus
//!
//! Publish/subscribe seam with hierarchical topics. The broker is an external
//! collaborator behind [`ControlBus`]: [`crate::mqtt::MqttBus`] talks to a
//! real broker, [`LocalBus`] is the in-process broker used by the tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Control bus connection failed: {0}")]
    Connection(String),

    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Control bus closed")]
    Closed,
}

/// One delivered publication
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of publications matching a subscription's filters
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Next delivery, or `None` once the bus has gone away
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Next delivery if one is already queued
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe transport shared by every room
#[async_trait]
pub trait ControlBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    async fn subscribe(&self, filters: &[String]) -> Result<Subscription, BusError>;
}

/// Match a topic against a subscription filter.
///
/// `+` matches exactly one level, a trailing `#` matches any number of
/// remaining levels including none.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic names used on the control bus
pub mod topics {
    /// Dialogue session toggles
    pub const SESSION_CONTROL: &str = "session-control/#";

    /// Dialogue results, observed by the monitor
    pub const SESSION_RESULT: &str = "session-result/#";

    pub const TOGGLE_ON: &str = "toggleOn";
    pub const TOGGLE_OFF: &str = "toggleOff";

    pub fn toggle_on() -> String {
        format!("session-control/{}", TOGGLE_ON)
    }

    pub fn toggle_off() -> String {
        format!("session-control/{}", TOGGLE_OFF)
    }

    /// Tone playback addressed to a satellite room
    pub fn tone_filter(room: &str) -> String {
        format!("tone/{}/playBytes/#", room)
    }

    /// Rewrite a room's tone topic onto the base room.
    ///
    /// Returns `None` if `topic` is not a tone topic of `room`.
    pub fn tone_forward(topic: &str, room: &str, base: &str) -> Option<String> {
        let mut levels: Vec<&str> = topic.split('/').collect();
        if levels.len() < 3 || levels[0] != "tone" || levels[1] != room || levels[2] != "playBytes" {
            return None;
        }
        levels[1] = base;
        Some(levels.join("/"))
    }

    pub fn detection(model: &str) -> String {
        format!("detection/{}/detected", model)
    }

    pub fn audio_frame(room: &str) -> String {
        format!("audio/{}/audioFrame", room)
    }
}

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Local fan-out of delivered publications to matching subscriptions
#[derive(Default)]
pub(crate) struct SubscriberSet {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl SubscriberSet {
    pub(crate) async fn add(&self, filters: &[String]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().await.push(Subscriber {
            filters: filters.to_vec(),
            tx,
        });

        Subscription::new(rx)
    }

    /// Deliver to every live subscription with a matching filter, returning
    /// the number of deliveries
    pub(crate) async fn dispatch(&self, topic: &str, payload: &Bytes) -> usize {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.filters.iter().any(|f| topic_matches(f, topic)) {
                let message = BusMessage::new(topic, payload.clone());
                if subscriber.tx.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Every filter of every live subscription
    pub(crate) async fn filters(&self) -> Vec<String> {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| !s.tx.is_closed())
            .flat_map(|s| s.filters.iter().cloned())
            .collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }
}

/// In-process broker
#[derive(Default)]
pub struct LocalBus {
    subscribers: SubscriberSet,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.len().await
    }
}

#[async_trait]
impl ControlBus for LocalBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let delivered = self.subscribers.dispatch(topic, &payload).await;

        trace!("Published {} bytes on {} to {} subscribers", payload.len(), topic, delivered);
        Ok(())
    }

    async fn subscribe(&self, filters: &[String]) -> Result<Subscription, BusError> {
        debug!("Subscribing to {:?}", filters);
        Ok(self.subscribers.add(filters).await)
    }
}
