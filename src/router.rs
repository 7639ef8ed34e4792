//! Control-bus router
//!
//! Consumes one room's bus deliveries: forwards tone playback from satellite
//! rooms to the base room and switches the room's audio mode on dialogue
//! session toggles.

use crate::bus::{topic_matches, topics, BusMessage, ControlBus, Subscription};
use crate::messages::ControlMessage;
use crate::mode::{AudioMode, ModeCell};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the router did with one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Payload republished on the base room topic
    ToneForwarded(String),

    /// Mode written (possibly to the value it already had)
    ModeChanged { from: AudioMode, to: AudioMode },

    /// Invalid or incomplete message
    Dropped(String),

    /// Valid topic that needs no action
    Ignored,
}

pub struct ControlRouter {
    room: String,
    base_room: String,
    streaming_enabled: bool,
    mode: Arc<ModeCell>,
    bus: Arc<dyn ControlBus>,
}

impl ControlRouter {
    pub fn new(
        room: impl Into<String>,
        base_room: impl Into<String>,
        streaming_enabled: bool,
        mode: Arc<ModeCell>,
        bus: Arc<dyn ControlBus>,
    ) -> Self {
        Self {
            room: room.into(),
            base_room: base_room.into(),
            streaming_enabled,
            mode,
            bus,
        }
    }

    pub fn is_base_room(&self) -> bool {
        self.room == self.base_room
    }

    /// Subscription filters for this room
    pub fn filters(&self) -> Vec<String> {
        let mut filters = vec![topics::SESSION_CONTROL.to_string()];
        if !self.is_base_room() {
            filters.push(topics::tone_filter(&self.room));
        }
        filters
    }

    /// Handle one delivery. Never fails; problems are logged and dropped.
    pub async fn handle(&self, message: &BusMessage) -> RouteOutcome {
        if !self.is_base_room() {
            if let Some(target) = topics::tone_forward(&message.topic, &self.room, &self.base_room) {
                return self.forward_tone(message, target).await;
            }
        }

        if topic_matches(topics::SESSION_CONTROL, &message.topic) {
            return self.handle_session_control(message);
        }

        debug!(room = %self.room, topic = %message.topic, "Ignoring unexpected topic");
        RouteOutcome::Ignored
    }

    async fn forward_tone(&self, message: &BusMessage, target: String) -> RouteOutcome {
        match self.bus.publish(&target, message.payload.clone()).await {
            Ok(()) => {
                debug!(room = %self.room, "Forwarded tone {} -> {}", message.topic, target);
                RouteOutcome::ToneForwarded(target)
            }
            Err(e) => {
                warn!(room = %self.room, "Failed to forward tone to {}: {}", target, e);
                RouteOutcome::Dropped(e.to_string())
            }
        }
    }

    fn handle_session_control(&self, message: &BusMessage) -> RouteOutcome {
        let is_toggle = message.topic.ends_with(topics::TOGGLE_ON)
            || message.topic.ends_with(topics::TOGGLE_OFF);
        if !is_toggle {
            debug!(room = %self.room, topic = %message.topic, "Ignoring session-control message");
            return RouteOutcome::Ignored;
        }

        let control = match ControlMessage::parse(&message.topic, &message.payload) {
            Ok(control) => control,
            Err(e) => {
                debug!(room = %self.room, topic = %message.topic, "Dropping control message: {}", e);
                return RouteOutcome::Dropped(e.to_string());
            }
        };

        let target = self.target_mode(&control);
        let from = self.mode.set(target);

        if from != target {
            info!(
                room = %self.room,
                site_id = %control.site_id,
                "Audio mode {} -> {}", from, target
            );
        }

        RouteOutcome::ModeChanged { from, to: target }
    }

    /// Only the room that owns the ending session keeps streaming
    fn target_mode(&self, control: &ControlMessage) -> AudioMode {
        if control.is_toggle_on {
            AudioMode::Monitor
        } else if control.site_id == self.room && self.streaming_enabled {
            AudioMode::Stream
        } else {
            AudioMode::Off
        }
    }

    /// Consume deliveries until the subscription closes
    pub async fn run(self, mut subscription: Subscription) {
        info!(room = %self.room, filters = ?self.filters(), "Control router running");

        while let Some(message) = subscription.recv().await {
            self.handle(&message).await;
        }

        warn!(room = %self.room, "Control bus subscription closed");
    }
}
