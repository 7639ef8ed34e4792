//! Passive session monitor
//!
//! Logs dialogue results for observability. Has no effect on any room.

use crate::bus::{topics, BusError, BusMessage, ControlBus, Subscription};
use crate::messages::SessionResult;
use tracing::{debug, info, warn};

pub struct SessionMonitor {
    subscription: Subscription,
}

impl SessionMonitor {
    pub async fn subscribe(bus: &dyn ControlBus) -> Result<Self, BusError> {
        let subscription = bus.subscribe(&[topics::SESSION_RESULT.to_string()]).await?;
        Ok(Self { subscription })
    }

    /// Log one delivery, returning the parsed result if it was well formed
    pub fn observe(message: &BusMessage) -> Option<SessionResult> {
        match SessionResult::parse(&message.payload) {
            Ok(result) => {
                info!(
                    site_id = result.site_id.as_deref().unwrap_or("unknown"),
                    likelihood = result.likelihood.unwrap_or_default(),
                    "Session result: {:?}", result.text
                );
                Some(result)
            }
            Err(e) => {
                debug!(topic = %message.topic, "Ignoring session result: {}", e);
                None
            }
        }
    }

    pub async fn run(mut self) {
        info!("Session monitor running");

        while let Some(message) = self.subscription.recv().await {
            Self::observe(&message);
        }

        warn!("Session monitor subscription closed");
    }
}
