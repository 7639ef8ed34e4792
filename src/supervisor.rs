//! Supervisor
//!
//! Starts one agent and one control router per configured room plus the
//! passive session monitor, and owns their tasks for the life of the process.

use crate::agent::{RoomAgent, RoomConfig};
use crate::bus::{BusError, ControlBus};
use crate::classifier::ClassifierFactory;
use crate::config::{ConfigError, HubConfig};
use crate::engine::WakeWordEngine;
use crate::frame::{FrameError, FrameSource};
use crate::mode::{AudioMode, ModeCell};
use crate::monitor::SessionMonitor;
use crate::router::ControlRouter;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio ingress error: {0}")]
    Frame(#[from] FrameError),

    #[error("Control bus error: {0}")]
    Bus(#[from] BusError),

    #[error("No room could be started")]
    NoRoomsStarted,
}

/// Running hub: task handles plus each room's mode cell
pub struct Hub {
    tasks: JoinSet<()>,
    modes: BTreeMap<String, Arc<ModeCell>>,
    listen_addrs: BTreeMap<String, std::net::SocketAddr>,
}

impl Hub {
    /// Names of the rooms that started
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(String::as_str)
    }

    pub fn mode(&self, room: &str) -> Option<AudioMode> {
        self.modes.get(room).map(|cell| cell.get())
    }

    /// Actual bound address of a room's audio socket
    pub fn listen_addr(&self, room: &str) -> Option<std::net::SocketAddr> {
        self.listen_addrs.get(room).copied()
    }

    /// Wait for every task. Agents run forever, so this normally never
    /// returns; a task that ends or panics is logged.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => warn!("Hub task finished"),
                Err(e) => error!("Hub task failed: {}", e),
            }
        }
    }

    pub fn shutdown(mut self) {
        self.tasks.abort_all();
    }
}

pub struct Supervisor {
    config: Arc<HubConfig>,
    bus: Arc<dyn ControlBus>,
    classifiers: ClassifierFactory,
}

impl Supervisor {
    pub fn new(config: Arc<HubConfig>, bus: Arc<dyn ControlBus>, classifiers: ClassifierFactory) -> Self {
        Self {
            config,
            bus,
            classifiers,
        }
    }

    /// Start every room and the monitor.
    ///
    /// Fails before starting anything if no rooms are configured. A room whose
    /// socket or subscription cannot be set up is logged and skipped.
    pub async fn start(self) -> Result<Hub, HubError> {
        if self.config.rooms.is_empty() {
            error!("No rooms configured");
            return Err(ConfigError::NoRooms.into());
        }

        let mut hub = Hub {
            tasks: JoinSet::new(),
            modes: BTreeMap::new(),
            listen_addrs: BTreeMap::new(),
        };

        for room in self.config.room_configs() {
            let name = room.name.clone();
            if let Err(e) = self.start_room(room, &mut hub).await {
                error!(room = %name, "Room failed to start: {}", e);
            }
        }

        if hub.modes.is_empty() {
            hub.shutdown();
            return Err(HubError::NoRoomsStarted);
        }

        match SessionMonitor::subscribe(self.bus.as_ref()).await {
            Ok(monitor) => {
                hub.tasks.spawn(monitor.run());
            }
            Err(e) => warn!("Session monitor disabled: {}", e),
        }

        info!("Started {} of {} rooms", hub.modes.len(), self.config.rooms.len());
        Ok(hub)
    }

    async fn start_room(&self, room: RoomConfig, hub: &mut Hub) -> Result<(), HubError> {
        let config = &self.config;
        let source = FrameSource::bind(config.listen_addr(&room), config.audio.max_datagram_size).await?;
        let listen_addr = source.local_addr()?;

        let mode = Arc::new(ModeCell::default());
        let router = ControlRouter::new(
            room.name.clone(),
            config.base_room.clone(),
            config.streaming_enabled,
            mode.clone(),
            self.bus.clone(),
        );
        let subscription = self.bus.subscribe(&router.filters()).await?;

        let engine = WakeWordEngine::new(
            room.name.clone(),
            config.detection.window_size,
            config.buffer_capacity(),
            &config.detection.models,
            &config.detection.filter_settings(),
            (self.classifiers)(&room.name),
        );

        let name = room.name.clone();
        let agent = RoomAgent::new(room, source, engine, mode.clone(), self.bus.clone())
            .with_sensitivity(config.detection.activation_threshold)
            .with_sample_rate(config.audio.sample_rate);

        hub.tasks.spawn(router.run(subscription));
        hub.tasks.spawn(agent.run());
        hub.modes.insert(name.clone(), mode);
        hub.listen_addrs.insert(name, listen_addr);

        Ok(())
    }
}
