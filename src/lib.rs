//! Wake-word hub
//!
//! Ingests per-room audio over UDP, runs streaming wake-word detection with a
//! hysteresis filter per room and model, and switches each room's audio mode
//! from dialogue session events on an MQTT control bus.

pub mod agent;
pub mod audio_buffer;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod filter;
pub mod frame;
pub mod messages;
pub mod mode;
pub mod monitor;
pub mod mqtt;
pub mod router;
pub mod supervisor;

// Re-export main types
pub use agent::{AgentStats, DatagramOutcome, RoomAgent, RoomConfig};
pub use audio_buffer::{AudioBuffer, AudioSample, SAMPLE_RATE};
pub use bus::{topic_matches, topics, BusError, BusMessage, ControlBus, LocalBus, Subscription};
pub use classifier::{Classifier, ClassifierError, ClassifierFactory, EnergyClassifier};
pub use config::{ConfigError, HubConfig};
pub use engine::{Activation, EngineStats, WakeWordEngine};
pub use filter::{DetectionFilter, FilterSettings};
pub use frame::{decode_frame, DecodedFrame, FrameError, FrameSource};
pub use messages::{ControlMessage, DetectionEvent, MessageError, SessionResult};
pub use mode::{AudioMode, ModeCell};
pub use monitor::SessionMonitor;
pub use mqtt::MqttBus;
pub use router::{ControlRouter, RouteOutcome};
pub use supervisor::{Hub, HubError, Supervisor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
