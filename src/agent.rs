//! Room agent
//!
//! Owns one room's frame source and wake-word engine and runs its audio loop.
//! Every datagram is dispatched on the room's current mode, read once per
//! datagram from the shared mode cell.

use crate::bus::{topics, ControlBus};
use crate::engine::{Activation, WakeWordEngine};
use crate::filter::FilterSettings;
use crate::frame::{decode_frame, FrameSource};
use crate::messages::DetectionEvent;
use crate::mode::{AudioMode, ModeCell};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A configured room: its site id and UDP listen port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RoomConfig {
    pub name: String,
    pub port: u16,
}

/// What happened to one datagram
#[derive(Debug, Clone, PartialEq)]
pub enum DatagramOutcome {
    /// Dropped because the room is off (or in the reserved detect mode)
    Discarded(AudioMode),

    /// Decoded and fed to the engine
    Analyzed { samples: usize, activations: Vec<Activation> },

    /// Forwarded verbatim on the room's audio topic
    Forwarded,

    /// Not a valid audio container
    Rejected,
}

/// Datagram counters
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub datagrams: u64,
    pub discarded: u64,
    pub analyzed: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub receive_errors: u64,
    pub publish_errors: u64,
}

pub struct RoomAgent {
    room: RoomConfig,
    source: FrameSource,
    engine: WakeWordEngine,
    mode: Arc<ModeCell>,
    bus: Arc<dyn ControlBus>,
    sensitivity: f32,
    expected_sample_rate: u32,
    stats: AgentStats,
}

impl RoomAgent {
    pub fn new(
        room: RoomConfig,
        source: FrameSource,
        engine: WakeWordEngine,
        mode: Arc<ModeCell>,
        bus: Arc<dyn ControlBus>,
    ) -> Self {
        Self {
            room,
            source,
            engine,
            mode,
            bus,
            sensitivity: FilterSettings::default().activation_threshold,
            expected_sample_rate: crate::audio_buffer::SAMPLE_RATE as u32,
            stats: AgentStats::default(),
        }
    }

    /// Sensitivity reported in detection events
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Sample rate the classifier expects; other rates are analyzed but logged
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.expected_sample_rate = sample_rate;
        self
    }

    pub fn engine(&self) -> &WakeWordEngine {
        &self.engine
    }

    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    /// Dispatch one datagram on the current mode
    pub async fn handle_datagram(&mut self, datagram: Bytes) -> DatagramOutcome {
        self.stats.datagrams += 1;

        let outcome = match self.mode.get() {
            mode @ (AudioMode::Off | AudioMode::Detect) => {
                self.stats.discarded += 1;
                DatagramOutcome::Discarded(mode)
            }
            AudioMode::Monitor => self.analyze(&datagram).await,
            AudioMode::Stream => self.forward(datagram).await,
        };

        if self.stats.datagrams % 1000 == 0 {
            debug!(
                room = %self.room.name,
                "Processed {} datagrams ({} analyzed, {} forwarded, {} discarded, {} rejected, {} samples dropped)",
                self.stats.datagrams,
                self.stats.analyzed,
                self.stats.forwarded,
                self.stats.discarded,
                self.stats.rejected,
                self.engine.stats().dropped_samples
            );
        }

        outcome
    }

    async fn analyze(&mut self, datagram: &[u8]) -> DatagramOutcome {
        let frame = match decode_frame(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.rejected += 1;
                debug!(room = %self.room.name, "Dropping datagram: {}", e);
                return DatagramOutcome::Rejected;
            }
        };

        if frame.sample_rate != self.expected_sample_rate {
            debug!(
                room = %self.room.name,
                "Frame sample rate {} Hz differs from expected {} Hz",
                frame.sample_rate, self.expected_sample_rate
            );
        }

        self.stats.analyzed += 1;
        let samples = frame.samples.len();
        self.engine.push(&frame.samples);

        let mut activations = Vec::new();
        while let Some(fired) = self.engine.next_window() {
            for activation in fired {
                self.publish_detection(&activation).await;
                activations.push(activation);
            }
        }

        DatagramOutcome::Analyzed { samples, activations }
    }

    async fn publish_detection(&mut self, activation: &Activation) {
        let event = DetectionEvent::new(&activation.model_id, self.sensitivity, &self.room.name);
        let topic = topics::detection(&activation.model_id);

        let result = match event.to_json() {
            Ok(payload) => self.bus.publish(&topic, Bytes::from(payload)).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => info!(
                room = %self.room.name,
                model = %activation.model_id,
                "Published detection on {}", topic
            ),
            Err(e) => {
                self.stats.publish_errors += 1;
                warn!(room = %self.room.name, model = %activation.model_id, "Failed to publish detection: {}", e);
            }
        }
    }

    async fn forward(&mut self, datagram: Bytes) -> DatagramOutcome {
        let topic = topics::audio_frame(&self.room.name);

        if let Err(e) = self.bus.publish(&topic, datagram).await {
            self.stats.publish_errors += 1;
            warn!(room = %self.room.name, "Failed to forward audio frame: {}", e);
        }

        self.stats.forwarded += 1;
        DatagramOutcome::Forwarded
    }

    /// Receive and dispatch datagrams forever
    pub async fn run(mut self) {
        info!(
            room = %self.room.name,
            port = self.room.port,
            mode = %self.mode.get(),
            "Room agent running"
        );

        loop {
            match self.source.receive().await {
                Ok(datagram) => {
                    self.handle_datagram(datagram).await;
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    error!(room = %self.room.name, "Audio receive failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Subscription};
    use crate::classifier::{Classifier, ClassifierError};
    use crate::filter::FilterSettings;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scores every window at a fixed confidence
    struct FixedClassifier(f32);

    impl Classifier for FixedClassifier {
        fn predict(&mut self, _window: &[i16]) -> Result<HashMap<String, f32>, ClassifierError> {
            Ok(HashMap::from([("alexa".to_string(), self.0)]))
        }
    }

    fn wav_frame(samples: &[i16]) -> Bytes {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    /// Fires on the first window, then records whether that detection was
    /// already on the bus when the second window was classified
    struct ObservingClassifier {
        outbound: Subscription,
        windows: usize,
        seen_first_detection: Arc<AtomicBool>,
    }

    impl Classifier for ObservingClassifier {
        fn predict(&mut self, _window: &[i16]) -> Result<HashMap<String, f32>, ClassifierError> {
            self.windows += 1;
            if self.windows == 2 {
                self.seen_first_detection
                    .store(self.outbound.try_recv().is_some(), Ordering::SeqCst);
            }
            let score = if self.windows == 1 { 0.9 } else { 0.0 };
            Ok(HashMap::from([("alexa".to_string(), score)]))
        }
    }

    async fn agent(confidence: f32) -> (RoomAgent, Arc<ModeCell>, Subscription) {
        let bus = Arc::new(LocalBus::new());
        let outbound = bus
            .subscribe(&["detection/#".to_string(), "audio/#".to_string()])
            .await
            .unwrap();

        let (agent, mode) = agent_with(Box::new(FixedClassifier(confidence)), bus).await;
        (agent, mode, outbound)
    }

    async fn agent_with(classifier: Box<dyn Classifier>, bus: Arc<LocalBus>) -> (RoomAgent, Arc<ModeCell>) {
        let source = FrameSource::bind("127.0.0.1:0".parse().unwrap(), 4096).await.unwrap();
        let settings = FilterSettings {
            activation_samples: 1,
            activation_threshold: 0.5,
            deactivation_threshold: 0.2,
        };
        let engine = WakeWordEngine::new(
            "kitchen",
            4,
            64,
            &["alexa".to_string()],
            &settings,
            classifier,
        );
        let mode = Arc::new(ModeCell::default());
        let room = RoomConfig { name: "kitchen".to_string(), port: 0 };

        let agent = RoomAgent::new(room, source, engine, mode.clone(), bus).with_sensitivity(0.5);
        (agent, mode)
    }

    #[tokio::test]
    async fn test_detection_is_published_before_next_window() {
        let bus = Arc::new(LocalBus::new());
        let outbound = bus.subscribe(&["detection/#".to_string()]).await.unwrap();
        let seen = Arc::new(AtomicBool::new(false));
        let classifier = ObservingClassifier {
            outbound,
            windows: 0,
            seen_first_detection: seen.clone(),
        };
        let (mut agent, _mode) = agent_with(Box::new(classifier), bus).await;

        // two windows in one frame
        let outcome = agent.handle_datagram(wav_frame(&[1; 8])).await;

        assert!(matches!(outcome, DatagramOutcome::Analyzed { ref activations, .. } if activations.len() == 1));
        assert!(seen.load(Ordering::SeqCst), "detection held back until the frame was fully analyzed");
    }

    #[tokio::test]
    async fn test_default_sensitivity_is_activation_threshold() {
        let (agent, _mode, _outbound) = agent(0.9).await;
        let bare = RoomAgent::new(
            RoomConfig { name: "attic".to_string(), port: 0 },
            FrameSource::bind("127.0.0.1:0".parse().unwrap(), 4096).await.unwrap(),
            WakeWordEngine::new("attic", 4, 64, &[], &FilterSettings::default(), Box::new(FixedClassifier(0.0))),
            Arc::new(ModeCell::default()),
            Arc::new(LocalBus::new()),
        );

        approx::assert_relative_eq!(agent.sensitivity, 0.5);
        approx::assert_relative_eq!(bare.sensitivity, 0.7);
    }

    #[tokio::test]
    async fn test_off_and_detect_discard() {
        let (mut agent, mode, mut outbound) = agent(0.9).await;

        for discarding in [AudioMode::Off, AudioMode::Detect] {
            mode.set(discarding);
            let outcome = agent.handle_datagram(wav_frame(&[1; 8])).await;
            assert_eq!(outcome, DatagramOutcome::Discarded(discarding));
        }

        assert!(outbound.try_recv().is_none());
        assert_eq!(agent.engine().stats().windows_analyzed, 0);
        assert_eq!(agent.engine().stats().buffered_samples, 0);
        assert_eq!(agent.stats().discarded, 2);
    }

    #[tokio::test]
    async fn test_monitor_analyzes_and_publishes_detection() {
        let (mut agent, _mode, mut outbound) = agent(0.9).await;

        let outcome = agent.handle_datagram(wav_frame(&[1; 6])).await;

        match outcome {
            DatagramOutcome::Analyzed { samples, activations } => {
                assert_eq!(samples, 6);
                assert_eq!(activations.len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(agent.engine().stats().buffered_samples, 2);

        let message = outbound.try_recv().expect("detection not published");
        assert_eq!(message.topic, "detection/alexa/detected");
        let event: DetectionEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(event.model_id, "alexa");
        assert_eq!(event.site_id, "kitchen");
        assert!(outbound.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_monitor_rejects_bad_container() {
        let (mut agent, _mode, mut outbound) = agent(0.9).await;

        let outcome = agent.handle_datagram(Bytes::from_static(b"\x00\x01garbage")).await;

        assert_eq!(outcome, DatagramOutcome::Rejected);
        assert!(outbound.try_recv().is_none());
        assert_eq!(agent.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_stream_forwards_raw_bytes() {
        let (mut agent, mode, mut outbound) = agent(0.9).await;
        mode.set(AudioMode::Stream);

        // forwarding never decodes, so invalid containers pass through too
        let datagram = Bytes::from_static(b"raw-bytes");
        let outcome = agent.handle_datagram(datagram.clone()).await;

        assert_eq!(outcome, DatagramOutcome::Forwarded);
        let message = outbound.try_recv().unwrap();
        assert_eq!(message.topic, "audio/kitchen/audioFrame");
        assert_eq!(message.payload, datagram);
        assert_eq!(agent.engine().stats().windows_analyzed, 0);
    }

    #[tokio::test]
    async fn test_mode_change_applies_to_next_datagram() {
        let (mut agent, mode, mut outbound) = agent(0.1).await;

        assert!(matches!(
            agent.handle_datagram(wav_frame(&[1; 4])).await,
            DatagramOutcome::Analyzed { .. }
        ));

        mode.set(AudioMode::Off);
        assert_eq!(
            agent.handle_datagram(wav_frame(&[1; 4])).await,
            DatagramOutcome::Discarded(AudioMode::Off)
        );

        mode.set(AudioMode::Monitor);
        assert!(matches!(
            agent.handle_datagram(wav_frame(&[1; 4])).await,
            DatagramOutcome::Analyzed { .. }
        ));

        assert_eq!(agent.engine().stats().windows_analyzed, 2);
        assert!(outbound.try_recv().is_none());
    }
}
