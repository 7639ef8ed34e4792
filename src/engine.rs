//! Wake-word engine
//!
//! Accumulates decoded samples for one room, cuts them into fixed analysis
//! windows, classifies each window once and routes every enabled model's
//! score through that model's detection filter.

use crate::audio_buffer::{AudioBuffer, AudioSample};
use crate::classifier::Classifier;
use crate::filter::{DetectionFilter, FilterSettings};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Default analysis window: 80ms at 16kHz
pub const DEFAULT_WINDOW_SIZE: usize = 1280;

/// A model whose filter fired on an analyzed window
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub model_id: String,
    pub confidence: f32,
}

/// Engine counters
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub windows_analyzed: u64,
    pub windows_failed: u64,
    pub activations: u64,
    pub buffered_samples: usize,

    /// Samples lost to buffer overflow
    pub dropped_samples: u64,
}

/// Per-room windowing and detection
pub struct WakeWordEngine {
    room: String,
    window_size: usize,
    buffer: AudioBuffer,
    classifier: Box<dyn Classifier>,
    filters: BTreeMap<String, DetectionFilter>,
    windows_analyzed: u64,
    windows_failed: u64,
    activations: u64,
}

impl WakeWordEngine {
    /// Create an engine with one filter per enabled model.
    ///
    /// `buffer_capacity` is raised to at least twice the window size.
    pub fn new(
        room: impl Into<String>,
        window_size: usize,
        buffer_capacity: usize,
        models: &[String],
        settings: &FilterSettings,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        let room = room.into();
        let window_size = window_size.max(1);
        let filters = models
            .iter()
            .map(|model| (model.clone(), DetectionFilter::new(settings)))
            .collect::<BTreeMap<_, _>>();

        debug!(
            room = %room,
            window_size,
            models = ?filters.keys().collect::<Vec<_>>(),
            "wake-word engine created"
        );

        Self {
            room,
            window_size,
            buffer: AudioBuffer::with_capacity(buffer_capacity.max(window_size * 2)),
            classifier,
            filters,
            windows_analyzed: 0,
            windows_failed: 0,
            activations: 0,
        }
    }

    /// Append decoded samples behind any remainder of earlier frames
    pub fn push(&mut self, samples: &[AudioSample]) {
        self.buffer.write(samples);
    }

    /// Drain and analyze the oldest complete window.
    ///
    /// Returns `None` once fewer than `window_size` samples are buffered,
    /// otherwise the models that fired on that window (possibly none).
    /// Callers loop until `None` so that each window's detections are
    /// handled before the next window is classified.
    pub fn next_window(&mut self) -> Option<Vec<Activation>> {
        if self.buffer.len() < self.window_size {
            return None;
        }

        let window = match self.buffer.read(self.window_size) {
            Ok(window) => window,
            Err(e) => {
                warn!(room = %self.room, "Failed to drain analysis window: {}", e);
                return None;
            }
        };

        Some(self.analyze(&window))
    }

    fn analyze(&mut self, window: &[AudioSample]) -> Vec<Activation> {
        let mut activations = Vec::new();

        let scores = match self.classifier.predict(window) {
            Ok(scores) => scores,
            Err(e) => {
                self.windows_failed += 1;
                warn!(room = %self.room, "Classifier failed, skipping window: {}", e);
                return activations;
            }
        };
        self.windows_analyzed += 1;

        for (model_id, filter) in self.filters.iter_mut() {
            let Some(&confidence) = scores.get(model_id) else {
                debug!(room = %self.room, model = %model_id, "No score for enabled model");
                continue;
            };

            if filter.observe(confidence) {
                info!(
                    room = %self.room,
                    model = %model_id,
                    confidence,
                    average = filter.average(),
                    "Wake word detected"
                );
                self.activations += 1;
                activations.push(Activation {
                    model_id: model_id.clone(),
                    confidence,
                });
            }
        }

        activations
    }

    pub fn filter(&self, model_id: &str) -> Option<&DetectionFilter> {
        self.filters.get(model_id)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            windows_analyzed: self.windows_analyzed,
            windows_failed: self.windows_failed,
            activations: self.activations,
            buffered_samples: self.buffer.len(),
            dropped_samples: self.buffer.dropped(),
        }
    }
}
