//! Wake-word classifier seam
//!
//! The acoustic model is a black box: one analysis window of PCM in, one
//! confidence per supported model out.

use crate::audio_buffer::AudioSample;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid analysis window: expected {expected} samples, got {actual}")]
    InvalidWindow { expected: usize, actual: usize },
}

/// Per-window wake-word scorer
pub trait Classifier: Send {
    /// Score one analysis window, returning a confidence in `[0, 1]` per model id
    fn predict(&mut self, window: &[AudioSample]) -> Result<HashMap<String, f32>, ClassifierError>;
}

/// Creates one classifier per room
pub type ClassifierFactory = Arc<dyn Fn(&str) -> Box<dyn Classifier> + Send + Sync>;

/// RMS level at which the energy classifier reports full confidence
pub const ENERGY_FULL_SCALE: f32 = 0.4;

/// Energy-based stand-in used when no acoustic model is linked.
///
/// Scores every model with the window's RMS level relative to
/// [`ENERGY_FULL_SCALE`]. Loud audio looks like a wake word to it, so it is
/// only useful for wiring and smoke tests.
pub struct EnergyClassifier {
    models: Vec<String>,
    window_size: usize,
}

impl EnergyClassifier {
    pub fn new(models: Vec<String>, window_size: usize) -> Self {
        Self { models, window_size }
    }

    fn rms(window: &[AudioSample]) -> f32 {
        let energy: f64 = window
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        (energy / window.len() as f64).sqrt() as f32
    }
}

impl Classifier for EnergyClassifier {
    fn predict(&mut self, window: &[AudioSample]) -> Result<HashMap<String, f32>, ClassifierError> {
        if window.len() != self.window_size || window.is_empty() {
            return Err(ClassifierError::InvalidWindow {
                expected: self.window_size,
                actual: window.len(),
            });
        }

        let confidence = (Self::rms(window) / ENERGY_FULL_SCALE).min(1.0);

        Ok(self
            .models
            .iter()
            .map(|model| (model.clone(), confidence))
            .collect())
    }
}
