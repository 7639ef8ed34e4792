//! Hysteresis detection filter
//!
//! Turns a noisy stream of per-window classifier confidences for one model in
//! one room into a single activation edge. The moving average over the last
//! `activation_samples` scores must reach the activation threshold to fire,
//! and must then fall below the deactivation threshold before it can fire
//! again.

use std::collections::VecDeque;
use tracing::trace;

/// Thresholds and window length shared by every filter of a room
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Number of most recent scores averaged (N)
    pub activation_samples: usize,

    /// Moving average at or above which the filter arms and fires
    pub activation_threshold: f32,

    /// Moving average below which an armed filter re-arms for the next activation
    pub deactivation_threshold: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            activation_samples: 3,
            activation_threshold: 0.7,
            deactivation_threshold: 0.2,
        }
    }
}

impl FilterSettings {
    /// Whether the two thresholds leave a hysteresis band
    pub fn has_hysteresis(&self) -> bool {
        self.deactivation_threshold < self.activation_threshold
    }
}

/// Moving-average Schmitt trigger for one (room, model) pair
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    window: VecDeque<f32>,
    capacity: usize,
    activation_threshold: f32,
    deactivation_threshold: f32,
    armed: bool,
}

impl DetectionFilter {
    pub fn new(settings: &FilterSettings) -> Self {
        let capacity = settings.activation_samples.max(1);

        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            activation_threshold: settings.activation_threshold,
            deactivation_threshold: settings.deactivation_threshold,
            armed: false,
        }
    }

    /// Feed one confidence score.
    ///
    /// Returns `true` only on the unarmed to armed transition.
    pub fn observe(&mut self, confidence: f32) -> bool {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(confidence);

        let average = self.average();
        trace!(confidence, average, armed = self.armed, "filter observe");

        if !self.armed && average >= self.activation_threshold {
            self.armed = true;
            return true;
        }

        if self.armed && average < self.deactivation_threshold {
            self.armed = false;
        }

        false
    }

    /// Arithmetic mean of the scores currently in the window
    pub fn average(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
