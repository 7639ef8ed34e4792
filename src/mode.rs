//! Per-room audio mode
//!
//! The mode is the only state shared between a room's control-bus router and
//! its audio loop. It lives in a cache-padded atomic so the router can switch
//! it while the audio loop reads it once per datagram.

use cache_padded::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What a room does with incoming audio frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AudioMode {
    /// Frames are discarded
    Off = 0,

    /// Frames are decoded and analyzed locally for wake words
    Monitor = 1,

    /// Frames are forwarded raw to the control bus
    Stream = 2,

    /// Reserved for post-detection handling; frames are discarded
    Detect = 3,
}

impl AudioMode {
    /// Mode every room starts in
    pub const INITIAL: AudioMode = AudioMode::Monitor;

    fn from_u8(value: u8) -> Self {
        match value {
            1 => AudioMode::Monitor,
            2 => AudioMode::Stream,
            3 => AudioMode::Detect,
            _ => AudioMode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMode::Off => "off",
            AudioMode::Monitor => "monitor",
            AudioMode::Stream => "stream",
            AudioMode::Detect => "detect",
        }
    }
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free holder of a room's [`AudioMode`]
pub struct ModeCell {
    value: CachePadded<AtomicU8>,
}

impl ModeCell {
    pub fn new(mode: AudioMode) -> Self {
        Self {
            value: CachePadded::new(AtomicU8::new(mode as u8)),
        }
    }

    pub fn get(&self) -> AudioMode {
        AudioMode::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Store a new mode, returning the previous one
    pub fn set(&self, mode: AudioMode) -> AudioMode {
        AudioMode::from_u8(self.value.swap(mode as u8, Ordering::AcqRel))
    }
}

impl fmt::Debug for ModeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModeCell").field(&self.get()).finish()
    }
}

impl Default for ModeCell {
    fn default() -> Self {
        Self::new(AudioMode::INITIAL)
    }
}
