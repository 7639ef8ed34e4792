//! Sample buffer for pending analysis audio
//!
//! FIFO of 16-bit PCM samples backed by a ring buffer. Frames are appended as
//! they arrive and drained in fixed-size analysis windows.

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{trace, warn};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Default sample rate of satellite audio
pub const SAMPLE_RATE: usize = 16000;

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),
}

/// FIFO of pending samples for one room
pub struct AudioBuffer {
    ring: HeapRb<AudioSample>,
    dropped: u64,
}

impl AudioBuffer {
    /// Create a buffer able to hold `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            dropped: 0,
        }
    }

    /// Append samples at the back of the buffer.
    ///
    /// If the buffer cannot hold them, the oldest samples are dropped first.
    pub fn write(&mut self, samples: &[AudioSample]) -> usize {
        let vacant = self.ring.vacant_len();

        if samples.len() > vacant {
            let capacity = self.capacity();
            let truncated = samples.len().saturating_sub(capacity);
            let samples = &samples[truncated..];
            let to_drop = samples.len().saturating_sub(self.ring.vacant_len());
            self.ring.skip(to_drop);
            let to_drop = to_drop + truncated;
            self.dropped += to_drop as u64;

            warn!("Sample buffer full, dropped {} oldest samples", to_drop);
            return self.ring.push_slice(samples);
        }

        let written = self.ring.push_slice(samples);
        trace!("Wrote {} samples to buffer", written);
        written
    }

    /// Remove exactly `count` samples from the front of the buffer
    pub fn read(&mut self, count: usize) -> Result<Vec<AudioSample>, AudioBufferError> {
        let available = self.ring.occupied_len();

        if count > available {
            return Err(AudioBufferError::Underflow(count, available));
        }

        let mut window = vec![0; count];
        let read = self.ring.pop_slice(&mut window);
        window.truncate(read);
        Ok(window)
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Number of samples lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read() {
        let mut buffer = AudioBuffer::with_capacity(1000);
        let samples: Vec<i16> = (0..100).map(|i| i as i16).collect();

        assert_eq!(buffer.write(&samples), 100);
        assert_eq!(buffer.len(), 100);

        let read = buffer.read(50).unwrap();
        assert_eq!(read.len(), 50);
        assert_eq!(read[0], 0);
        assert_eq!(read[49], 49);
        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.read(1).unwrap(), vec![50]);
    }

    #[test]
    fn test_underflow_leaves_buffer_untouched() {
        let mut buffer = AudioBuffer::with_capacity(100);
        buffer.write(&[1; 50]);

        match buffer.read(100) {
            Err(AudioBufferError::Underflow(requested, available)) => {
                assert_eq!(requested, 100);
                assert_eq!(available, 50);
            }
            other => panic!("Expected Underflow error, got {:?}", other.map(|v| v.len())),
        }
        assert_eq!(buffer.len(), 50);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = AudioBuffer::with_capacity(10);
        buffer.write(&[1; 8]);
        buffer.write(&[2; 5]);

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.dropped(), 3);

        let data = buffer.read(10).unwrap();
        assert_eq!(&data[..5], &[1; 5]);
        assert_eq!(&data[5..], &[2; 5]);
    }

    #[test]
    fn test_oversized_write_keeps_newest() {
        let mut buffer = AudioBuffer::with_capacity(4);
        let samples: Vec<i16> = (0..10).collect();
        buffer.write(&samples);

        assert_eq!(buffer.dropped(), 6);
        assert_eq!(buffer.read(4).unwrap(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioBuffer::with_capacity(0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 1);
    }
}
