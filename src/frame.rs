//! Audio frame ingress
//!
//! Each room receives audio over its own UDP socket. A datagram carries one
//! self-describing WAV container (sample rate, channels and bit depth in the
//! header, PCM after it). Packets are never retried: lost or reordered frames
//! are part of live audio.

use crate::audio_buffer::AudioSample;
use bytes::Bytes;
use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::info;

/// Smallest possible WAV container (RIFF + fmt + data headers)
pub const MIN_CONTAINER_SIZE: usize = 44;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket receive failed: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Malformed audio frame: {0}")]
    Format(String),
}

/// Mono PCM decoded from one datagram
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    /// Channel count in the container before downmixing
    pub channels: u16,
    pub samples: Vec<AudioSample>,
}

/// Decode one WAV datagram into mono 16-bit samples.
///
/// Interleaved channels are averaged. Anything other than 16-bit integer PCM
/// is a format error.
pub fn decode_frame(datagram: &[u8]) -> Result<DecodedFrame, FrameError> {
    let reader = WavReader::new(Cursor::new(datagram)).map_err(|e| FrameError::Format(e.to_string()))?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(FrameError::Format(format!(
            "unsupported sample format {:?} with {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    if spec.channels == 0 {
        return Err(FrameError::Format("zero channels".to_string()));
    }

    let interleaved = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FrameError::Format(e.to_string()))?;

    let samples = if spec.channels == 1 {
        interleaved
    } else {
        downmix(&interleaved, spec.channels as usize)
    };

    Ok(DecodedFrame {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

fn downmix(interleaved: &[AudioSample], channels: usize) -> Vec<AudioSample> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as AudioSample
        })
        .collect()
}

/// UDP listener for one room
pub struct FrameSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl FrameSource {
    /// Bind the room's socket.
    ///
    /// `max_datagram_size` bounds the receive buffer; larger datagrams are
    /// truncated by the OS and will then fail to decode.
    pub async fn bind(addr: SocketAddr, max_datagram_size: usize) -> Result<Self, FrameError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| FrameError::Bind { addr, source })?;

        info!("Audio listener bound to {}", socket.local_addr().unwrap_or(addr));

        Ok(Self {
            socket,
            buf: vec![0; max_datagram_size.max(MIN_CONTAINER_SIZE)],
        })
    }

    /// Wait for the next datagram
    pub async fn receive(&mut self) -> Result<Bytes, FrameError> {
        let (len, _peer) = self.socket.recv_from(&mut self.buf).await?;
        Ok(Bytes::copy_from_slice(&self.buf[..len]))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FrameError> {
        Ok(self.socket.local_addr()?)
    }
}
