//! Shared helpers for integration tests

use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::time::Duration;
use wakeword_hub::{BusMessage, Subscription};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Wrap mono 16kHz samples in a WAV container, as a satellite would send them
pub fn wav_frame(samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav header");
        for &s in samples {
            writer.write_sample(s).expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}

/// Next delivery, failing the test if none arrives in time
pub async fn next(subscription: &mut Subscription) -> BusMessage {
    tokio::time::timeout(TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for bus message")
        .expect("bus subscription closed")
}

/// Poll `condition` until it holds or the timeout expires
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
