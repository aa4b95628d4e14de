// HTTP stream sink: one per connected client.
//
// A blocking thread drains the ring, converts to the endpoint's format
// and hands chunks to the async response body over a bounded channel.
// Dropping the response (client gone) or a slip ends the thread; per the
// slow-consumer policy a gapped stream is closed, never spliced.

use crate::container::{SampleEncoding, f32_to_le_bytes, f32_to_s16_bytes};
use crate::ring::Consumer;
use crate::sink::{pull, Pull};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A client that accepts nothing for this long is dropped, independent of
/// the ring's slip policy.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// On-wire format of one streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// WAV container, 32-bit float samples (`/float`, `/f32`).
    WavF32,
    /// WAV container, 16-bit PCM (`/pcm`, `/s16`).
    WavS16,
    /// Raw interleaved f32 (`/cf32`).
    Cf32,
}

impl StreamFormat {
    pub fn encoding(self) -> SampleEncoding {
        match self {
            StreamFormat::WavS16 => SampleEncoding::S16,
            _ => SampleEncoding::F32,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            StreamFormat::Cf32 => "audio/cf32",
            _ => "audio/wav",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StreamFormat::Cf32 => "cf32",
            _ => "wav",
        }
    }
}

/// Pump ring data into the response channel until the client disconnects,
/// the ring closes, or this consumer slips.
pub fn spawn(
    mut cons: Consumer,
    format: StreamFormat,
    header: Vec<u8>,
    tx: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    thread::spawn(move || run(&mut cons, format, header, &tx))
}

fn run(cons: &mut Consumer, format: StreamFormat, header: Vec<u8>, tx: &mpsc::Sender<Vec<u8>>) {
    if !header.is_empty() && !send_with_timeout(tx, header) {
        return;
    }

    let mut buf = vec![0.0f32; 16 * 1024];
    let mut bytes = Vec::new();
    loop {
        match pull(cons, &mut buf, Duration::from_millis(100)) {
            Pull::End => break,
            Pull::Idle => {
                if tx.is_closed() {
                    break;
                }
            }
            Pull::Data(r) => {
                if r.slipped > 0 {
                    crate::debug!("stream client fell behind; closing response");
                    break;
                }
                match format.encoding() {
                    SampleEncoding::F32 => f32_to_le_bytes(&buf[..r.n], &mut bytes),
                    SampleEncoding::S16 => f32_to_s16_bytes(&buf[..r.n], &mut bytes),
                }
                if !send_with_timeout(tx, std::mem::take(&mut bytes)) {
                    break;
                }
            }
        }
    }
}

/// Deliver one chunk, giving the client at most `IDLE_TIMEOUT` to make
/// room. Returns false when the client is gone or too slow to keep.
fn send_with_timeout(tx: &mpsc::Sender<Vec<u8>>, chunk: Vec<u8>) -> bool {
    let deadline = Instant::now() + IDLE_TIMEOUT;
    let mut chunk = chunk;
    loop {
        match tx.try_send(chunk) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
            Err(mpsc::error::TrySendError::Full(back)) => {
                if Instant::now() >= deadline {
                    crate::debug!("stream client idle too long; closing response");
                    return false;
                }
                chunk = back;
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
