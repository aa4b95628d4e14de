// Peak meter sink.
//
// Tracks the rolling maximum of |I| and |Q| and emits a dBFS line at a
// bounded cadence, with an auxiliary line whenever the device overflow
// total advanced. Lines fan out over a broadcast channel to the /peak
// HTTP readers and the console meter.

use crate::capture::CaptureStats;
use crate::ring::Consumer;
use crate::sink::{pull, Pull};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Floor so a silent stream reports a finite level (-200 dBFS).
const PEAK_FLOOR: f32 = 1e-10;

pub fn spawn(
    mut cons: Consumer,
    stats: Arc<CaptureStats>,
    tx: broadcast::Sender<String>,
    refresh: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || run(&mut cons, &stats, &tx, refresh))
}

fn run(
    cons: &mut Consumer,
    stats: &CaptureStats,
    tx: &broadcast::Sender<String>,
    refresh: Duration,
) {
    let mut buf = vec![0.0f32; 16 * 1024];
    let mut peak = 0.0f32;
    let mut last_emit = Instant::now();
    let mut last_overflows = 0u64;

    loop {
        match pull(cons, &mut buf, Duration::from_millis(50)) {
            Pull::End => break,
            Pull::Idle => {}
            Pull::Data(r) => {
                for &v in &buf[..r.n] {
                    peak = peak.max(v.abs());
                }
            }
        }

        if last_emit.elapsed() >= refresh {
            let dbfs = 20.0 * peak.max(PEAK_FLOOR).log10();
            // Nobody listening is fine; broadcast just drops the line.
            let _ = tx.send(format!("{dbfs:.1} dBFS"));

            let overflows = stats.overflow_total.load(Ordering::Acquire);
            if overflows != last_overflows {
                let _ = tx.send(format!("overflows {overflows}"));
                last_overflows = overflows;
            }
            peak = 0.0;
            last_emit = Instant::now();
        }
    }
}

#[cfg(test)]
#[path = "peak_test.rs"]
mod tests;
