// Power meter sink: Hann-windowed periodogram in rtl_power text format.
//
// Consumes the ring in windows of `bins` complex samples, accumulates
// |FFT|^2 over the integration interval, and emits one line per interval:
//   date, time, f_lo, f_hi, bin_hz, n, db_0, ..., db_{N-1}
// fftshifted so the first bin is the lowest frequency.

use crate::capture::ParamStore;
use crate::ring::Consumer;
use crate::sink::{pull, Pull};
use chrono::Utc;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Floor added before the log so empty bins stay finite.
const POWER_FLOOR: f64 = 1e-20;

#[derive(Debug, Clone, Copy)]
pub struct PowerConfig {
    /// FFT size; one output bin per point.
    pub bins: usize,
    /// Integration interval in seconds, used when `average` is unset.
    pub integration: f64,
    /// Emit after this many FFTs instead of on the clock.
    pub average: Option<u32>,
}

pub fn spawn(
    mut cons: Consumer,
    params: Arc<ParamStore>,
    tx: broadcast::Sender<String>,
    cfg: PowerConfig,
) -> JoinHandle<()> {
    thread::spawn(move || run(&mut cons, &params, &tx, cfg))
}

fn hann(bins: usize) -> Vec<f32> {
    (0..bins)
        .map(|i| 0.5 - 0.5 * (TAU * i as f32 / bins as f32).cos())
        .collect()
}

fn run(cons: &mut Consumer, params: &ParamStore, tx: &broadcast::Sender<String>, cfg: PowerConfig) {
    let bins = cfg.bins.max(2);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(bins);
    let window = hann(bins);

    let mut buf = vec![0.0f32; bins * 2];
    let mut pending: Vec<f32> = Vec::with_capacity(bins * 4);
    let mut scratch: Vec<Complex32> = vec![Complex32::default(); bins];
    let mut accum = vec![0.0f64; bins];
    let mut ffts = 0u32;
    let mut samples = 0u64;
    let mut interval_start = Instant::now();

    loop {
        match pull(cons, &mut buf, Duration::from_millis(50)) {
            Pull::End => break,
            Pull::Idle => {}
            Pull::Data(r) => {
                if r.slipped > 0 {
                    // The gap breaks phase continuity; drop the partial window.
                    pending.clear();
                }
                pending.extend_from_slice(&buf[..r.n]);
                while pending.len() >= bins * 2 {
                    accumulate(&pending[..bins * 2], &window, fft.as_ref(), &mut scratch, &mut accum);
                    pending.drain(..bins * 2);
                    ffts += 1;
                    samples += bins as u64;
                }
            }
        }

        let due = match cfg.average {
            Some(avg) => ffts >= avg,
            None => interval_start.elapsed().as_secs_f64() >= cfg.integration,
        };
        if due && ffts > 0 {
            let _ = tx.send(format_line(params, bins, &accum, ffts, samples));
            accum.fill(0.0);
            ffts = 0;
            samples = 0;
            interval_start = Instant::now();
        }
    }
}

fn accumulate(
    interleaved: &[f32],
    window: &[f32],
    fft: &dyn Fft<f32>,
    scratch: &mut [Complex32],
    accum: &mut [f64],
) {
    for (i, pair) in interleaved.chunks_exact(2).enumerate() {
        scratch[i] = Complex32::new(pair[0] * window[i], pair[1] * window[i]);
    }
    fft.process(scratch);
    for (a, x) in accum.iter_mut().zip(scratch.iter()) {
        *a += f64::from(x.norm_sqr());
    }
}

fn format_line(params: &ParamStore, bins: usize, accum: &[f64], ffts: u32, samples: u64) -> String {
    let p = params.load();
    let rate = p.sample_rate_hz;
    let f_lo = p.frequency_hz - rate / 2.0;
    let f_hi = p.frequency_hz + rate / 2.0;
    let bin_hz = rate / bins as f64;
    let now = Utc::now();

    let mut line = format!(
        "{}, {}, {:.0}, {:.0}, {:.2}, {}",
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        f_lo,
        f_hi,
        bin_hz,
        samples
    );
    // fftshift: negative frequencies first, so bin 0 is f_lo.
    let half = bins / 2;
    for i in (half..bins).chain(0..half) {
        let avg = accum[i] / f64::from(ffts);
        let db = 10.0 * (avg + POWER_FLOOR).log10();
        line.push_str(&format!(", {db:.2}"));
    }
    line
}

#[cfg(test)]
#[path = "power_test.rs"]
mod tests;
