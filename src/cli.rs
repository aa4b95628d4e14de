// Command-line surface.

use crate::container::{ContainerKind, SampleEncoding};
use crate::sink::file::FileSinkConfig;
use crate::sink::power::PowerConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "iqtap", version, about = "Capture IQ from an SDR, record it, and serve it over HTTP")]
pub struct Cli {
    /// SDR device: "sim" (built-in test tone, optionally "sim:<tone_hz>")
    /// or a SoapySDR args string such as "driver=rtlsdr"
    #[arg(long, default_value = "sim")]
    pub device: String,

    /// Center frequency in Hz
    #[arg(short = 'f', long, default_value_t = 100e6)]
    pub frequency: f64,

    /// Sample rate in samples per second
    #[arg(short = 'r', long, default_value_t = 1e6)]
    pub rate: f64,

    /// Tuner gain in dB
    #[arg(short = 'g', long, default_value_t = 0.0)]
    pub gain: f64,

    /// Enable hardware AGC
    #[arg(long)]
    pub agc: bool,

    /// Swap I and Q (driver setting)
    #[arg(long)]
    pub iq_swap: bool,

    /// Enable bias tee power (driver setting)
    #[arg(long)]
    pub biastee: bool,

    /// Enable the tuner's digital AGC (driver setting)
    #[arg(long)]
    pub digital_agc: bool,

    /// Enable offset tuning (driver setting)
    #[arg(long)]
    pub offset_tune: bool,

    /// Direct sampling mode (driver setting, typically 0-2)
    #[arg(long)]
    pub direct_samp: Option<u32>,

    /// Output file stem; frequency, rate and timestamp are appended
    #[arg(short = 'o', long, default_value = "output")]
    pub output: PathBuf,

    /// Start paused (no recording session until PUT /pause n)
    #[arg(long)]
    pub pause: bool,

    /// Record 16-bit PCM instead of 32-bit float
    #[arg(long, conflicts_with = "cf32")]
    pub pcm16: bool,

    /// Record headerless interleaved f32 instead of WAV
    #[arg(long, conflicts_with = "rf64")]
    pub cf32: bool,

    /// Declare RF64 up front for captures expected to pass 4 GiB
    #[arg(long)]
    pub rf64: bool,

    /// Fixed output name, truncated on each new session
    #[arg(long)]
    pub notimestamp: bool,

    /// Complex samples per device read
    #[arg(long, default_value_t = 1024)]
    pub packet_size: usize,

    /// Ring buffer size in MiB
    #[arg(long, default_value_t = 256)]
    pub buffer_size: usize,

    /// Periodogram FFT size
    #[arg(long, default_value_t = 256)]
    pub bins: usize,

    /// Resolution bandwidth in Hz; overrides --bins with rate/rbw
    #[arg(long)]
    pub rbw: Option<f64>,

    /// Periodogram integration interval in seconds
    #[arg(long, default_value_t = 1.0)]
    pub integration: f64,

    /// Emit after this many FFTs instead of on the clock
    #[arg(long)]
    pub average: Option<u32>,

    /// Address for the control server
    #[arg(long, default_value = "0.0.0.0")]
    pub hostname: String,

    /// Port for the control server
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Print the peak meter feed to stderr
    #[arg(long)]
    pub meter: bool,

    /// Print the periodogram feed to stderr
    #[arg(long)]
    pub waterfall: bool,

    /// Meter refresh interval in seconds
    #[arg(long, default_value_t = 2.0)]
    pub refresh: f64,
}

impl Cli {
    pub fn container(&self) -> ContainerKind {
        if self.cf32 {
            ContainerKind::Cf32
        } else if self.rf64 {
            ContainerKind::Rf64
        } else {
            ContainerKind::Wav
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        // Raw cf32 is f32 by definition.
        if self.pcm16 && !self.cf32 {
            SampleEncoding::S16
        } else {
            SampleEncoding::F32
        }
    }

    pub fn file_config(&self) -> FileSinkConfig {
        FileSinkConfig {
            output: self.output.clone(),
            container: self.container(),
            encoding: self.encoding(),
            timestamp: !self.notimestamp,
        }
    }

    /// Opaque driver settings from the device flag group.
    pub fn device_settings(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut flag = |on: bool, key: &str| {
            if on {
                out.push((key.to_string(), "true".to_string()));
            }
        };
        flag(self.iq_swap, "iq_swap");
        flag(self.biastee, "biastee");
        flag(self.digital_agc, "digital_agc");
        flag(self.offset_tune, "offset_tune");
        if let Some(mode) = self.direct_samp {
            out.push(("direct_samp".to_string(), mode.to_string()));
        }
        out
    }

    pub fn power_config(&self) -> PowerConfig {
        let bins = match self.rbw {
            Some(rbw) if rbw > 0.0 => (self.rate / rbw).round().clamp(2.0, 65536.0) as usize,
            _ => self.bins.clamp(2, 65536),
        };
        PowerConfig {
            bins,
            integration: self.integration.max(0.05),
            average: self.average,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh.clamp(0.1, 60.0))
    }

    /// Ring capacity in f32 elements from the --buffer-size MiB figure.
    pub fn ring_elems(&self) -> usize {
        self.buffer_size.max(1) * 1024 * 1024 / 4
    }
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
