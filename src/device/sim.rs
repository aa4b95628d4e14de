// Built-in synthetic IQ source.
//
// Generates a complex tone at a fixed baseband offset, paced to wall
// clock so downstream timing behaves like a real front end. Tests
// construct it unpaced to run at full speed.

use super::{DeviceError, ReadResult, SdrDevice};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

/// Tone amplitude, well under full scale so quantization never clips.
const AMPLITUDE: f32 = 0.5;

/// Synthetic SDR producing a continuous complex exponential.
#[derive(Debug)]
pub struct SimDevice {
    frequency_hz: f64,
    sample_rate_hz: f64,
    gain_db: f64,
    agc: bool,
    settings: BTreeMap<String, String>,
    tone_hz: Option<f64>,
    streaming: bool,
    paced: bool,
    phase: f64,
    /// Wall-clock origin and samples emitted since, for pacing.
    epoch: Option<Instant>,
    emitted: u64,
}

impl SimDevice {
    /// `tone_hz` pins the tone's baseband offset; by default it sits at
    /// an eighth of the sample rate so it lands mid-band on any rate.
    pub fn new(sample_rate_hz: f64, tone_hz: Option<f64>) -> Self {
        Self {
            frequency_hz: 100e6,
            sample_rate_hz,
            gain_db: 0.0,
            agc: false,
            settings: BTreeMap::new(),
            tone_hz,
            streaming: false,
            paced: true,
            phase: 0.0,
            epoch: None,
            emitted: 0,
        }
    }

    /// Full-speed variant for tests: `read` never sleeps.
    #[cfg(test)]
    pub fn unpaced(sample_rate_hz: f64, tone_hz: Option<f64>) -> Self {
        let mut dev = Self::new(sample_rate_hz, tone_hz);
        dev.paced = false;
        dev
    }

    fn tone(&self) -> f64 {
        self.tone_hz.unwrap_or(self.sample_rate_hz / 8.0)
    }
}

impl SdrDevice for SimDevice {
    fn driver(&self) -> &str {
        "sim"
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.frequency_hz = hz;
        Ok(())
    }

    fn frequency(&self) -> Result<f64, DeviceError> {
        Ok(self.frequency_hz)
    }

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), DeviceError> {
        if self.streaming {
            return Err(DeviceError::Config(
                "cannot change rate while streaming".into(),
            ));
        }
        if hz <= 0.0 {
            return Err(DeviceError::Config(format!("bad sample rate {hz}")));
        }
        self.sample_rate_hz = hz;
        Ok(())
    }

    fn sample_rate(&self) -> Result<f64, DeviceError> {
        Ok(self.sample_rate_hz)
    }

    fn set_gain(&mut self, db: f64) -> Result<(), DeviceError> {
        self.gain_db = db;
        Ok(())
    }

    fn gain(&self) -> Result<f64, DeviceError> {
        Ok(self.gain_db)
    }

    fn set_agc(&mut self, on: bool) -> Result<(), DeviceError> {
        self.agc = on;
        Ok(())
    }

    fn agc(&self) -> Result<bool, DeviceError> {
        Ok(self.agc)
    }

    fn write_setting(&mut self, key: &str, value: &str) -> Result<(), DeviceError> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read_setting(&self, key: &str) -> Result<String, DeviceError> {
        self.settings
            .get(key)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownSetting(key.to_string()))
    }

    fn settings(&self) -> Result<Vec<(String, String)>, DeviceError> {
        Ok(self
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        self.streaming = true;
        self.epoch = Some(Instant::now());
        self.emitted = 0;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        self.streaming = false;
        self.epoch = None;
        Ok(())
    }

    fn read(&mut self, scratch: &mut [f32]) -> Result<ReadResult, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::Stream("stream not started".into()));
        }
        let n = scratch.len() / 2;
        if self.paced {
            if let Some(epoch) = self.epoch {
                // Sleep until wall clock catches up with the sample count.
                let due = Duration::from_secs_f64(self.emitted as f64 / self.sample_rate_hz);
                let elapsed = epoch.elapsed();
                if due > elapsed {
                    thread::sleep((due - elapsed).min(Duration::from_millis(100)));
                }
            }
        }
        let step = TAU * self.tone() / self.sample_rate_hz;
        for pair in scratch[..n * 2].chunks_exact_mut(2) {
            pair[0] = AMPLITUDE * self.phase.cos() as f32;
            pair[1] = AMPLITUDE * self.phase.sin() as f32;
            self.phase = (self.phase + step) % TAU;
        }
        self.emitted += n as u64;
        Ok(ReadResult {
            samples: n,
            overflow: false,
        })
    }
}
