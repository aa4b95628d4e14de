// SDR device facade.
//
// The capture engine talks to a trait object so the rest of the pipeline
// never sees a driver type. Hardware access goes through SoapySDR behind
// the `soapy` feature; the built-in `sim` device generates a paced test
// tone so the whole pipeline runs without hardware.

mod sim;
pub use sim::SimDevice;

#[cfg(feature = "soapy")]
mod soapy;
#[cfg(feature = "soapy")]
pub use soapy::SoapyDevice;

/// Errors surfaced by a device backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("no SDR device matches '{0}'")]
    NotFound(String),
    #[error("device open failed: {0}")]
    Open(String),
    #[error("device configuration failed: {0}")]
    Config(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("unknown device setting '{0}'")]
    UnknownSetting(String),
    #[error("SoapySDR support not compiled in; rebuild with --features soapy")]
    SoapyUnavailable,
}

/// Outcome of one stream read. A timed-out read is not an error: it
/// reports zero samples so the engine can service its mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadResult {
    /// Complex samples written to the scratch buffer.
    pub samples: usize,
    /// The driver reported an overflow since the last read.
    pub overflow: bool,
}

/// Contract between the capture engine and an SDR backend. Samples are
/// delivered as interleaved f32 I/Q in [-1, +1]; backends reading CS16
/// convert on the way out (`x / 32768.0`). Frequency, gain, AGC and named
/// settings may be changed while streaming; a rate change requires
/// `stop_stream` / `start_stream` bracketing, which the engine performs.
pub trait SdrDevice: Send + std::fmt::Debug {
    /// Short driver name for logs and snapshots ("sim", "rtlsdr", ...).
    fn driver(&self) -> &str;

    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn frequency(&self) -> Result<f64, DeviceError>;

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), DeviceError>;
    fn sample_rate(&self) -> Result<f64, DeviceError>;

    fn set_gain(&mut self, db: f64) -> Result<(), DeviceError>;
    fn gain(&self) -> Result<f64, DeviceError>;

    fn set_agc(&mut self, on: bool) -> Result<(), DeviceError>;
    fn agc(&self) -> Result<bool, DeviceError>;

    /// Write an opaque driver setting (e.g. "iq_swap", "biastee").
    fn write_setting(&mut self, key: &str, value: &str) -> Result<(), DeviceError>;
    /// Read the live driver value of one setting.
    fn read_setting(&self, key: &str) -> Result<String, DeviceError>;
    /// Enumerate settings with their live values.
    fn settings(&self) -> Result<Vec<(String, String)>, DeviceError>;

    fn start_stream(&mut self) -> Result<(), DeviceError>;
    fn stop_stream(&mut self) -> Result<(), DeviceError>;

    /// Blocking read of up to `scratch.len() / 2` complex samples into the
    /// interleaved scratch buffer, with a driver timeout around 100 ms.
    fn read(&mut self, scratch: &mut [f32]) -> Result<ReadResult, DeviceError>;
}

/// Open a device from its CLI spec: `sim` (optionally `sim:<tone_hz>`)
/// for the built-in source, anything else is a SoapySDR args string.
pub fn open(spec: &str, sample_rate_hz: f64) -> Result<Box<dyn SdrDevice>, DeviceError> {
    if spec == "sim" || spec.starts_with("sim:") {
        let tone = spec
            .strip_prefix("sim:")
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| DeviceError::Open(format!("bad sim tone '{s}'")))
            })
            .transpose()?;
        return Ok(Box::new(SimDevice::new(sample_rate_hz, tone)));
    }
    open_soapy(spec)
}

#[cfg(feature = "soapy")]
fn open_soapy(spec: &str) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Ok(Box::new(SoapyDevice::open(spec)?))
}

#[cfg(not(feature = "soapy"))]
fn open_soapy(_spec: &str) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Err(DeviceError::SoapyUnavailable)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
