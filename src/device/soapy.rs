// SoapySDR backend.
//
// Wraps a SoapySDR Rx channel 0 stream of CF32 samples. Only compiled
// with the `soapy` feature since it links the native SoapySDR library.

use super::{DeviceError, ReadResult, SdrDevice};
use num_complex::Complex32;
use soapysdr::Direction::Rx;
use std::collections::BTreeSet;

/// Driver read timeout, long enough for a frame, short enough that the
/// engine's mailbox stays responsive.
const READ_TIMEOUT_US: i64 = 100_000;

pub struct SoapyDevice {
    dev: soapysdr::Device,
    driver: String,
    stream: Option<soapysdr::RxStream<Complex32>>,
    /// Scratch for the driver's complex samples before interleaving.
    complex_buf: Vec<Complex32>,
    /// Keys written this run; enumeration reads their live values back
    /// from the driver (the binding wraps read/write but not the
    /// ArgInfo introspection list).
    applied_keys: BTreeSet<String>,
}

impl SoapyDevice {
    /// Open the first device matching a SoapySDR args string such as
    /// `driver=rtlsdr` or `driver=sdrplay,serial=...`.
    pub fn open(spec: &str) -> Result<Self, DeviceError> {
        let mut found = soapysdr::enumerate(spec)
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        if found.is_empty() {
            return Err(DeviceError::NotFound(spec.to_string()));
        }
        let args = found.remove(0);
        let driver = args.get("driver").unwrap_or("soapy").to_string();
        let dev = soapysdr::Device::new(args).map_err(|e| DeviceError::Open(e.to_string()))?;
        Ok(Self {
            dev,
            driver,
            stream: None,
            complex_buf: Vec::new(),
            applied_keys: BTreeSet::new(),
        })
    }
}

impl SdrDevice for SoapyDevice {
    fn driver(&self) -> &str {
        &self.driver
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), DeviceError> {
        self.dev
            .set_frequency(Rx, 0, hz, ())
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn frequency(&self) -> Result<f64, DeviceError> {
        self.dev
            .frequency(Rx, 0)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::Config(
                "cannot change rate while streaming".into(),
            ));
        }
        self.dev
            .set_sample_rate(Rx, 0, hz)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn sample_rate(&self) -> Result<f64, DeviceError> {
        self.dev
            .sample_rate(Rx, 0)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn set_gain(&mut self, db: f64) -> Result<(), DeviceError> {
        self.dev
            .set_gain(Rx, 0, db)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn gain(&self) -> Result<f64, DeviceError> {
        self.dev
            .gain(Rx, 0)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn set_agc(&mut self, on: bool) -> Result<(), DeviceError> {
        self.dev
            .set_gain_mode(Rx, 0, on)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn agc(&self) -> Result<bool, DeviceError> {
        self.dev
            .gain_mode(Rx, 0)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn write_setting(&mut self, key: &str, value: &str) -> Result<(), DeviceError> {
        self.dev
            .write_setting(key, value)
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        self.applied_keys.insert(key.to_string());
        Ok(())
    }

    fn read_setting(&self, key: &str) -> Result<String, DeviceError> {
        self.dev
            .read_setting(key)
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    fn settings(&self) -> Result<Vec<(String, String)>, DeviceError> {
        let mut out = Vec::with_capacity(self.applied_keys.len());
        for key in &self.applied_keys {
            match self.dev.read_setting(key) {
                Ok(value) => out.push((key.clone(), value)),
                Err(e) => crate::debug!("setting {key} unreadable: {e}"),
            }
        }
        Ok(out)
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        let mut stream = self
            .dev
            .rx_stream::<Complex32>(&[0])
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        let mtu = stream.mtu().map_err(|e| DeviceError::Stream(e.to_string()))?;
        self.complex_buf.resize(mtu, Complex32::default());
        stream
            .activate(None)
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .deactivate(None)
                .map_err(|e| DeviceError::Stream(e.to_string()))?;
        }
        Ok(())
    }

    fn read(&mut self, scratch: &mut [f32]) -> Result<ReadResult, DeviceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::Stream("stream not started".into()))?;
        let want = (scratch.len() / 2).min(self.complex_buf.len());
        let buf = &mut self.complex_buf[..want];
        match stream.read(&mut [buf], READ_TIMEOUT_US) {
            Ok(n) => {
                for (pair, c) in scratch.chunks_exact_mut(2).zip(&self.complex_buf[..n]) {
                    pair[0] = c.re;
                    pair[1] = c.im;
                }
                Ok(ReadResult {
                    samples: n,
                    overflow: false,
                })
            }
            Err(e) => match e.code {
                soapysdr::ErrorCode::Timeout => Ok(ReadResult::default()),
                soapysdr::ErrorCode::Overflow => Ok(ReadResult {
                    samples: 0,
                    overflow: true,
                }),
                _ => Err(DeviceError::Stream(e.to_string())),
            },
        }
    }
}
