// Capture engine: the producer side of the pipeline.
//
// A dedicated thread owns the SDR device and feeds the ring. Control
// arrives through an mpsc mailbox polled between frames, so a frame
// already read is always committed before a command takes effect, and
// every sample after a retune carries the new tuning.

mod params;
pub use params::{ParamStore, RadioParams};

use crate::device::{DeviceError, SdrDevice};
use crate::ring::IqRing;
use crate::sink::file::{FileCommand, SessionSpec};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// Consecutive hard read failures tolerated before the engine gives up.
const MAX_READ_ERRORS: u32 = 10;

/// Errors surfaced to control-plane callers and the process exit path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("recording session open; pause first")]
    RecordingOpen,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("capture engine stopped")]
    Stopped,
}

/// Counters shared with sinks and the control plane.
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Driver overflow reports, monotonically counted.
    pub overflow_total: AtomicU64,
    /// Frames committed to the ring.
    pub frames: AtomicU64,
    live: AtomicBool,
}

impl CaptureStats {
    /// True once the first frame has been published and until shutdown.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

type Reply<T = ()> = oneshot::Sender<Result<T, EngineError>>;

/// Commands posted by the control plane, applied between frames.
pub enum EngineCommand {
    SetFrequency(f64, Reply),
    SetGain(f64, Reply),
    SetAgc(bool, Reply),
    SetSetting(String, String, Reply),
    /// Rejected while a recording session is open; otherwise brackets the
    /// device with stop_stream / start_stream.
    SetRate(f64, Reply),
    /// `true` closes the session, `false` opens a fresh one.
    Pause(bool, Reply),
    GetSetting(String, Reply<String>),
    ListSettings(Reply<Vec<(String, String)>>),
    Quit,
}

/// Cloneable handle used by the HTTP server, the SIGINT hook and `run()`.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineCommand>,
    params: Arc<ParamStore>,
    stats: Arc<CaptureStats>,
}

impl EngineHandle {
    pub fn snapshot(&self) -> Arc<RadioParams> {
        self.params.load()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn stats_arc(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub fn params_arc(&self) -> Arc<ParamStore> {
        Arc::clone(&self.params)
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> EngineCommand) -> oneshot::Receiver<Result<T, EngineError>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(make(reply));
        rx
    }

    pub fn set_frequency(&self, hz: f64) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::SetFrequency(hz, r))
    }

    pub fn set_gain(&self, db: f64) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::SetGain(db, r))
    }

    pub fn set_agc(&self, on: bool) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::SetAgc(on, r))
    }

    pub fn set_rate(&self, hz: f64) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::SetRate(hz, r))
    }

    pub fn set_setting(&self, key: String, value: String) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::SetSetting(key, value, r))
    }

    pub fn pause(&self, paused: bool) -> oneshot::Receiver<Result<(), EngineError>> {
        self.request(|r| EngineCommand::Pause(paused, r))
    }

    pub fn get_setting(&self, key: String) -> oneshot::Receiver<Result<String, EngineError>> {
        self.request(|r| EngineCommand::GetSetting(key, r))
    }

    pub fn list_settings(&self) -> oneshot::Receiver<Result<Vec<(String, String)>, EngineError>> {
        self.request(EngineCommand::ListSettings)
    }

    /// Schedule engine shutdown; idempotent and safe after exit.
    pub fn quit(&self) {
        let _ = self.tx.send(EngineCommand::Quit);
    }
}

/// Initial configuration applied to the device before the loop starts.
pub struct CaptureConfig {
    pub frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub gain_db: f64,
    pub agc: bool,
    /// Opaque driver settings applied at open (biastee, iq_swap, ...).
    pub settings: Vec<(String, String)>,
    /// Complex samples per device read.
    pub packet_size: usize,
    /// Start with a recording session open.
    pub start_recording: bool,
}

struct Engine {
    device: Box<dyn SdrDevice>,
    ring: IqRing,
    rx: Receiver<EngineCommand>,
    params: Arc<ParamStore>,
    stats: Arc<CaptureStats>,
    file_tx: Sender<FileCommand>,
    recording: bool,
    scratch: Vec<f32>,
}

/// Configure the device, start streaming and spawn the engine thread.
/// Configuration failures are fatal here, before any thread exists.
pub fn spawn(
    mut device: Box<dyn SdrDevice>,
    ring: IqRing,
    file_tx: Sender<FileCommand>,
    cfg: CaptureConfig,
) -> Result<(EngineHandle, JoinHandle<Result<(), EngineError>>), EngineError> {
    device.set_sample_rate(cfg.sample_rate_hz)?;
    device.set_frequency(cfg.frequency_hz)?;
    device.set_gain(cfg.gain_db)?;
    device.set_agc(cfg.agc)?;
    for (key, value) in &cfg.settings {
        device.write_setting(key, value)?;
    }
    device.start_stream()?;

    let params = Arc::new(ParamStore::new(RadioParams {
        driver: device.driver().to_string(),
        frequency_hz: cfg.frequency_hz,
        sample_rate_hz: cfg.sample_rate_hz,
        gain_db: cfg.gain_db,
        agc: cfg.agc,
        recording: false,
    }));
    let stats = Arc::new(CaptureStats::default());
    let (tx, rx) = mpsc::channel();

    let handle = EngineHandle {
        tx,
        params: Arc::clone(&params),
        stats: Arc::clone(&stats),
    };

    let mut engine = Engine {
        scratch: vec![0.0; cfg.packet_size.max(1) * 2],
        device,
        ring,
        rx,
        params,
        stats,
        file_tx,
        recording: false,
    };
    let start_recording = cfg.start_recording;
    let thread = thread::spawn(move || engine.run(start_recording));

    Ok((handle, thread))
}

impl Engine {
    fn run(&mut self, start_recording: bool) -> Result<(), EngineError> {
        crate::info!(
            "capture started: {} at {} S/s",
            self.device.driver(),
            self.snapshot().sample_rate_hz
        );
        if start_recording {
            self.open_recording();
        }

        let mut consecutive_errors = 0u32;
        let result = loop {
            match self.device.read(&mut self.scratch) {
                Ok(r) => {
                    consecutive_errors = 0;
                    if r.overflow {
                        self.stats.overflow_total.fetch_add(1, Ordering::AcqRel);
                    }
                    if r.samples > 0 {
                        self.ring.publish(&self.scratch[..r.samples * 2]);
                        self.stats.frames.fetch_add(1, Ordering::AcqRel);
                        self.stats.live.store(true, Ordering::Release);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    crate::warn!("device read failed ({consecutive_errors}): {e}");
                    if consecutive_errors >= MAX_READ_ERRORS {
                        crate::error!("sustained device failure, stopping capture");
                        break Err(EngineError::Device(e));
                    }
                }
            }

            match self.drain_mailbox() {
                ControlFlow::Continue => {}
                ControlFlow::Quit => break Ok(()),
            }
        };

        self.teardown();
        result
    }

    fn drain_mailbox(&mut self) -> ControlFlow {
        loop {
            match self.rx.try_recv() {
                Ok(EngineCommand::Quit) => return ControlFlow::Quit,
                Ok(cmd) => self.apply(cmd),
                Err(TryRecvError::Empty) => return ControlFlow::Continue,
                // Every handle dropped: nothing can control us any more.
                Err(TryRecvError::Disconnected) => return ControlFlow::Quit,
            }
        }
    }

    fn apply(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::SetFrequency(hz, reply) => {
                let result = self.device.set_frequency(hz).map_err(EngineError::from);
                if result.is_ok() {
                    self.update_params(|p| p.frequency_hz = hz);
                    crate::info!("tuned to {hz} Hz");
                }
                let _ = reply.send(result);
            }
            EngineCommand::SetGain(db, reply) => {
                let result = self.device.set_gain(db).map_err(EngineError::from);
                if result.is_ok() {
                    self.update_params(|p| p.gain_db = db);
                }
                let _ = reply.send(result);
            }
            EngineCommand::SetAgc(on, reply) => {
                let result = self.device.set_agc(on).map_err(EngineError::from);
                if result.is_ok() {
                    self.update_params(|p| p.agc = on);
                }
                let _ = reply.send(result);
            }
            EngineCommand::SetSetting(key, value, reply) => {
                let result = self
                    .device
                    .write_setting(&key, &value)
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineCommand::SetRate(hz, reply) => {
                let _ = reply.send(self.change_rate(hz));
            }
            EngineCommand::Pause(paused, reply) => {
                if paused {
                    self.close_recording();
                } else {
                    self.open_recording();
                }
                let _ = reply.send(Ok(()));
            }
            EngineCommand::GetSetting(key, reply) => {
                let _ = reply.send(self.device.read_setting(&key).map_err(EngineError::from));
            }
            EngineCommand::ListSettings(reply) => {
                let _ = reply.send(self.device.settings().map_err(EngineError::from));
            }
            EngineCommand::Quit => unreachable!("handled by drain_mailbox"),
        }
    }

    fn change_rate(&mut self, hz: f64) -> Result<(), EngineError> {
        if self.recording {
            return Err(EngineError::RecordingOpen);
        }
        let old = self.snapshot().sample_rate_hz;
        self.device.stop_stream()?;
        if let Err(e) = self.device.set_sample_rate(hz) {
            // Best effort: put the stream back at the old rate.
            let _ = self.device.set_sample_rate(old);
            let _ = self.device.start_stream();
            return Err(e.into());
        }
        self.device.start_stream()?;
        self.update_params(|p| p.sample_rate_hz = hz);
        crate::info!("sample rate changed to {hz} S/s");
        Ok(())
    }

    fn open_recording(&mut self) {
        if self.recording {
            return;
        }
        let p = self.snapshot();
        let spec = SessionSpec {
            center_freq_hz: p.frequency_hz,
            sample_rate_hz: p.sample_rate_hz,
            start: Utc::now(),
        };
        if self.file_tx.send(FileCommand::Open(spec)).is_ok() {
            self.recording = true;
            self.update_params(|p| p.recording = true);
        }
    }

    fn close_recording(&mut self) {
        if !self.recording {
            return;
        }
        let _ = self.file_tx.send(FileCommand::Close);
        self.recording = false;
        self.update_params(|p| p.recording = false);
    }

    fn teardown(&mut self) {
        self.close_recording();
        if let Err(e) = self.device.stop_stream() {
            crate::warn!("device stop failed: {e}");
        }
        self.stats.live.store(false, Ordering::Release);
        self.ring.close();
        crate::info!("capture stopped after {} frames", self.stats.frames.load(Ordering::Acquire));
    }

    fn snapshot(&self) -> Arc<RadioParams> {
        self.params.load()
    }

    fn update_params(&self, f: impl FnOnce(&mut RadioParams)) {
        let mut p = (*self.params.load()).clone();
        f(&mut p);
        self.params.store(p);
    }
}

enum ControlFlow {
    Continue,
    Quit,
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
