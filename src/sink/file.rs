// File-writer sink: recording sessions on disk.
//
// Runs on its own thread with a small mailbox for open/close, so pausing
// never touches the capture loop. A session is one output file; its size
// fields are patched in place at least once a second so a crash leaves a
// playable capture.

use crate::container::{
    self, AuxiInfo, ContainerKind, SampleEncoding, f32_to_le_bytes, f32_to_s16_bytes,
};
use crate::ring::Consumer;
use crate::sink::{pull, Pull};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the in-place size patch runs.
const PATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Commands from the capture engine.
#[derive(Debug)]
pub enum FileCommand {
    Open(SessionSpec),
    Close,
}

/// Radio state stamped into the session at open time.
#[derive(Debug, Clone, Copy)]
pub struct SessionSpec {
    pub center_freq_hz: f64,
    pub sample_rate_hz: f64,
    pub start: DateTime<Utc>,
}

/// Static output configuration from the CLI.
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output stem; freq/rate/timestamp suffix and extension are appended.
    pub output: PathBuf,
    pub container: ContainerKind,
    pub encoding: SampleEncoding,
    /// False with --notimestamp: fixed name, truncated per session.
    pub timestamp: bool,
}

impl FileSinkConfig {
    fn extension(&self) -> &'static str {
        match self.container {
            ContainerKind::Cf32 => "cf32",
            _ => "wav",
        }
    }

    /// `<output>[_<freq>_<rate>_<YYYYMMDDhhmmss>].<ext>`
    fn session_path(&self, spec: &SessionSpec) -> PathBuf {
        let stem = self.output.display();
        let name = if self.timestamp {
            format!(
                "{}_{}_{}_{}.{}",
                stem,
                spec.center_freq_hz.round() as u64,
                spec.sample_rate_hz.round() as u64,
                spec.start.format("%Y%m%d%H%M%S"),
                self.extension()
            )
        } else {
            format!("{}.{}", stem, self.extension())
        };
        PathBuf::from(name)
    }

    fn slip_log_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.slips.jsonl", self.output.display()))
    }
}

/// One line of the slip sidecar: a gap in the recorded stream.
#[derive(Serialize)]
struct SlipRecord<'a> {
    time: String,
    path: &'a str,
    /// Slip events observed in this read (each one is a ring reset).
    slips: u64,
    /// Payload bytes written before the gap.
    data_bytes: u64,
}

struct Session {
    file: BufWriter<File>,
    path: PathBuf,
    kind: ContainerKind,
    enc: SampleEncoding,
    data_bytes: u64,
    last_patch: Instant,
}

impl Session {
    fn open(cfg: &FileSinkConfig, spec: &SessionSpec) -> io::Result<Self> {
        let path = cfg.session_path(spec);
        let info = AuxiInfo {
            start: spec.start,
            center_freq_hz: spec.center_freq_hz.round() as u32,
            sample_rate_hz: spec.sample_rate_hz.round() as u32,
            encoding: cfg.encoding,
        };
        let mut file = BufWriter::new(File::create(&path)?);
        file.write_all(&container::recording_header(cfg.container, &info))?;
        crate::info!("recording to {}", path.display());
        Ok(Self {
            file,
            path,
            kind: cfg.container,
            enc: cfg.encoding,
            data_bytes: 0,
            last_patch: Instant::now(),
        })
    }

    fn write_samples(&mut self, samples: &[f32], scratch: &mut Vec<u8>) -> io::Result<()> {
        match self.enc {
            SampleEncoding::F32 => f32_to_le_bytes(samples, scratch),
            SampleEncoding::S16 => f32_to_s16_bytes(samples, scratch),
        }
        self.file.write_all(scratch)?;
        self.data_bytes += scratch.len() as u64;
        if self.last_patch.elapsed() >= PATCH_INTERVAL {
            self.patch()?;
        }
        Ok(())
    }

    fn patch(&mut self) -> io::Result<()> {
        self.file.flush()?;
        container::patch_sizes(self.file.get_mut(), self.kind, self.enc, self.data_bytes)?;
        self.last_patch = Instant::now();
        Ok(())
    }

    fn close(mut self, stop: DateTime<Utc>) -> io::Result<PathBuf> {
        self.file.flush()?;
        let data_bytes = self.data_bytes;
        let file = self.file.get_mut();
        container::patch_sizes(file, self.kind, self.enc, data_bytes)?;
        if self.kind != ContainerKind::Cf32 {
            container::patch_stop_time(file, data_bytes, stop)?;
        }
        if self.kind == ContainerKind::Wav && container::needs_rf64(data_bytes) {
            crate::info!("payload passed 4 GiB, promoting {} to RF64", self.path.display());
            container::promote_to_rf64(file, self.enc, data_bytes)?;
        }
        file.sync_all()?;
        crate::info!("closed {} ({} bytes)", self.path.display(), data_bytes);
        Ok(self.path)
    }
}

/// Spawn the file-writer thread. It exits when the ring closes, after
/// finalizing any open session.
pub fn spawn(
    mut cons: Consumer,
    commands: Receiver<FileCommand>,
    cfg: FileSinkConfig,
) -> JoinHandle<()> {
    thread::spawn(move || run(&mut cons, &commands, &cfg))
}

fn run(cons: &mut Consumer, commands: &Receiver<FileCommand>, cfg: &FileSinkConfig) {
    let mut session: Option<Session> = None;
    let mut buf = vec![0.0f32; 32 * 1024];
    let mut scratch = Vec::new();

    loop {
        // Apply control first so a Close lands before more samples do.
        loop {
            match commands.try_recv() {
                Ok(FileCommand::Open(spec)) => {
                    close_session(session.take());
                    match Session::open(cfg, &spec) {
                        Ok(s) => session = Some(s),
                        Err(e) => crate::warn!("could not open recording: {e}"),
                    }
                }
                Ok(FileCommand::Close) => close_session(session.take()),
                Err(TryRecvError::Empty) => break,
                // Engine gone; the ring EOF below ends the loop.
                Err(TryRecvError::Disconnected) => break,
            }
        }

        match pull(cons, &mut buf, Duration::from_millis(100)) {
            Pull::End => break,
            Pull::Idle => continue,
            Pull::Data(r) => {
                if r.slipped > 0 {
                    crate::warn!("file writer fell behind, {} slip(s); gap recorded", r.slipped);
                    if let Some(s) = session.as_ref() {
                        log_slip(cfg, s, r.slipped);
                    }
                }
                if r.n == 0 {
                    continue;
                }
                if let Some(mut s) = session.take() {
                    match s.write_samples(&buf[..r.n], &mut scratch) {
                        Ok(()) => session = Some(s),
                        Err(e) => {
                            // Capture goes on; the next unpause starts fresh.
                            crate::warn!("write failed on {}: {e}; closing session", s.path.display());
                            close_session(Some(s));
                        }
                    }
                }
            }
        }
    }

    close_session(session.take());
}

fn close_session(session: Option<Session>) {
    if let Some(s) = session {
        if let Err(e) = s.close(Utc::now()) {
            crate::warn!("session finalization failed: {e}");
        }
    }
}

/// Append one JSON line to the slip sidecar; data lost at a slip is not
/// recoverable, so it must at least be discoverable.
fn log_slip(cfg: &FileSinkConfig, session: &Session, slips: u64) {
    let path = session.path.display().to_string();
    let record = SlipRecord {
        time: Utc::now().to_rfc3339(),
        path: &path,
        slips,
        data_bytes: session.data_bytes,
    };
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(cfg.slip_log_path())
        .and_then(|mut f| {
            let line = serde_json::to_string(&record).unwrap_or_default();
            writeln!(f, "{line}")
        });
    if let Err(e) = result {
        crate::warn!("could not write slip log: {e}");
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod tests;
