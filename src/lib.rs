// iqtap: capture complex-baseband IQ from an SDR front end, record it to
// WAV/RF64/CF32, serve live copies over HTTP, and expose a small REST
// control plane.

pub mod capture;
pub mod cli;
pub mod container;
pub mod device;
pub mod ring;
pub mod server;
pub mod shutdown;
pub mod sink;

// Re-export log macros for use throughout the crate
pub use log::{debug, error, info, trace, warn};

use crate::capture::EngineError;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Sinks get this long to drain and finalize after the engine stops.
const SINK_DRAIN_DEADLINE: Duration = Duration::from_secs(3);

/// Lines buffered per telemetry feed before slow readers skip.
const FEED_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ring(#[from] ring::RingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire the pipeline together and run until `/quit`, SIGINT, or a fatal
/// device failure.
pub fn run(cli: cli::Cli) -> Result<(), AppError> {
    let ring = ring::IqRing::new(cli.ring_elems(), cli.packet_size * 2)?;
    let device = device::open(&cli.device, cli.rate).map_err(EngineError::from)?;

    // Subscribe the long-lived sinks before the first frame is published
    // so a recording that starts immediately misses nothing.
    let file_cons = ring.subscribe();
    let peak_cons = ring.subscribe();
    let power_cons = ring.subscribe();

    let (file_tx, file_rx) = mpsc::channel();
    let (engine, engine_thread) = capture::spawn(
        device,
        ring.clone(),
        file_tx,
        capture::CaptureConfig {
            frequency_hz: cli.frequency,
            sample_rate_hz: cli.rate,
            gain_db: cli.gain,
            agc: cli.agc,
            settings: cli.device_settings(),
            packet_size: cli.packet_size,
            start_recording: !cli.pause,
        },
    )?;

    let (peak_tx, _) = broadcast::channel(FEED_DEPTH);
    let (power_tx, _) = broadcast::channel(FEED_DEPTH);
    let file_thread = sink::file::spawn(file_cons, file_rx, cli.file_config());
    let peak_thread = sink::peak::spawn(
        peak_cons,
        engine.stats_arc(),
        peak_tx.clone(),
        cli.refresh_interval(),
    );
    let power_thread = sink::power::spawn(
        power_cons,
        engine.params_arc(),
        power_tx.clone(),
        cli.power_config(),
    );

    shutdown::install_sigint_handler(engine.clone());

    // The engine owns process lifetime: when its thread ends (quit, SIGINT
    // or fatal device error) the server is told to drain and stop.
    let (quit_tx, quit_rx) = watch::channel(false);
    let engine_result: Arc<Mutex<Option<Result<(), EngineError>>>> = Arc::new(Mutex::new(None));
    let monitor = {
        let engine_result = Arc::clone(&engine_result);
        thread::spawn(move || {
            let result = engine_thread.join().unwrap_or(Err(EngineError::Stopped));
            *engine_result.lock() = Some(result);
            shutdown::signal_shutdown();
            let _ = quit_tx.send(true);
        })
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if cli.meter {
        runtime.spawn(print_feed(peak_tx.subscribe()));
    }
    if cli.waterfall {
        runtime.spawn(print_feed(power_tx.subscribe()));
    }

    let state = server::AppState {
        engine: engine.clone(),
        ring: ring.clone(),
        peak: peak_tx,
        power: power_tx,
    };
    let served = runtime.block_on(server::serve(
        (cli.hostname.clone(), cli.port),
        state,
        quit_rx,
    ));

    // Server is down (gracefully or not); stop the producer and give the
    // sinks a bounded window to flush trailers.
    engine.quit();
    let _ = monitor.join();
    shutdown::join_with_deadline(
        vec![
            ("file", file_thread),
            ("peak", peak_thread),
            ("power", power_thread),
        ],
        SINK_DRAIN_DEADLINE,
    );
    drop(runtime);

    served?;
    let result = engine_result.lock().take();
    match result {
        Some(Err(e)) => Err(e.into()),
        _ => Ok(()),
    }
}

/// Console feed: mirror a telemetry broadcast to stderr.
async fn print_feed(mut rx: broadcast::Receiver<String>) {
    loop {
        match rx.recv().await {
            Ok(line) => eprintln!("{line}"),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
