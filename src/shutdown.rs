// Shutdown coordination.
// A process-wide flag plus the SIGINT hook that turns Ctrl+C into a
// normal engine quit, so containers are finalized the same way as for
// PUT /quit.

use crate::capture::EngineHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Mark the process as shutting down.
pub fn signal_shutdown() {
    SHUTTING_DOWN.store(true, Ordering::SeqCst);
}

/// True after `signal_shutdown()` has been called.
pub fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::SeqCst)
}

/// Route SIGINT through the engine's quit path instead of killing the
/// process mid-write.
pub fn install_sigint_handler(engine: EngineHandle) {
    let result = ctrlc::set_handler(move || {
        crate::info!("interrupt received, stopping capture");
        signal_shutdown();
        engine.quit();
    });
    if let Err(e) = result {
        crate::warn!("could not install interrupt handler: {e}");
    }
}

/// Join sink threads, abandoning any that outlive the deadline. The
/// process is exiting anyway; a stuck sink must not hold it hostage.
pub fn join_with_deadline(handles: Vec<(&'static str, JoinHandle<()>)>, deadline: Duration) {
    let end = Instant::now() + deadline;
    for (name, handle) in handles {
        while !handle.is_finished() && Instant::now() < end {
            std::thread::sleep(Duration::from_millis(20));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            crate::warn!("{name} sink did not stop in time, abandoning it");
        }
    }
}

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod tests;
