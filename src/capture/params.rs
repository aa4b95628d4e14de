// Published radio parameter state.
//
// The engine is the only writer; it swaps a fresh Arc in after the device
// accepts a change. Readers clone the Arc under a read lock and never
// touch the engine's path again.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Immutable snapshot of the radio state, as last applied to the device.
#[derive(Debug, Clone, Serialize)]
pub struct RadioParams {
    pub driver: String,
    pub frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub gain_db: f64,
    pub agc: bool,
    /// True while a recording session is open (unpaused).
    pub recording: bool,
}

pub struct ParamStore {
    slot: RwLock<Arc<RadioParams>>,
}

impl ParamStore {
    pub fn new(initial: RadioParams) -> Self {
        Self {
            slot: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot; cheap enough for every GET handler.
    pub fn load(&self) -> Arc<RadioParams> {
        Arc::clone(&self.slot.read())
    }

    pub fn store(&self, params: RadioParams) {
        *self.slot.write() = Arc::new(params);
    }
}
