// Ring consumers.
//
// Every sink owns a ring Consumer on its own thread and pulls; the engine
// never pushes. A sink that falls behind is reset by the ring and decides
// for itself what a gap means (the file writer logs it, an HTTP stream
// closes the response).

pub mod file;
pub mod peak;
pub mod power;
pub mod stream;

use crate::ring::{Consumer, Read};
use std::time::Duration;

/// One drain step shared by the sink loops.
pub(crate) enum Pull {
    /// Samples (or a slip notification) arrived.
    Data(Read),
    /// Nothing within the wait window; callers poll their own work.
    Idle,
    /// Ring closed and drained.
    End,
}

/// Read the next chunk, waiting up to `wait` for data. Never spins: an
/// empty ring costs one condvar wait per call.
pub(crate) fn pull(cons: &mut Consumer, buf: &mut [f32], wait: Duration) -> Pull {
    let mut waited = false;
    loop {
        let r = cons.read(buf);
        if r.n > 0 || r.slipped > 0 {
            return Pull::Data(r);
        }
        if cons.at_end() {
            return Pull::End;
        }
        if waited {
            return Pull::Idle;
        }
        cons.wait(wait);
        waited = true;
    }
}
