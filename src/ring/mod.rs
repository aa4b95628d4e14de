// Single-producer multi-consumer ring buffer over interleaved IQ samples.
//
// The capture engine publishes frames; any number of sinks read through
// independent cursors. The producer never waits on a consumer: a reader
// that falls more than the capacity behind is skipped forward at publish
// time and its slip counter incremented. Storage sits behind a mutex so
// copies are bounded-duration critical sections; cursors are unbounded
// 64-bit counters that wrap onto storage only when indexing.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest storage allocation accepted, in f32 elements (4 GiB).
const MAX_ELEMS: u64 = 4 * 1024 * 1024 * 1024 / 4;

/// Error type for ring construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring capacity must be greater than 0")]
    ZeroCapacity,
    #[error("ring capacity {0} elements exceeds maximum {MAX_ELEMS}")]
    TooLarge(u64),
}

/// Outcome of one consumer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Read {
    /// Elements copied into the caller's buffer (always an even count).
    pub n: usize,
    /// Slip events since the previous read: each one means this consumer
    /// fell behind and was reset past a gap. Zero for a gapless stream.
    pub slipped: u64,
}

#[derive(Debug)]
struct Slot {
    cursor: AtomicU64,
    slip_count: AtomicU64,
    active: AtomicBool,
}

#[derive(Debug)]
struct Shared {
    storage: Mutex<Box<[f32]>>,
    capacity: u64,
    mask: u64,
    margin: u64,
    producer: AtomicU64,
    closed: AtomicBool,
    consumers: Mutex<Vec<Arc<Slot>>>,
    wait_lock: Mutex<()>,
    data_cond: Condvar,
}

/// Shared SPMC ring over f32 elements (I and Q interleaved, so cursors
/// always advance by even amounts and stay sample-aligned).
#[derive(Debug)]
pub struct IqRing {
    shared: Arc<Shared>,
}

/// One subscriber's read handle. Dropping it unsubscribes.
pub struct Consumer {
    shared: Arc<Shared>,
    slot: Arc<Slot>,
    /// Slip events already reported to the caller.
    seen_slips: u64,
}

impl IqRing {
    /// Create a ring with at least `capacity` f32 elements of storage,
    /// rounded up to a power of two. `margin` is the headroom kept ahead
    /// of a reset reader, normally one maximum frame worth of elements.
    pub fn new(capacity: usize, margin: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        let capacity = (capacity as u64).next_power_of_two();
        if capacity > MAX_ELEMS {
            return Err(RingError::TooLarge(capacity));
        }
        // Keep the margin even (sample-aligned) and clearly below capacity.
        let margin = ((margin as u64) + 1) / 2 * 2;
        let margin = margin.clamp(2, capacity / 2);
        Ok(Self {
            shared: Arc::new(Shared {
                storage: Mutex::new(vec![0.0; capacity as usize].into_boxed_slice()),
                capacity,
                mask: capacity - 1,
                margin,
                producer: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
                wait_lock: Mutex::new(()),
                data_cond: Condvar::new(),
            }),
        })
    }

    /// Ring capacity in f32 elements.
    pub fn capacity(&self) -> u64 {
        self.shared.capacity
    }

    /// Total elements committed by the producer since construction.
    pub fn committed(&self) -> u64 {
        self.shared.producer.load(Ordering::Acquire)
    }

    /// True once `close()` has been called. Consumers drain what remains
    /// and then observe end of stream.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Publish a frame of interleaved I/Q values. Never blocks on a
    /// consumer; lagging consumers are reset instead. Commits run in
    /// margin-sized pieces so a reset reader always keeps its headroom.
    pub fn publish(&self, frame: &[f32]) {
        debug_assert!(frame.len() % 2 == 0, "frames are whole IQ pairs");
        for piece in frame.chunks(self.shared.margin as usize) {
            self.publish_piece(piece);
        }
        self.notify_waiters();
    }

    fn publish_piece(&self, piece: &[f32]) {
        let sh = &self.shared;
        let pos = sh.producer.load(Ordering::Relaxed);
        {
            let mut storage = sh.storage.lock();
            let idx = (pos & sh.mask) as usize;
            let cap = sh.capacity as usize;
            if idx + piece.len() <= cap {
                storage[idx..idx + piece.len()].copy_from_slice(piece);
            } else {
                let first = cap - idx;
                storage[idx..].copy_from_slice(&piece[..first]);
                storage[..piece.len() - first].copy_from_slice(&piece[first..]);
            }
        }
        let new_pos = pos + piece.len() as u64;
        sh.producer.store(new_pos, Ordering::Release);
        self.sweep_laggards(new_pos);
    }

    /// Reset any consumer that has fallen more than the capacity behind.
    fn sweep_laggards(&self, producer: u64) {
        let sh = &self.shared;
        let mut consumers = sh.consumers.lock();
        consumers.retain(|slot| slot.active.load(Ordering::Acquire));
        for slot in consumers.iter() {
            loop {
                let cursor = slot.cursor.load(Ordering::Acquire);
                if producer.wrapping_sub(cursor) <= sh.capacity {
                    break;
                }
                let target = producer - (sh.capacity - sh.margin);
                match slot.cursor.compare_exchange(
                    cursor,
                    target,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.slip_count.fetch_add(1, Ordering::AcqRel);
                        break;
                    }
                    // The reader advanced concurrently; re-check its lag.
                    Err(_) => continue,
                }
            }
        }
    }

    /// Register a reader starting at the live producer cursor; late
    /// subscribers see only future samples.
    pub fn subscribe(&self) -> Consumer {
        let slot = Arc::new(Slot {
            cursor: AtomicU64::new(self.shared.producer.load(Ordering::Acquire)),
            slip_count: AtomicU64::new(0),
            active: AtomicBool::new(true),
        });
        self.shared.consumers.lock().push(Arc::clone(&slot));
        Consumer {
            shared: Arc::clone(&self.shared),
            slot,
            seen_slips: 0,
        }
    }

    /// Mark end of stream and wake all waiting consumers.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.notify_waiters();
    }

    /// Wake consumers parked in `Consumer::wait`. Taking the wait lock
    /// here closes the window between a waiter's re-check and its sleep.
    fn notify_waiters(&self) {
        let _guard = self.shared.wait_lock.lock();
        self.shared.data_cond.notify_all();
    }
}

impl Clone for IqRing {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Consumer {
    /// Elements published but not yet read through this handle.
    pub fn lag(&self) -> u64 {
        let producer = self.shared.producer.load(Ordering::Acquire);
        producer.saturating_sub(self.slot.cursor.load(Ordering::Acquire))
    }

    /// Slip events recorded against this consumer so far.
    pub fn slip_count(&self) -> u64 {
        self.slot.slip_count.load(Ordering::Acquire)
    }

    /// True when the ring is closed and this consumer has drained it.
    pub fn at_end(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) && self.lag() == 0
    }

    /// Copy up to `buf.len()` elements, advancing the cursor. Reports any
    /// slip that happened since the previous read; after a slip the data
    /// returned starts at the reset position (the gap is not back-filled).
    pub fn read(&mut self, buf: &mut [f32]) -> Read {
        debug_assert!(buf.len() % 2 == 0, "reads are whole IQ pairs");
        loop {
            let sh = &self.shared;
            let cursor = self.slot.cursor.load(Ordering::Acquire);
            let producer = sh.producer.load(Ordering::Acquire);
            let avail = producer.saturating_sub(cursor);
            if avail == 0 {
                return Read {
                    n: 0,
                    slipped: self.take_slips(),
                };
            }
            let n = avail.min(buf.len() as u64) as usize;
            {
                let storage = sh.storage.lock();
                // Re-check under the lock: the producer cannot copy while
                // we hold it, so if the region was intact here it stays
                // intact for the whole copy.
                let producer = sh.producer.load(Ordering::Acquire);
                if producer.wrapping_sub(cursor) > sh.capacity {
                    drop(storage);
                    self.reset_self(producer);
                    continue;
                }
                let idx = (cursor & sh.mask) as usize;
                let cap = sh.capacity as usize;
                if idx + n <= cap {
                    buf[..n].copy_from_slice(&storage[idx..idx + n]);
                } else {
                    let first = cap - idx;
                    buf[..first].copy_from_slice(&storage[idx..]);
                    buf[first..n].copy_from_slice(&storage[..n - first]);
                }
            }
            match self.slot.cursor.compare_exchange(
                cursor,
                cursor + n as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Read {
                        n,
                        slipped: self.take_slips(),
                    }
                }
                // The producer reset us mid-read; the copy may straddle the
                // overwrite, so discard it and read again from the new spot.
                Err(_) => continue,
            }
        }
    }

    /// Block until data is available, the ring closes, or `timeout`
    /// elapses. Spurious wakeups are allowed.
    pub fn wait(&self, timeout: Duration) {
        if self.lag() > 0 || self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.shared.wait_lock.lock();
        if self.lag() == 0 && !self.shared.closed.load(Ordering::Acquire) {
            self.shared.data_cond.wait_for(&mut guard, timeout);
        }
    }

    fn reset_self(&mut self, producer: u64) {
        let target = producer - (self.shared.capacity - self.shared.margin);
        let cursor = self.slot.cursor.load(Ordering::Acquire);
        if cursor < target
            && self
                .slot
                .cursor
                .compare_exchange(cursor, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.slot.slip_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Slip events not yet reported through `Read::slipped`.
    fn take_slips(&mut self) -> u64 {
        let total = self.slot.slip_count.load(Ordering::Acquire);
        let fresh = total - self.seen_slips;
        self.seen_slips = total;
        fresh
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.slot.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
