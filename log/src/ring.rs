//! Bounded diagnostic ring shared between a configuration context and its
//! filesystem driver.
//!
//! Writers may live on a different thread than the reader, so the ring is a
//! mutex-protected fixed array. The context side drains it one line per read;
//! a driver that kept its own handle may keep writing after the context's
//! descriptor is gone.

use std::borrow::Cow;
use std::sync::Mutex;

/// Number of slots in the ring. Power of two so slot indexing can mask the
/// monotonic counters.
pub const LOG_CAPACITY: usize = 8;

/// Bounded FIFO of diagnostic lines with explicit buffer ownership:
/// `Cow::Owned` lines are released by whoever pops them, `Cow::Borrowed`
/// lines are static and never freed.
pub struct DiagLog {
    inner: Mutex<Ring>,
}

struct Ring {
    slots: [Option<Cow<'static, str>>; LOG_CAPACITY],
    head: u64,
    tail: u64,
}

impl DiagLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Ring {
                slots: std::array::from_fn(|_| None),
                head: 0,
                tail: 0,
            }),
        }
    }

    /// Append one line. When the ring is full the new line is dropped so the
    /// earliest diagnostics survive.
    pub fn push(&self, line: Cow<'static, str>) {
        let mut ring = self.inner.lock().expect("diag log mutex poisoned");
        if ring.head - ring.tail >= LOG_CAPACITY as u64 {
            tracing::debug!("diagnostic ring full, dropping: {}", line);
            return;
        }
        let index = (ring.head & (LOG_CAPACITY as u64 - 1)) as usize;
        ring.slots[index] = Some(line);
        ring.head += 1;
    }

    /// Append a static line without allocating.
    pub fn push_static(&self, line: &'static str) {
        self.push(Cow::Borrowed(line));
    }

    /// Informational line, prefixed `i `.
    pub fn info(&self, msg: impl std::fmt::Display) {
        self.push(Cow::Owned(format!("i {msg}")));
    }

    /// Warning line, prefixed `w `.
    pub fn warn(&self, msg: impl std::fmt::Display) {
        self.push(Cow::Owned(format!("w {msg}")));
    }

    /// Error line, prefixed `e `.
    pub fn error(&self, msg: impl std::fmt::Display) {
        self.push(Cow::Owned(format!("e {msg}")));
    }

    /// Remove and return the oldest unread line, transferring ownership of
    /// its buffer to the caller. `None` when nothing is pending.
    pub fn pop_front(&self) -> Option<Cow<'static, str>> {
        let mut ring = self.inner.lock().expect("diag log mutex poisoned");
        if ring.head == ring.tail {
            return None;
        }
        let index = (ring.tail & (LOG_CAPACITY as u64 - 1)) as usize;
        let line = ring.slots[index].take();
        ring.tail += 1;
        line
    }

    /// Number of pushed-but-unread lines. Never exceeds the capacity.
    pub fn pending(&self) -> usize {
        let ring = self.inner.lock().expect("diag log mutex poisoned");
        (ring.head - ring.tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl Default for DiagLog {
    fn default() -> Self {
        Self::new()
    }
}
