// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(test)]
thread_local! {
    /// Makes `allocate` fail on the current thread.
    pub(crate) static FAIL_ALLOCATIONS: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Allocates an empty buffer with room for exactly `size` bytes, reporting
/// failure instead of aborting.
pub(crate) fn allocate(size: usize) -> Result<Vec<u8>> {
    #[cfg(test)]
    {
        if FAIL_ALLOCATIONS.with(|fail| fail.get()) {
            return Err(Error::AllocationFailure { size });
        }
    }

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| Error::AllocationFailure { size })?;
    Ok(buffer)
}

/// A snapshot of the bookkeeping of a channel. The three byte counters are
/// logical offsets: they only ever grow and are never reset.
///
/// The counters and `pending_consume` are taken together. An item the
/// consumer is taking off the pending read queue at that moment is counted
/// in `written` but in neither pending count, so `pending_read` can lag by
/// one item while a read is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Total bytes ever written.
    pub written: usize,
    /// Total bytes ever handed out by `read`.
    pub read: usize,
    /// Total bytes ever released by `consume`.
    pub consumed: usize,
    /// Items written but not yet read.
    pub pending_read: usize,
    /// Items read but not yet consumed.
    pub pending_consume: usize,
    /// The arena size or the current heap budget.
    pub capacity: usize,
}

impl Stats {
    /// Bytes written but not yet released, which count against the capacity.
    pub fn outstanding(&self) -> usize {
        self.written - self.consumed
    }
}

/// Represents the producer side of a channel.
pub trait Producer: Send {
    /// Returns the arena size or the current heap budget.
    fn capacity(&self) -> usize;

    /// Copies `data` into the channel as a single item. If there is not
    /// enough free capacity, then this method blocks until the consumer
    /// releases enough items. Writing an empty item is allowed.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Returns the current bookkeeping of the channel.
    fn stats(&self) -> Stats;
}

/// Represents the consumer side of a channel. Every `read` must be matched
/// by exactly one later `consume`, and they are paired in FIFO order. The
/// slice returned by `read` borrows the consumer, so it cannot outlive the
/// `consume` that releases its storage.
pub trait Consumer: Send {
    /// Returns the arena size or the current heap budget.
    fn capacity(&self) -> usize;

    /// Returns the oldest unread item, blocking until one is written.
    fn read(&self) -> Result<&[u8]>;

    /// Same as `read`, but gives up and returns `None` when nothing was
    /// written within `timeout`.
    fn read_timeout(&self, timeout: Duration) -> Result<Option<&[u8]>>;

    /// Releases the storage of the oldest read but unconsumed item. Fails
    /// with `ProtocolMisuse` if there is no such item.
    fn consume(&mut self) -> Result<()>;

    /// Returns the current bookkeeping of the channel.
    fn stats(&self) -> Stats;
}
