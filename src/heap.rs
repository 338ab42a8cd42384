// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

//! The heap variant: every item gets its own allocation, charged against a
//! byte budget that can be resized while the channel is in use. Every read
//! is zero copy, at the price of one allocation and one free per item.

use std::cell::Cell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{Consumer, Producer, Stats};
use crate::error::{Error, Result};
use crate::pool::HeapPool;
use crate::queue::BlockingQueue;

struct State {
    written: usize,
    read: usize,
    consumed: usize,
    /// Read items in read order. The back is always the latest read.
    unconsumed: VecDeque<Vec<u8>>,
}

struct Shared {
    pool: HeapPool,
    unread: BlockingQueue<Vec<u8>>,
    state: Mutex<State>,
}

/// Creates a heap backed channel with the given initial byte budget. A
/// budget of zero is allowed, writers then block until `resize` is called.
///
/// # Examples
/// ```
/// let (mut producer, mut consumer) = porter::heap::channel(1024);
/// producer.write(b"hello").unwrap();
/// assert_eq!(consumer.read().unwrap(), b"hello");
/// assert_eq!(consumer.last_read().unwrap(), b"hello");
/// consumer.consume().unwrap();
/// assert!(consumer.last_read().is_err());
/// ```
pub fn channel(budget: usize) -> (HeapProducer, HeapConsumer) {
    debug!(budget, "heap channel created");
    let shared = Arc::new(Shared {
        pool: HeapPool::new(budget),
        unread: BlockingQueue::new(),
        state: Mutex::new(State {
            written: 0,
            read: 0,
            consumed: 0,
            unconsumed: VecDeque::new(),
        }),
    });
    let producer = HeapProducer {
        shared: Arc::clone(&shared),
    };
    let consumer = HeapConsumer {
        shared,
        _unsync: PhantomData,
    };
    (producer, consumer)
}

impl Shared {
    // Lock order is `state` then `unread` or the pool budget, never the
    // other way around.
    fn stats(&self) -> Stats {
        let state = self.state.lock();
        Stats {
            written: state.written,
            read: state.read,
            consumed: state.consumed,
            pending_read: self.unread.len(),
            pending_consume: state.unconsumed.len(),
            capacity: self.pool.capacity(),
        }
    }
}

/// Detaches the lifetime of the bytes of an item.
///
/// # Safety
/// The item must be owned by `unconsumed`. It is only freed by `consume`,
/// which needs `&mut` access to the consumer, so the caller must bind the
/// result to a shared borrow of the consumer.
unsafe fn borrow<'a>(item: &[u8]) -> &'a [u8] {
    slice::from_raw_parts(item.as_ptr(), item.len())
}

/// The writing half of a heap channel.
pub struct HeapProducer {
    shared: Arc<Shared>,
}

impl HeapProducer {
    /// Returns the current budget.
    pub fn capacity(&self) -> usize {
        self.shared.pool.capacity()
    }

    /// Copies `data` into a new allocation, blocking while it does not fit
    /// into the budget. An item larger than the budget blocks until the
    /// budget is raised.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let item = self.shared.pool.acquire(data)?;
        let mut state = self.shared.state.lock();
        state.written += item.len();
        self.shared.unread.push(item);
        Ok(())
    }

    /// Changes the budget, see `HeapConsumer::resize`.
    pub fn resize(&self, budget: usize) -> Result<()> {
        self.shared.pool.resize(budget)
    }

    /// Returns the current bookkeeping of the channel.
    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }
}

/// The reading half of a heap channel.
pub struct HeapConsumer {
    shared: Arc<Shared>,
    _unsync: PhantomData<Cell<()>>,
}

impl HeapConsumer {
    /// Returns the current budget.
    pub fn capacity(&self) -> usize {
        self.shared.pool.capacity()
    }

    /// Returns the oldest unread item, blocking until one is available.
    pub fn read(&self) -> Result<&[u8]> {
        let item = self.shared.unread.pop();
        Ok(self.take(item))
    }

    /// Same as `read`, but returns `None` if nothing arrives in time.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<&[u8]>> {
        Ok(self
            .shared
            .unread
            .pop_timeout(timeout)
            .map(|item| self.take(item)))
    }

    fn take(&self, item: Vec<u8>) -> &[u8] {
        let data = unsafe { borrow(&item) };
        let mut state = self.shared.state.lock();
        state.read += item.len();
        state.unconsumed.push_back(item);
        data
    }

    /// Returns the most recently read item again, as long as it has not
    /// been consumed yet.
    pub fn last_read(&self) -> Result<&[u8]> {
        let state = self.shared.state.lock();
        match state.unconsumed.back() {
            Some(item) => Ok(unsafe { borrow(item) }),
            None => {
                warn!("last read item has already been consumed");
                Err(Error::NothingToReread)
            }
        }
    }

    /// Frees the oldest read item and returns its bytes to the budget.
    pub fn consume(&mut self) -> Result<()> {
        let item = {
            let mut state = self.shared.state.lock();
            match state.unconsumed.pop_front() {
                Some(item) => {
                    state.consumed += item.len();
                    item
                }
                None => {
                    warn!("consume called without a matching read");
                    return Err(Error::ProtocolMisuse);
                }
            }
        };
        self.shared.pool.release(item);
        Ok(())
    }

    /// Changes the budget. Fails with `ResizeRejected`, keeping the old
    /// budget, if fewer bytes are requested than are currently written but
    /// not yet consumed. Growing the budget wakes a blocked writer.
    pub fn resize(&self, budget: usize) -> Result<()> {
        self.shared.pool.resize(budget)
    }

    /// Returns the current bookkeeping of the channel.
    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }
}

impl Producer for HeapProducer {
    fn capacity(&self) -> usize {
        HeapProducer::capacity(self)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        HeapProducer::write(self, data)
    }

    fn stats(&self) -> Stats {
        HeapProducer::stats(self)
    }
}

impl Consumer for HeapConsumer {
    fn capacity(&self) -> usize {
        HeapConsumer::capacity(self)
    }

    fn read(&self) -> Result<&[u8]> {
        HeapConsumer::read(self)
    }

    fn read_timeout(&self, timeout: Duration) -> Result<Option<&[u8]>> {
        HeapConsumer::read_timeout(self, timeout)
    }

    fn consume(&mut self) -> Result<()> {
        HeapConsumer::consume(self)
    }

    fn stats(&self) -> Stats {
        HeapConsumer::stats(self)
    }
}
