// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

//! The arena variant: items are copied into one fixed size circular byte
//! arena. Reads are zero copy unless the item wraps around the end of the
//! arena, in which case the consumer gets a temporary contiguous copy that
//! lives until the matching `consume`.

use std::cell::Cell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Range;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::arena::{Arena, Placement};
use crate::common::{Consumer, Producer, Stats};
use crate::error::{Error, Result};
use crate::queue::BlockingQueue;

/// An item that was read but not yet consumed.
enum Pending {
    /// The item is read in place from this physical range of the arena.
    Borrowed(Range<usize>),
    /// The item wrapped around, the consumer reads this copy instead.
    OwnedCopy(Vec<u8>),
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::Borrowed(range) => range.len(),
            Pending::OwnedCopy(copy) => copy.len(),
        }
    }
}

/// Logical offsets, physical positions are always derived from them.
/// Invariant: `consumer <= reader <= writer <= consumer + capacity`.
struct State {
    writer: usize,
    reader: usize,
    consumer: usize,
    unconsumed: VecDeque<Pending>,
}

struct Shared {
    arena: Arena,
    /// Sizes of the items written but not yet read.
    unread: BlockingQueue<usize>,
    state: Mutex<State>,
    /// Signalled whenever the consumer offset advances.
    space: Condvar,
}

/// Creates an arena backed channel that holds at most `capacity` bytes of
/// written but not yet consumed items. The capacity must be at least 2.
///
/// # Examples
/// ```
/// let (mut producer, mut consumer) = porter::ring::channel(16).unwrap();
/// producer.write(b"hello").unwrap();
/// assert_eq!(consumer.read().unwrap(), b"hello");
/// consumer.consume().unwrap();
/// ```
pub fn channel(capacity: usize) -> Result<(RingProducer, RingConsumer)> {
    let arena = Arena::new(capacity)?;
    debug!(capacity, "ring channel created");

    let shared = Arc::new(Shared {
        arena,
        unread: BlockingQueue::new(),
        state: Mutex::new(State {
            writer: 0,
            reader: 0,
            consumer: 0,
            unconsumed: VecDeque::new(),
        }),
        space: Condvar::new(),
    });
    let producer = RingProducer {
        shared: Arc::clone(&shared),
    };
    let consumer = RingConsumer {
        shared,
        _unsync: PhantomData,
    };
    Ok((producer, consumer))
}

// Lock order is `state` then `unread`. The consumer pops `unread` before it
// locks `state`, never while holding it.
fn stats(shared: &Shared) -> Stats {
    let state = shared.state.lock();
    Stats {
        written: state.writer,
        read: state.reader,
        consumed: state.consumer,
        pending_read: shared.unread.len(),
        pending_consume: state.unconsumed.len(),
        capacity: shared.arena.capacity(),
    }
}

/// The writing half of an arena channel.
///
/// The channel mutex only serializes the offset and queue bookkeeping. The
/// bytes themselves are copied into the arena without holding it, which is
/// sound because there is a single producer and because backpressure is
/// computed against the consumer offset, so the target range never overlaps
/// an item the consumer may still be looking at.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Returns the size of the arena.
    pub fn capacity(&self) -> usize {
        self.shared.arena.capacity()
    }

    /// Copies `data` into the arena, blocking while fewer than `data.len()`
    /// bytes are free. Items larger than the capacity are rejected.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let shared = &*self.shared;
        let size = data.len();
        let capacity = shared.arena.capacity();
        if size > capacity {
            warn!(size, capacity, "item larger than the arena");
            return Err(Error::CapacityExceeded { size, capacity });
        }

        let offset = {
            let mut state = shared.state.lock();
            while state.writer - state.consumer + size > capacity {
                trace!(size, writer = state.writer, consumer = state.consumer, "writer blocked");
                shared.space.wait(&mut state);
            }
            state.writer
        };

        unsafe { shared.arena.store(offset, data) };

        let mut state = shared.state.lock();
        state.writer += size;
        shared.unread.push(size);
        Ok(())
    }

    /// Returns the current bookkeeping of the channel.
    pub fn stats(&self) -> Stats {
        stats(&self.shared)
    }
}

/// The reading half of an arena channel. It can be sent to another thread
/// but not shared, there is exactly one consumer.
pub struct RingConsumer {
    shared: Arc<Shared>,
    _unsync: PhantomData<Cell<()>>,
}

impl RingConsumer {
    /// Returns the size of the arena.
    pub fn capacity(&self) -> usize {
        self.shared.arena.capacity()
    }

    /// Returns the oldest unread item, blocking until one is available. The
    /// slice points into the arena unless the item wraps around, then it
    /// points to a temporary copy. Either way it stays valid until the
    /// matching `consume`.
    pub fn read(&self) -> Result<&[u8]> {
        let size = self.shared.unread.pop();
        self.take(size)
    }

    /// Same as `read`, but returns `None` if nothing arrives in time.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<&[u8]>> {
        match self.shared.unread.pop_timeout(timeout) {
            Some(size) => self.take(size).map(Some),
            None => Ok(None),
        }
    }

    // Only the consumer moves `reader`, and the popped item is already
    // counted in `writer`, so its bytes can be copied without the lock.
    fn take(&self, size: usize) -> Result<&[u8]> {
        let shared = &*self.shared;
        let offset = shared.state.lock().reader;

        let entry = match shared.arena.placement(offset, size) {
            Placement::Contiguous(range) => Pending::Borrowed(range),
            Placement::Wrapped(first, second) => {
                trace!(offset, size, "copying wrapped item");
                match unsafe { shared.arena.gather(first, second) } {
                    Ok(copy) => Pending::OwnedCopy(copy),
                    Err(err) => {
                        shared.unread.push_front(size);
                        return Err(err);
                    }
                }
            }
        };

        // The copy is owned by `unconsumed` and only dropped by `consume`,
        // which needs `&mut self` and so outlives the returned borrow.
        let data = match &entry {
            Pending::Borrowed(range) => unsafe { shared.arena.slice(range.clone()) },
            Pending::OwnedCopy(copy) => unsafe { slice::from_raw_parts(copy.as_ptr(), copy.len()) },
        };

        let mut state = shared.state.lock();
        state.reader += size;
        state.unconsumed.push_back(entry);
        Ok(data)
    }

    /// Releases the oldest read item so the producer can reuse its bytes.
    pub fn consume(&mut self) -> Result<()> {
        let entry = {
            let mut state = self.shared.state.lock();
            let entry = match state.unconsumed.pop_front() {
                Some(entry) => entry,
                None => {
                    warn!("consume called without a matching read");
                    return Err(Error::ProtocolMisuse);
                }
            };
            state.consumer += entry.len();
            self.shared.space.notify_one();
            entry
        };

        match entry {
            // arena bytes are reused as soon as the consumer offset passes them
            Pending::Borrowed(_) => {}
            Pending::OwnedCopy(copy) => drop(copy),
        }
        Ok(())
    }

    /// Returns the current bookkeeping of the channel.
    pub fn stats(&self) -> Stats {
        stats(&self.shared)
    }
}

impl Producer for RingProducer {
    fn capacity(&self) -> usize {
        RingProducer::capacity(self)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        RingProducer::write(self, data)
    }

    fn stats(&self) -> Stats {
        RingProducer::stats(self)
    }
}

impl Consumer for RingConsumer {
    fn capacity(&self) -> usize {
        RingConsumer::capacity(self)
    }

    fn read(&self) -> Result<&[u8]> {
        RingConsumer::read(self)
    }

    fn read_timeout(&self, timeout: Duration) -> Result<Option<&[u8]>> {
        RingConsumer::read_timeout(self, timeout)
    }

    fn consume(&mut self) -> Result<()> {
        RingConsumer::consume(self)
    }

    fn stats(&self) -> Stats {
        RingConsumer::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn last_is_copy(consumer: &RingConsumer) -> bool {
        let state = consumer.shared.state.lock();
        matches!(state.unconsumed.back(), Some(Pending::OwnedCopy(_)))
    }

    /// Runs `write` on another thread and checks that it stays blocked
    /// until `release` has been called.
    fn write_blocked(
        mut producer: RingProducer,
        data: &'static [u8],
        release: impl FnOnce(),
    ) -> RingProducer {
        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                producer.write(data).unwrap();
                done.store(true, Ordering::SeqCst);
                producer
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        release();
        let producer = handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        producer
    }

    #[test]
    fn round_trip() {
        let (mut producer, mut consumer) = channel(64).unwrap();
        let items: [&[u8]; 4] = [b"first", b"", b"the third item", b"4"];
        for item in items.iter() {
            producer.write(item).unwrap();
        }
        for item in items.iter() {
            assert_eq!(consumer.read().unwrap(), *item);
            consumer.consume().unwrap();
        }

        let stats = consumer.stats();
        assert_eq!(stats.written, 20);
        assert_eq!(stats.read, 20);
        assert_eq!(stats.consumed, 20);
        assert_eq!(stats.pending_read, 0);
        assert_eq!(stats.pending_consume, 0);
    }

    #[test]
    fn capacity_exceeded() {
        let (mut producer, consumer) = channel(8).unwrap();
        producer.write(b"abc").unwrap();
        let before = producer.stats();

        assert!(matches!(
            producer.write(b"123456789"),
            Err(Error::CapacityExceeded {
                size: 9,
                capacity: 8
            })
        ));
        assert_eq!(producer.stats(), before);
        assert_eq!(consumer.read().unwrap(), b"abc");
    }

    #[test]
    fn protocol_misuse() {
        let (mut producer, mut consumer) = channel(8).unwrap();
        assert!(matches!(consumer.consume(), Err(Error::ProtocolMisuse)));

        producer.write(b"ab").unwrap();
        consumer.read().unwrap();
        consumer.consume().unwrap();
        let before = consumer.stats();

        assert!(matches!(consumer.consume(), Err(Error::ProtocolMisuse)));
        assert_eq!(consumer.stats(), before);
        assert_eq!(before.read, before.consumed);
    }

    #[test]
    fn zero_size() {
        let (mut producer, mut consumer) = channel(2).unwrap();
        producer.write(b"xy").unwrap();
        // the arena is full, an empty item still fits
        producer.write(b"").unwrap();

        assert_eq!(consumer.read().unwrap(), b"xy");
        assert_eq!(consumer.read().unwrap().len(), 0);
        consumer.consume().unwrap();
        consumer.consume().unwrap();
        assert_eq!(consumer.stats().outstanding(), 0);
    }

    #[test]
    fn wrapped_copy() {
        let (mut producer, mut consumer) = channel(8).unwrap();
        producer.write(b"ABCDE").unwrap();
        assert_eq!(consumer.read().unwrap(), b"ABCDE");
        assert!(!last_is_copy(&consumer));

        let producer = write_blocked(producer, b"FGHIJ", || consumer.consume().unwrap());

        unsafe {
            assert_eq!(consumer.shared.arena.slice(5..8), b"FGH");
            assert_eq!(consumer.shared.arena.slice(0..2), b"IJ");
        }
        assert_eq!(consumer.read().unwrap(), b"FGHIJ");
        assert!(last_is_copy(&consumer));
        consumer.consume().unwrap();

        let stats = producer.stats();
        assert_eq!(stats.written, 10);
        assert_eq!(stats.consumed, 10);
    }

    #[test]
    fn wrapped_segments() {
        let (mut producer, mut consumer) = channel(16).unwrap();
        producer.write(b"abcdefghij").unwrap();

        let producer = write_blocked(producer, b"klmnopqrst", || {
            assert_eq!(consumer.read().unwrap(), b"abcdefghij");
            consumer.consume().unwrap();
        });

        let data = consumer.read().unwrap();
        unsafe {
            assert_eq!(&data[..6], consumer.shared.arena.slice(10..16));
            assert_eq!(&data[6..], consumer.shared.arena.slice(0..4));
        }
        assert_eq!(data, b"klmnopqrst");
        assert_eq!(producer.stats().pending_consume, 1);
    }

    #[test]
    fn unconsumed_not_overwritten() {
        let (mut producer, mut consumer) = channel(8).unwrap();
        producer.write(b"ABCD").unwrap();
        let first = consumer.read().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                producer.write(b"EFGH").unwrap();
                producer.write(b"IJ").unwrap();
                done.store(true, Ordering::SeqCst);
                producer
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(first, b"ABCD");
        let second = consumer.read().unwrap();
        assert_eq!(second, b"EFGH");
        assert_eq!(first, b"ABCD");

        consumer.consume().unwrap();
        consumer.consume().unwrap();
        let _producer = handle.join().unwrap();
        assert_eq!(consumer.read().unwrap(), b"IJ");
    }

    #[test]
    fn read_timeout() {
        let (mut producer, consumer) = channel(4).unwrap();
        assert!(consumer
            .read_timeout(Duration::from_millis(10))
            .unwrap()
            .is_none());

        producer.write(b"ok").unwrap();
        let data = consumer.read_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(data, Some(&b"ok"[..]));

        producer.write(b"ab").unwrap();
        let data = consumer.read_timeout(Duration::MAX).unwrap();
        assert_eq!(data, Some(&b"ab"[..]));
    }

    #[test]
    fn failed_copy_is_retried() {
        let (mut producer, mut consumer) = channel(8).unwrap();
        producer.write(b"ABCDE").unwrap();
        consumer.read().unwrap();
        consumer.consume().unwrap();
        producer.write(b"FGHIJ").unwrap();
        let before = consumer.stats();

        crate::common::FAIL_ALLOCATIONS.with(|fail| fail.set(true));
        let result = consumer.read().map(|data| data.to_vec());
        crate::common::FAIL_ALLOCATIONS.with(|fail| fail.set(false));

        assert!(matches!(result, Err(Error::AllocationFailure { size: 5 })));
        assert_eq!(consumer.stats(), before);
        assert_eq!(before.read, 5);
        assert_eq!(before.pending_read, 1);
        assert_eq!(before.pending_consume, 0);

        assert_eq!(consumer.read().unwrap(), b"FGHIJ");
        assert!(last_is_copy(&consumer));
        consumer.consume().unwrap();
        assert_eq!(consumer.stats().outstanding(), 0);
    }

    #[test]
    fn stats_count_published_items() {
        let (mut producer, consumer) = channel(4096).unwrap();
        let writer = thread::spawn(move || {
            for _ in 0..2000 {
                producer.write(b"x").unwrap();
            }
        });

        loop {
            let stats = consumer.stats();
            assert_eq!(stats.written, stats.pending_read);
            if stats.written == 2000 {
                break;
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn threaded() {
        let (mut producer, mut consumer) = channel(100).unwrap();
        let writer = thread::spawn(move || {
            for i in 0..10_000usize {
                let size = i % 37;
                let data: Vec<u8> = (0..size).map(|j| (i + j) as u8).collect();
                producer.write(&data).unwrap();
            }
        });

        for i in 0..10_000usize {
            let size = i % 37;
            let expected: Vec<u8> = (0..size).map(|j| (i + j) as u8).collect();
            assert_eq!(consumer.read().unwrap(), &expected[..]);
            consumer.consume().unwrap();
        }
        writer.join().unwrap();
        assert_eq!(consumer.stats().outstanding(), 0);
    }
}
