// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A first in first out queue whose `pop` parks the calling thread until an
/// item arrives. All methods take `&self`, so the queue can be shared
/// between threads behind an `Arc`.
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        BlockingQueue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends an item and wakes a waiting `pop`. Never blocks.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        self.available.notify_one();
    }

    /// Puts an item back at the head of the queue, so the next `pop`
    /// returns it.
    pub fn push_front(&self, item: T) {
        let mut items = self.items.lock();
        items.push_front(item);
        self.available.notify_one();
    }

    /// Removes the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Removes the oldest item, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock();
        if let Some(item) = items.pop_front() {
            return Some(item);
        }
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                // too far away to represent, same as waiting forever
                loop {
                    self.available.wait(&mut items);
                    if let Some(item) = items.pop_front() {
                        return Some(item);
                    }
                }
            }
        };
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Removes the oldest item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Advisory only: another thread may push right after this returns.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns the number of queued items, advisory like `is_empty`.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
