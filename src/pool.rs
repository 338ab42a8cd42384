// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::common::allocate;
use crate::error::{Error, Result};

struct Budget {
    max: usize,
    used: usize,
}

/// Hands out one heap allocation per item while keeping the total size of
/// the outstanding allocations within a budget that can be changed at any
/// time. An allocation counts against the budget from `acquire` until it is
/// given back with `release`.
pub struct HeapPool {
    budget: Mutex<Budget>,
    space: Condvar,
}

impl HeapPool {
    /// Creates a pool with a budget of `max` bytes.
    pub fn new(max: usize) -> Self {
        HeapPool {
            budget: Mutex::new(Budget { max, used: 0 }),
            space: Condvar::new(),
        }
    }

    /// Returns the current budget.
    pub fn capacity(&self) -> usize {
        self.budget.lock().max
    }

    /// Returns the total size of the outstanding allocations.
    pub fn used(&self) -> usize {
        self.budget.lock().used
    }

    /// Copies `data` into a new allocation, blocking while it does not fit
    /// into the budget. The bytes are charged before copying and refunded
    /// if the allocation fails.
    pub fn acquire(&self, data: &[u8]) -> Result<Vec<u8>> {
        let size = data.len();
        {
            let mut budget = self.budget.lock();
            while budget.used + size > budget.max {
                trace!(size, used = budget.used, max = budget.max, "waiting for budget");
                self.space.wait(&mut budget);
            }
            budget.used += size;
        }

        let mut item = match allocate(size) {
            Ok(item) => item,
            Err(err) => {
                warn!(size, "item allocation failed");
                self.refund(size);
                return Err(err);
            }
        };
        item.extend_from_slice(data);
        Ok(item)
    }

    /// Frees an allocation returned by `acquire` and wakes the blocked
    /// writers.
    pub fn release(&self, item: Vec<u8>) {
        self.refund(item.len());
    }

    fn refund(&self, size: usize) {
        let mut budget = self.budget.lock();
        debug_assert!(budget.used >= size);
        budget.used -= size;
        self.space.notify_all();
    }

    /// Changes the budget. Shrinking below the outstanding bytes is rejected
    /// and leaves the budget unchanged.
    pub fn resize(&self, max: usize) -> Result<()> {
        let mut budget = self.budget.lock();
        if max < budget.used {
            warn!(requested = max, outstanding = budget.used, "resize rejected");
            return Err(Error::ResizeRejected {
                requested: max,
                outstanding: budget.used,
            });
        }
        debug!(from = budget.max, to = max, "budget resized");
        budget.max = max;
        self.space.notify_all();
        Ok(())
    }
}
