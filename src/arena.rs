// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use std::ops::Range;

use crate::common::allocate;
use crate::error::{Error, Result};
use crate::region::Region;

/// The smallest capacity an arena can be created with.
pub const MIN_CAPACITY: usize = 2;

/// Where the bytes of an item live inside the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The item is a single run of bytes.
    Contiguous(Range<usize>),
    /// The item runs to the end of the arena and continues at the start.
    Wrapped(Range<usize>, Range<usize>),
}

/// Fixed capacity byte storage addressed by logical offsets. The physical
/// position of a logical offset is always `offset % capacity`, so items
/// near the end of the storage wrap around to its start.
pub struct Arena {
    region: Region,
    capacity: usize,
}

impl Arena {
    /// Creates an arena holding exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Arena> {
        if capacity < MIN_CAPACITY {
            return Err(Error::InvalidCapacity {
                capacity,
                minimum: MIN_CAPACITY,
            });
        }
        let region = Region::new(capacity)?;
        debug_assert!(region.len() >= capacity);
        Ok(Arena { region, capacity })
    }

    /// Returns the number of usable bytes, which may be less than the
    /// mapped length.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the physical position of a logical offset.
    #[inline]
    pub fn position(&self, offset: usize) -> usize {
        offset % self.capacity
    }

    /// Returns the physical layout of `len` bytes starting at the logical
    /// `offset`. The length must not exceed the capacity.
    pub fn placement(&self, offset: usize, len: usize) -> Placement {
        debug_assert!(len <= self.capacity);
        let start = self.position(offset);
        let run = self.capacity - start;
        if len <= run {
            Placement::Contiguous(start..start + len)
        } else {
            Placement::Wrapped(start..self.capacity, 0..len - run)
        }
    }

    /// Copies `data` to the logical `offset`, splitting it in two when it
    /// crosses the end of the storage.
    ///
    /// # Safety
    /// No live slice may point into the target bytes and no other thread
    /// may write them at the same time.
    pub unsafe fn store(&self, offset: usize, data: &[u8]) {
        match self.placement(offset, data.len()) {
            Placement::Contiguous(range) => self.region.write(range.start, data),
            Placement::Wrapped(first, second) => {
                let (head, tail) = data.split_at(first.len());
                self.region.write(first.start, head);
                self.region.write(second.start, tail);
            }
        }
    }

    /// Returns the bytes of a physical range without copying.
    ///
    /// # Safety
    /// The range must come from `placement` and nobody may write into it
    /// while the returned slice is alive.
    #[inline]
    pub unsafe fn slice(&self, range: Range<usize>) -> &[u8] {
        self.region.slice(range)
    }

    /// Concatenates the two segments of a wrapped item into a freshly
    /// allocated buffer.
    ///
    /// # Safety
    /// Same as for `slice`, for both segments.
    pub unsafe fn gather(&self, first: Range<usize>, second: Range<usize>) -> Result<Vec<u8>> {
        let mut copy = allocate(first.len() + second.len())?;
        copy.extend_from_slice(self.region.slice(first));
        copy.extend_from_slice(self.region.slice(second));
        Ok(copy)
    }
}
