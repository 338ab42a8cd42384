// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

/// The error type of every channel operation. A rejected call never changes
/// the offsets, queues or budget of the channel it was made on.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single item is larger than the whole arena.
    #[error("item of {size} bytes exceeds the capacity of {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },
    /// `consume` was called more often than `read`.
    #[error("consume call count exceeds read call count")]
    ProtocolMisuse,
    /// A temporary copy or a per item allocation could not be made.
    #[error("failed to allocate {size} bytes")]
    AllocationFailure { size: usize },
    /// The new budget would be smaller than the bytes still outstanding.
    #[error("cannot resize to {requested} bytes while {outstanding} bytes are outstanding")]
    ResizeRejected { requested: usize, outstanding: usize },
    /// The most recently read item has already been consumed.
    #[error("nothing to re-read, the last read item has been consumed")]
    NothingToReread,
    /// The channel cannot be constructed with this capacity.
    #[error("invalid capacity {capacity}, must be at least {minimum}")]
    InvalidCapacity { capacity: usize, minimum: usize },
    /// The operating system refused to map the arena.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized result type for channel operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
