// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

//! A bounded channel that moves variable length byte items, such as log
//! records or network frames, from exactly one producer thread to exactly
//! one consumer thread. The producer copies each item in once, the consumer
//! reads it in place whenever the storage allows it.
//!
//! Reading is a two phase protocol. `read` returns the oldest unread item
//! as a slice, and a later `consume` releases the storage of the oldest read
//! item. Several items may be read before they are consumed, but `read` and
//! `consume` calls must pair up in FIFO order. The producer blocks in
//! `write` while not enough storage has been released.
//!
//! There are two storage strategies:
//!
//! * [`ring::channel`] copies items into one fixed size circular arena.
//!   Reads are zero copy, except for items that wrap around the end of the
//!   arena, which are handed out as a temporary contiguous copy.
//! * [`heap::channel`] gives every item its own allocation, charged against
//!   a byte budget that can be resized at runtime. Every read is zero copy.
//!
//! Both implement the [`Producer`] and [`Consumer`] traits, and [`Config`]
//! picks one at runtime.
//!
//! # Examples
//! ```
//! use std::thread;
//!
//! let (mut producer, mut consumer) = porter::ring::channel(64).unwrap();
//! let writer = thread::spawn(move || {
//!     for i in 0..100u8 {
//!         producer.write(&[i; 10]).unwrap();
//!     }
//! });
//!
//! for i in 0..100u8 {
//!     let item = consumer.read().unwrap();
//!     assert_eq!(item, &[i; 10]);
//!     consumer.consume().unwrap();
//! }
//! writer.join().unwrap();
//! ```

mod arena;
mod common;
mod config;
mod error;
pub mod heap;
mod pool;
mod queue;
mod region;
pub mod ring;

pub use arena::MIN_CAPACITY;
pub use common::{Consumer, Producer, Stats};
pub use config::{Config, Storage};
pub use error::{Error, Result};
pub use heap::{HeapConsumer, HeapProducer};
pub use pool::HeapPool;
pub use queue::BlockingQueue;
pub use ring::{RingConsumer, RingProducer};
