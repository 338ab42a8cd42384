// Copyright (C) 2020 Miklos Maroti
// Licensed under the MIT license (see LICENSE)

use serde::{Deserialize, Serialize};

use crate::arena::MIN_CAPACITY;
use crate::common::{Consumer, Producer};
use crate::error::{Error, Result};
use crate::{heap, ring};

/// The backing storage of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    /// One fixed size circular arena, see [`ring::channel`].
    Arena,
    /// One allocation per item under a resizable budget, see [`heap::channel`].
    Heap,
}

/// Describes a channel to be built at runtime.
///
/// # Examples
/// ```
/// let config: porter::Config = serde_json::from_str(r#"{"storage": "heap"}"#).unwrap();
/// let (mut producer, mut consumer) = config.build().unwrap();
/// producer.write(b"frame").unwrap();
/// assert_eq!(consumer.read().unwrap(), b"frame");
/// consumer.consume().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    /// The arena size, or the initial budget of the heap.
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: Storage::Arena,
            capacity: 1 << 20,
        }
    }
}

impl Config {
    /// Selects the arena variant with a fixed size of `capacity` bytes.
    pub fn arena(capacity: usize) -> Self {
        Config {
            storage: Storage::Arena,
            capacity,
        }
    }

    /// Selects the heap variant with an initial budget of `capacity` bytes.
    pub fn heap(capacity: usize) -> Self {
        Config {
            storage: Storage::Heap,
            capacity,
        }
    }

    /// Checks the settings without building anything.
    pub fn validate(&self) -> Result<()> {
        match self.storage {
            Storage::Arena if self.capacity < MIN_CAPACITY => Err(Error::InvalidCapacity {
                capacity: self.capacity,
                minimum: MIN_CAPACITY,
            }),
            _ => Ok(()),
        }
    }

    /// Builds the channel and returns its two halves.
    pub fn build(&self) -> Result<(Box<dyn Producer>, Box<dyn Consumer>)> {
        self.validate()?;
        Ok(match self.storage {
            Storage::Arena => {
                let (producer, consumer) = ring::channel(self.capacity)?;
                (
                    Box::new(producer) as Box<dyn Producer>,
                    Box::new(consumer) as Box<dyn Consumer>,
                )
            }
            Storage::Heap => {
                let (producer, consumer) = heap::channel(self.capacity);
                (
                    Box::new(producer) as Box<dyn Producer>,
                    Box::new(consumer) as Box<dyn Consumer>,
                )
            }
        })
    }
}
