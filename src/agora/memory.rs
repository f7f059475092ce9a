//! Bounded short-term memory for debate agents.
//!
//! Each [`Agent`](crate::Agent) owns one [`Memory`]. It keeps the most recent items in
//! insertion order and silently drops the oldest entry once the configured capacity is
//! exceeded. Rendering produces the plain-text context handed to the reasoning backend.
//!
//! ```rust
//! use agora::Memory;
//!
//! let mut memory = Memory::new(2);
//! memory.push("first");
//! memory.push("second");
//! memory.push("third");
//!
//! assert_eq!(memory.len(), 2);
//! assert_eq!(memory.render(None), "second\nthird");
//! assert_eq!(memory.render(Some(1)), "third");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of items an agent remembers.
pub const DEFAULT_MEMORY_SIZE: usize = 3;

/// FIFO buffer with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    capacity: usize,
    items: VecDeque<String>,
}

impl Memory {
    /// Create an empty memory holding at most `capacity` items.
    ///
    /// A capacity of zero is bumped to one so a pushed item is always observable.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Memory {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an item, evicting the oldest entries when over capacity.
    pub fn push(&mut self, item: impl Into<String>) {
        self.items.push_back(item.into());
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Join the stored items with newlines.
    ///
    /// When `limit` is given only the most recent `limit` items are rendered.
    pub fn render(&self, limit: Option<usize>) -> String {
        let skip = match limit {
            Some(limit) => self.items.len().saturating_sub(limit),
            None => 0,
        };
        self.items
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Replace everything with a single item (used after summarization).
    pub fn replace_with(&mut self, item: impl Into<String>) {
        self.clear();
        self.push(item);
    }

    /// Items from oldest to newest.
    pub fn items(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(DEFAULT_MEMORY_SIZE)
    }
}
