//! Allocation of unique item ids with recycling.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Errors from [`ItemRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRegistryError {
    /// Limited mode: every slot is taken.
    Exhausted,
    /// Unlimited mode: the id counter would overflow.
    Overflow,
    /// The id was never handed out, or was already deregistered.
    UnknownItem(usize),
}

impl fmt::Display for ItemRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRegistryError::Exhausted => {
                write!(f, "no item slots available; raise the maximum item count")
            }
            ItemRegistryError::Overflow => write!(f, "maximum item count reached"),
            ItemRegistryError::UnknownItem(id) => {
                write!(f, "item {id} is not registered")
            }
        }
    }
}

impl std::error::Error for ItemRegistryError {}

struct Inner {
    available: BTreeSet<usize>,
    next: usize,
}

/// Hands out unique ids, recycling deregistered ones.
///
/// With `max_items > 0` the id range is `0..max_items` and registration
/// fails once all are taken. With `max_items == 0` ids grow without bound,
/// recycled ids first.
pub struct ItemRegistry {
    max_items: usize,
    inner: Mutex<Inner>,
}

impl ItemRegistry {
    pub fn new(max_items: usize) -> Self {
        let available = (0..max_items).collect();
        Self {
            max_items,
            inner: Mutex::new(Inner { available, next: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an item and return its unique id.
    pub fn register(&self) -> Result<usize, ItemRegistryError> {
        let mut inner = self.lock();
        let recycled = inner.available.iter().next().copied();
        if let Some(id) = recycled {
            inner.available.remove(&id);
            return Ok(id);
        }
        if self.max_items > 0 {
            return Err(ItemRegistryError::Exhausted);
        }
        if inner.next == usize::MAX {
            return Err(ItemRegistryError::Overflow);
        }
        let id = inner.next;
        inner.next += 1;
        Ok(id)
    }

    /// Return an id to the pool.
    pub fn deregister(&self, id: usize) -> Result<(), ItemRegistryError> {
        let mut inner = self.lock();
        let handed_out = if self.max_items > 0 {
            id < self.max_items
        } else {
            id < inner.next
        };
        if !handed_out || inner.available.contains(&id) {
            return Err(ItemRegistryError::UnknownItem(id));
        }
        inner.available.insert(id);
        Ok(())
    }
}
