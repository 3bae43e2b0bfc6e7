//! Typed container whose canonical state is a serialized image in a shared
//! segment.
//!
//! Every operation follows the same shape: take the cross-process lock,
//! decode the current image into a transient value, act on it, and (for
//! mutations) re-encode. A fresh zero-filled segment decodes as
//! `T::default()` for the supported algebra, so no separate initialization
//! step exists.

use std::marker::PhantomData;
use std::ptr;

use girder_primitives::{MutexGuard, SharedSegment};
use girder_wire::{Buffer, Cursor, Wire};

use crate::error::StableError;

/// A `T` stored entirely as wire bytes inside one named shared segment.
pub struct StableContainer<T> {
    segment: SharedSegment,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Wire + Default> StableContainer<T> {
    /// Create or open the container backed by segment `s_<id>` / mutex
    /// `m_<id>`. The capacity is fixed at first creation.
    pub fn new(id: &str, capacity: usize) -> Result<Self, StableError> {
        Ok(Self {
            segment: SharedSegment::new(id, capacity)?,
            _marker: PhantomData,
        })
    }

    /// Acquire the cross-process lock. The mutex is recursive, so callers
    /// may compose multi-step transactions around the single-op methods.
    pub fn lock(&self) -> Result<MutexGuard<'_>, StableError> {
        Ok(self.segment.lock()?)
    }

    /// Decode the current image.
    pub fn snapshot(&self) -> Result<T, StableError> {
        let _guard = self.lock()?;
        self.decode_image()
    }

    /// Overwrite the image with `value`.
    pub fn replace(&self, value: &T) -> Result<(), StableError> {
        let _guard = self.lock()?;
        self.encode_image(value)
    }

    /// Decode, apply `f`, re-encode — all under the lock. `f` must be
    /// side-effect-free except on its argument.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StableError> {
        let _guard = self.lock()?;
        let mut value = self.decode_image()?;
        let out = f(&mut value);
        self.encode_image(&value)?;
        Ok(out)
    }

    /// Reset the image to `T::default()`.
    pub fn clear(&self) -> Result<(), StableError> {
        self.replace(&T::default())
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    pub fn id(&self) -> &str {
        self.segment.id()
    }

    fn decode_image(&self) -> Result<T, StableError> {
        // caller holds the segment lock
        let bytes =
            unsafe { std::slice::from_raw_parts(self.segment.data(), self.segment.capacity()) };
        let mut cursor = Cursor::new(bytes);
        Ok(T::decode(&mut cursor)?)
    }

    fn encode_image(&self, value: &T) -> Result<(), StableError> {
        // caller holds the segment lock; staging first keeps the previous
        // image intact when the new one does not fit
        let mut staged = Buffer::new();
        value.encode(&mut staged);
        if staged.len() > self.segment.capacity() {
            let err = StableError::CapacityExceeded {
                required: staged.len(),
                capacity: self.segment.capacity(),
            };
            tracing::error!(id = %self.segment.id(), %err, "refusing to commit oversized image");
            return Err(err);
        }
        unsafe {
            ptr::copy_nonoverlapping(staged.as_slice().as_ptr(), self.segment.data(), staged.len());
        }
        Ok(())
    }
}
