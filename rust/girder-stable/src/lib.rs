//! Containers whose canonical state lives in named shared memory.
//!
//! A [`StableContainer`] keeps its entire contents as a serialized image in
//! one shared segment, re-encoded on every mutation under a cross-process
//! recursive lock. That makes the data format- and ABI-independent: modules
//! built by different toolchains (or different processes) see the same
//! bytes, never each other's in-memory layouts.
//!
//! [`StableReferenceBuffer`] builds on that to give a heap block one
//! reference count per process, no matter how many modules hold it — the
//! count is keyed by the block's address in a shared [`StableMap`].

pub mod container;
pub mod error;
pub mod map;
pub mod reference_buffer;

pub use container::StableContainer;
pub use error::StableError;
pub use map::StableMap;
pub use reference_buffer::{DelayDeallocation, StableReferenceBuffer};
