//! OS-level primitives for cross-process shared state.
//!
//! Two named objects live here: a recursive mutex shared across processes
//! (`NamedRecursiveMutex`) and a fixed-capacity shared byte region paired
//! with such a mutex (`SharedSegment`). Both are identified by a name, so
//! any process — or any dynamically loaded module within one process — that
//! opens the same name operates on the same kernel object.

pub mod error;
pub mod mutex;
pub mod segment;

pub use error::ShmError;
pub use mutex::{MutexGuard, NamedRecursiveMutex, max_shm_name_len};
pub use segment::SharedSegment;
