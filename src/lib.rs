//! girder — concurrency primitives, interprocess-capable containers, and
//! lifecycle-managed shared resources for applications assembled from
//! modules that may have been built with incompatible toolchains.
//!
//! The pieces, bottom up:
//!
//! - [`primitives`]: named process-shared recursive mutexes and
//!   fixed-capacity shared segments.
//! - [`wire`]: the length-prefixed binary encoding every stable container
//!   speaks, plus the growable [`Buffer`] it encodes into.
//! - [`lifecycle`]: the name-keyed singleton registry with collective
//!   teardown.
//! - [`stable`]: containers serialized through a shared segment on every
//!   mutation, and reference-counted buffers whose counts have cross-module
//!   identity.
//! - [`dispatch`]: per-id message queues drained by dedicated handler
//!   threads.

pub use girder_dispatch as dispatch;
pub use girder_lifecycle as lifecycle;
pub use girder_primitives as primitives;
pub use girder_stable as stable;
pub use girder_wire as wire;

pub use girder_dispatch::{Direction, DrainOrder, HandlerConfig, MessageId, MessageManager};
pub use girder_lifecycle::singleton;
pub use girder_primitives::{NamedRecursiveMutex, SharedSegment, ShmError};
pub use girder_stable::{
    DelayDeallocation, StableContainer, StableError, StableMap, StableReferenceBuffer,
};
pub use girder_wire::{Buffer, Cursor, NestedMap, Value, Wire, WireError};
