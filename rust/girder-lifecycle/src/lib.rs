//! Deterministic lifecycle management for process-wide resources.
//!
//! Long-lived shared instances are created and torn down through a
//! name-keyed registry instead of static destructors, so teardown happens in
//! a well-defined order at a consciously chosen time — see [`singleton`].

pub mod item_registry;
pub mod singleton;

pub use item_registry::{ItemRegistry, ItemRegistryError};
pub use singleton::SingletonError;
