//! Asynchronous message dispatch on dedicated OS threads.
//!
//! No async runtime, no pooling: every handler owns one long-lived thread
//! that blocks on a condvar shared with its queue. [`MessageManager`] routes
//! payloads by message id and answers the one question producers care
//! about — "is everything I sent fully handled?" — via
//! [`MessageManager::wait_until_empty`].

pub mod manager;
pub mod worker;

pub use manager::{
    Direction, DrainOrder, HandlerConfig, MessageId, MessageLogger, MessageManager,
};
pub use worker::{Worker, WorkerHandle, WorkerShared, spawn};
