//! Asynchronous bulk-deletion worker pool.
//!
//! Delete requests are fire-and-forget: a handler calls
//! [`DeletionPool::push`], answers the client immediately and a background
//! worker later applies the [`Task`] through
//! [`Repository::bunch_mark_deleted`](linkshrink_core::storage::Repository::bunch_mark_deleted).
//!
//! ## Structure
//!
//! - [`task`] - the immutable unit of work.
//! - [`queue`] - FIFO guarded by a monitor (mutex + notify) with a terminal
//!   closed state that wakes every waiting worker.
//! - [`worker`] - the per-worker drain loop.
//! - [`manager`] - [`DeletionPool`]: spawns workers, aggregates counts and
//!   owns the shared cancellation scope.
//!
//! A storage failure in any worker cancels the shared scope and closes the
//! queue: every other worker stops after its current task and further pushes
//! are rejected until the pool is rebuilt.

pub mod manager;
pub mod queue;
pub mod task;
pub mod worker;

#[cfg(test)]
mod tests;

pub use manager::{DeletionPool, PoolConfig};
pub use task::Task;
