//! # Huddle
//!
//! Client-side request batching: many independently submitted
//! "execute these actions" requests, as few upstream execution calls as
//! possible, and an individual result handle for every caller.
//!
//! ## Core Concepts
//!
//! - [`Action`] = commands for one device
//! - [`ExecutionQueue`] = accumulates actions into a batch and decides when to flush
//! - [`QueuedExecution`] = the handle a caller awaits for its execution id
//! - [`ActionExecutor`] = the transport that performs one upstream call per batch
//!
//! ## Architecture
//!
//! ```text
//! caller A ── add() ──┐
//!                     │   lock: merge by device, register waiter
//! caller B ── add() ──┼─► ExecutionQueue ──────────────────────────┐
//!                     │        │                                   │
//! caller C ── add() ──┘        │ timer / max_actions /             │
//!                              │ partition change / flush()        │
//!                              ▼                                   │
//!                       detached Batch (lock released)             │
//!                              │                                   │
//!                              ▼                                   │
//!                     ActionExecutor.execute() ─► execution id ────┤
//!                                                                  ▼
//!                                                 every waiter of the batch
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One action per device per batch** - commands for the same device are
//!    concatenated in submission order
//! 2. **One partition per batch** - a different `(mode, label)` closes the
//!    accumulating batch first
//! 3. **At most one timer** - the debounce timer starts with the first
//!    admission into an empty batch
//! 4. **No IO under the lock** - executor calls and waiter resolution happen
//!    after the batch is detached
//! 5. **No stranded callers** - every waiter ends fulfilled, failed, or
//!    cancelled, exactly once
//!
//! ## Example
//!
//! ```ignore
//! use huddle_core::{Action, Command, ExecutionQueue, QueueSettings};
//!
//! let queue = ExecutionQueue::new(my_executor, QueueSettings::default());
//!
//! let close = queue
//!     .add(vec![Action::new("io://hub/1", vec![Command::new("close")])], None, None)
//!     .await?;
//! let open = queue
//!     .add(vec![Action::new("io://hub/1", vec![Command::new("open")])], None, None)
//!     .await?;
//!
//! // One upstream call with `io://hub/1: [close, open]`.
//! assert_eq!(close.await?, open.await?);
//!
//! queue.shutdown().await;
//! ```
//!
//! ## Guarantees
//!
//! - **No retries**: executor errors reach every waiter unchanged
//! - **In-memory only**: nothing survives a restart
//! - **No cross-partition ordering**: detached batches are independent

mod batch;
mod client;
mod core;
mod error;
mod executor;
mod queue;
mod settings;
mod stats;
mod waiter;

// Queue behaviour tests (test-only)
#[cfg(test)]
mod queue_tests;


// Re-export data model
pub use crate::core::{Action, Command, ExecutionMode, Parameter, Partition};

// Re-export error types
pub use crate::error::QueueError;

// Re-export queue types
pub use batch::merge_actions;
pub use queue::ExecutionQueue;
pub use settings::QueueSettings;
pub use stats::QueueStats;
pub use waiter::{QueuedExecution, WaiterState};

// Re-export executor boundary
pub use client::ActionClient;
pub use executor::ActionExecutor;

// Re-export commonly used external types
pub use async_trait::async_trait;
