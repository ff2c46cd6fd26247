//! Task queue — dependency-aware dispatch under a concurrency limit.
//!
//! Core components:
//! - `state` — Queue lifecycle (Idle → Running → Draining → Completed)
//! - `scheduler` — The queue itself: submission, dispatch, bulk cancellation

pub mod scheduler;
pub mod state;

pub use scheduler::TaskQueue;
pub use state::{QueueState, QueueSummary};
