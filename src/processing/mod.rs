//! Convergence logic.
//!
//! - [`allocator`] - next free /24 inside a VNet
//! - [`retry`] - bounded exponential backoff around remote calls
//! - [`reconcile`] - describe/compare/create-or-adopt for every resource kind
//! - [`subnet`] - subnet reconciliation with secondary lookup

mod allocator;
mod reconcile;
mod retry;
mod subnet;

// Re-export public functions
pub use allocator::{find_next_available, ALLOCATION_MASK};
pub use reconcile::{Ensured, JournalEntry, Outcome, Reconciler};
pub use retry::{with_retry, RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use subnet::SubnetRequest;
