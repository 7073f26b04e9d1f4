//! Synchronization from the authority to its edges.
//!
//! A cycle captures a full [`SyncSnapshot`] of the directory and pushes it to
//! every online edge concurrently. Delivery is at-least-once and idempotent by
//! construction: every push carries complete state, so a duplicate, reordered,
//! or retried push converges the edge to the same mirror.
//!
//! ## Architecture
//!
//! - [`Dispatcher`] runs one cycle: snapshot, fan-out with a per-edge timeout, settle.
//! - [`BackgroundSync`] owns the dispatcher on its own task, coalesces queued
//!   requests, and runs a periodic resync.
//! - [`SyncHandle`] is the cloneable front end and the production [`SyncScheduler`].
//! - [`transports::EdgeTransport`] is the network seam.

pub mod background;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod snapshot;
pub mod transports;

pub use background::{BackgroundSync, SyncCommand, SyncHandle};
pub use dispatcher::{CycleReport, Dispatcher, DispatcherConfig, EdgePushResult};
pub use error::SyncError;
pub use protocol::SyncResponse;
pub use scheduler::{SyncReason, SyncScheduler};
pub use snapshot::SyncSnapshot;
