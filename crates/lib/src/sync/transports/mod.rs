//! Transport abstraction for snapshot pushes.
//!
//! The dispatcher only needs one operation from the network: deliver a
//! snapshot to an edge and return its reply. Production uses
//! [`http::HttpTransport`]; tests plug in in-process doubles.

use async_trait::async_trait;

use crate::Result;
use crate::registry::EdgeDescriptor;
use crate::sync::{protocol::SyncResponse, snapshot::SyncSnapshot};

pub mod http;

/// Delivers snapshots to edges.
#[async_trait]
pub trait EdgeTransport: Send + Sync + std::fmt::Debug {
    /// Get the transport type identifier (e.g. "http").
    fn transport_type(&self) -> &'static str;

    /// Push a snapshot to one edge and return its reply.
    ///
    /// An `Ok` reply may still report `success: false`; the dispatcher treats
    /// that as a failed push. Timeouts are applied by the caller.
    async fn push_snapshot(
        &self,
        edge: &EdgeDescriptor,
        snapshot: &SyncSnapshot,
    ) -> Result<SyncResponse>;
}
