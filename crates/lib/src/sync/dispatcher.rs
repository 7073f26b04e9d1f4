//! One sync cycle: snapshot, fan-out, settle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use super::error::SyncError;
use super::protocol::SyncResponse;
use super::snapshot::SyncSnapshot;
use super::transports::EdgeTransport;
use crate::authority::UserStore;
use crate::constants::{DEFAULT_PUSH_TIMEOUT, DEFAULT_RESYNC_INTERVAL};
use crate::registry::{EdgeDescriptor, EdgeRegistry, SyncOutcome};
use crate::{Clock, Result};

/// Tunables for the dispatcher and its background engine.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on a single push to a single edge.
    pub push_timeout: Duration,
    /// Interval between unprompted full cycles. `None` disables them.
    pub resync_interval: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            resync_interval: Some(DEFAULT_RESYNC_INTERVAL),
        }
    }
}

/// Result of pushing one snapshot to one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePushResult {
    pub edge_id: i64,
    pub edge_name: String,
    pub endpoint: String,
    pub success: bool,
    pub message: String,
    /// The edge's reply, when one arrived.
    pub response: Option<SyncResponse>,
}

/// Summary of a settled cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub snapshot_version: u64,
    pub users_count: usize,
    pub edges_synced: usize,
    pub edges_failed: usize,
    /// One entry per online edge, in edge id order.
    pub results: Vec<EdgePushResult>,
    pub message: String,
}

impl CycleReport {
    /// True when every dispatched push succeeded (vacuously true with no edges).
    pub fn success(&self) -> bool {
        self.edges_failed == 0
    }
}

/// Builds a snapshot and pushes it to every online edge.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: UserStore,
    registry: EdgeRegistry,
    transport: Arc<dyn EdgeTransport>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: UserStore,
        registry: EdgeRegistry,
        transport: Arc<dyn EdgeTransport>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one full cycle.
    ///
    /// Returns once every push has settled. Individual edge failures are
    /// reported in the [`CycleReport`]; only a failure to read the directory
    /// or the registry makes the cycle itself an error.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let snapshot = Arc::new(SyncSnapshot::capture(&self.store, self.clock.as_ref()).await?);
        let edges = self.registry.list_online().await?;

        let span = info_span!(
            "sync_cycle",
            version = snapshot.version,
            users = snapshot.len(),
            edges = edges.len()
        );
        self.fan_out(snapshot, edges).instrument(span).await
    }

    async fn fan_out(
        &self,
        snapshot: Arc<SyncSnapshot>,
        edges: Vec<EdgeDescriptor>,
    ) -> Result<CycleReport> {
        if edges.is_empty() {
            info!("No online edges to sync");
            return Ok(CycleReport {
                snapshot_version: snapshot.version,
                users_count: snapshot.len(),
                edges_synced: 0,
                edges_failed: 0,
                results: Vec::new(),
                message: "No online edges to sync".to_string(),
            });
        }

        let push_timeout = self.config.push_timeout;
        let mut pending: BTreeMap<i64, EdgeDescriptor> = BTreeMap::new();
        let mut set = JoinSet::new();
        for edge in edges {
            let transport = Arc::clone(&self.transport);
            let snapshot = Arc::clone(&snapshot);
            let task_edge = edge.clone();
            pending.insert(edge.id, edge);
            set.spawn(async move {
                let outcome =
                    match tokio::time::timeout(push_timeout, transport.push_snapshot(&task_edge, &snapshot))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(SyncError::Timeout {
                            target: task_edge.endpoint(),
                            after: push_timeout,
                        }
                        .into()),
                    };
                (task_edge.id, outcome)
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = set.join_next().await {
            let (edge_id, outcome) = match joined {
                Ok(settled) => settled,
                Err(e) => {
                    warn!("Push task did not complete: {e}");
                    continue;
                }
            };
            let Some(edge) = pending.remove(&edge_id) else {
                continue;
            };
            let result = match outcome {
                Ok(response) if response.success => {
                    debug!(edge = %edge.endpoint(), created = response.users_created,
                        updated = response.users_updated, deleted = response.users_deleted,
                        "Edge synchronized");
                    EdgePushResult {
                        edge_id: edge.id,
                        edge_name: edge.name.clone(),
                        endpoint: edge.endpoint(),
                        success: true,
                        message: response.message.clone(),
                        response: Some(response),
                    }
                }
                Ok(response) => {
                    warn!(edge = %edge.endpoint(), "Edge reported failure: {}", response.message);
                    EdgePushResult {
                        edge_id: edge.id,
                        edge_name: edge.name.clone(),
                        endpoint: edge.endpoint(),
                        success: false,
                        message: response.message.clone(),
                        response: Some(response),
                    }
                }
                Err(e) => {
                    warn!(edge = %edge.endpoint(), "Push failed: {e}");
                    EdgePushResult {
                        edge_id: edge.id,
                        edge_name: edge.name.clone(),
                        endpoint: edge.endpoint(),
                        success: false,
                        message: e.to_string(),
                        response: None,
                    }
                }
            };
            self.record(&result).await;
            results.push(result);
        }

        // A task that panicked never reported back; its edge still failed this cycle.
        for (_, edge) in pending {
            let result = EdgePushResult {
                edge_id: edge.id,
                edge_name: edge.name.clone(),
                endpoint: edge.endpoint(),
                success: false,
                message: "push task aborted".to_string(),
                response: None,
            };
            self.record(&result).await;
            results.push(result);
        }

        results.sort_by_key(|r| r.edge_id);
        let edges_synced = results.iter().filter(|r| r.success).count();
        let edges_failed = results.len() - edges_synced;
        info!(edges_synced, edges_failed, "Sync cycle settled");

        Ok(CycleReport {
            snapshot_version: snapshot.version,
            users_count: snapshot.len(),
            edges_synced,
            edges_failed,
            message: format!(
                "Synchronized {} users to {edges_synced} edges ({edges_failed} failed)",
                snapshot.len()
            ),
            results,
        })
    }

    async fn record(&self, result: &EdgePushResult) {
        let outcome = SyncOutcome {
            at: self.clock.now_rfc3339(),
            success: result.success,
            message: result.message.clone(),
        };
        if let Err(e) = self
            .registry
            .record_sync_outcome(result.edge_id, &outcome)
            .await
        {
            warn!(edge_id = result.edge_id, "Failed to record sync outcome: {e}");
        }
    }
}
