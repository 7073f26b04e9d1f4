//! Edge side: the local mirror, the reconciler that keeps it equal to the
//! authority's snapshots, artifact regeneration, and the client used to
//! register and relay password changes.

pub mod artifacts;
pub mod http;
pub mod mirror;
pub mod plan;
pub mod reconciler;
pub mod relay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::Result;
use crate::backend::SqlxBackend;
use crate::constants::{
    DEFAULT_EDGE_PORT, DEFAULT_REGISTER_ATTEMPTS, DEFAULT_REGISTER_DELAY, DEFAULT_SSH_PORT,
    DEFAULT_SSH_USER,
};
use crate::registry::{EdgeDescriptor, EdgeRegistration};
use crate::server::HttpServer;

pub use artifacts::{ArtifactCommand, ArtifactGenerator, ArtifactOutcome};
pub use mirror::Mirror;
pub use plan::ReconcilePlan;
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerState, ReconciliationResult};
pub use relay::AuthorityClient;

/// Everything needed to run an edge node.
#[derive(Debug, Clone)]
pub struct EdgeServiceConfig {
    /// Authority base URL. `None` skips registration.
    pub authority_url: Option<String>,
    pub name: String,
    /// Address the authority should push to.
    pub address: String,
    /// Interface the sync server binds.
    pub bind_host: String,
    /// 0 picks a free port; the bound port is what gets registered.
    pub sync_port: u16,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub register_attempts: u32,
    pub register_delay: Duration,
    pub reconciler: ReconcilerConfig,
}

impl Default for EdgeServiceConfig {
    fn default() -> Self {
        Self {
            authority_url: None,
            name: "edge".to_string(),
            address: "127.0.0.1".to_string(),
            bind_host: "0.0.0.0".to_string(),
            sync_port: DEFAULT_EDGE_PORT,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            register_attempts: DEFAULT_REGISTER_ATTEMPTS,
            register_delay: DEFAULT_REGISTER_DELAY,
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// A running edge: sync server up, registration attempted.
#[derive(Debug)]
pub struct EdgeService {
    reconciler: Arc<Reconciler>,
    server: HttpServer,
    registration: Option<EdgeDescriptor>,
}

impl EdgeService {
    /// Open the mirror, start serving pushes, then register with the authority.
    ///
    /// A registration that still fails after every retry is logged and the
    /// edge keeps serving; an operator can mark it online later.
    pub async fn start(backend: Arc<SqlxBackend>, config: EdgeServiceConfig) -> Result<Self> {
        let mirror = Mirror::open(backend).await?;
        let reconciler = Arc::new(Reconciler::new(mirror, config.reconciler));

        let mut server = HttpServer::new();
        let bound = server
            .start(
                &format!("{}:{}", config.bind_host, config.sync_port),
                http::edge_router(Arc::clone(&reconciler)),
            )
            .await?;
        info!(name = %config.name, %bound, "Edge sync server started");

        let registration = match &config.authority_url {
            Some(url) => {
                let client = AuthorityClient::new(url.clone());
                let request = EdgeRegistration {
                    name: config.name.clone(),
                    address: config.address.clone(),
                    sync_port: bound.port(),
                    ssh_port: config.ssh_port,
                    ssh_user: config.ssh_user.clone(),
                };
                match client
                    .register_with_retry(&request, config.register_attempts, config.register_delay)
                    .await
                {
                    Ok(edge) => Some(edge),
                    Err(e) => {
                        warn!(authority = %url, "Edge is serving but not registered: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            reconciler,
            server,
            registration,
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.server.address()
    }

    /// The authority's view of this edge, if registration succeeded.
    pub fn registration(&self) -> Option<&EdgeDescriptor> {
        self.registration.as_ref()
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.server.stop().await
    }
}
