//! Wiring for a running authority node.
//!
//! Owns the background sync engine and the HTTP server, and tears both down
//! explicitly. Nothing here is global: every component gets the handles it
//! needs when it is built.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use super::http::{AuthorityState, router};
use super::{Authority, UserStore, schema};
use crate::backend::SqlxBackend;
use crate::constants::DEFAULT_AUTHORITY_PORT;
use crate::registry::EdgeRegistry;
use crate::server::HttpServer;
use crate::sync::transports::EdgeTransport;
use crate::sync::transports::http::HttpTransport;
use crate::sync::{BackgroundSync, Dispatcher, DispatcherConfig, SyncHandle};
use crate::{Clock, Result};

#[derive(Debug, Clone)]
pub struct AuthorityServiceConfig {
    /// `host:port` for the HTTP API.
    pub bind: String,
    pub dispatcher: DispatcherConfig,
}

impl Default for AuthorityServiceConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_AUTHORITY_PORT}"),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// A running authority: directory, registry, sync engine and HTTP API.
#[derive(Debug)]
pub struct AuthorityService {
    authority: Authority,
    registry: EdgeRegistry,
    sync: SyncHandle,
    server: HttpServer,
}

impl AuthorityService {
    /// Start with the production HTTP transport.
    pub async fn start(
        backend: Arc<SqlxBackend>,
        clock: Arc<dyn Clock>,
        config: AuthorityServiceConfig,
    ) -> Result<Self> {
        Self::start_with_transport(backend, clock, Arc::new(HttpTransport::new()), config).await
    }

    pub async fn start_with_transport(
        backend: Arc<SqlxBackend>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn EdgeTransport>,
        config: AuthorityServiceConfig,
    ) -> Result<Self> {
        schema::initialize(&backend).await?;
        let store = UserStore::new(Arc::clone(&backend));
        let registry = EdgeRegistry::open(backend, Arc::clone(&clock)).await?;

        let dispatcher = Dispatcher::new(
            store.clone(),
            registry.clone(),
            transport,
            Arc::clone(&clock),
            config.dispatcher,
        );
        let sync = BackgroundSync::start(dispatcher);
        let authority = Authority::new(store, clock, Arc::new(sync.clone()));

        let mut server = HttpServer::new();
        let state = AuthorityState {
            authority: authority.clone(),
            registry: registry.clone(),
            sync: sync.clone(),
        };
        if let Err(e) = server.start(&config.bind, router(state)).await {
            let _ = sync.shutdown().await;
            return Err(e);
        }
        info!(address = ?server.address(), "Authority started");

        Ok(Self {
            authority,
            registry,
            sync,
            server,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn registry(&self) -> &EdgeRegistry {
        &self.registry
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.server.address()
    }

    /// Stop the API, let queued cycles finish, then stop the engine.
    pub async fn stop(&mut self) -> Result<()> {
        self.server.stop().await?;
        self.sync.flush().await?;
        self.sync.shutdown().await?;
        info!("Authority stopped");
        Ok(())
    }
}
