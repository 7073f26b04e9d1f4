//! Authority command - runs the directory, edge registry and sync dispatcher.

use std::sync::Arc;
use std::time::Duration;

use edgedir::SystemClock;
use edgedir::authority::{AuthorityService, AuthorityServiceConfig};
use edgedir::sync::DispatcherConfig;

use super::shutdown_signal;
use crate::backend::create_backend;
use crate::cli::AuthorityArgs;

const DB_FILE: &str = "authority.db";

/// Run the authority until SIGTERM/SIGINT
pub async fn run(args: &AuthorityArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (backend, _) = create_backend(&args.backend_config, DB_FILE).await?;

    let config = AuthorityServiceConfig {
        bind: format!("{}:{}", args.host, args.port),
        dispatcher: DispatcherConfig {
            push_timeout: Duration::from_secs(args.push_timeout),
            resync_interval: (args.resync_interval > 0)
                .then(|| Duration::from_secs(args.resync_interval)),
        },
    };
    let mut service =
        AuthorityService::start(Arc::clone(&backend), Arc::new(SystemClock), config).await?;

    if let Some(addr) = service.address() {
        println!("edgedir authority listening on http://{addr}");
        println!();
        println!("Available endpoints:");
        println!("  POST /api/edges/register                              - edge self-registration");
        println!("  PUT  /api/edges/{{id}}/liveness                         - mark an edge online/offline");
        println!("  GET  /api/edges                                       - list edges");
        println!("  POST /api/users/{{username}}/change-password-from-edge  - password relay");
        println!("  POST /api/sync/users/manual                           - run a sync cycle now");
        println!("  GET  /health                                          - health check");
    }

    shutdown_signal().await?;

    // Let queued cycles finish, but never hang shutdown on a slow edge.
    let flush_timeout = Duration::from_secs(30);
    match tokio::time::timeout(flush_timeout, service.stop()).await {
        Ok(result) => result?,
        Err(e) => tracing::warn!("Sync flush timed out: {e}"),
    }
    backend.close().await;

    println!("Authority shut down");
    Ok(())
}
