//! Edge command - serves snapshot pushes and keeps the local mirror converged.

use std::time::Duration;

use edgedir::edge::{EdgeService, EdgeServiceConfig, ReconcilerConfig};

use super::shutdown_signal;
use crate::backend::create_backend;
use crate::cli::EdgeArgs;

const DB_FILE: &str = "edge.db";

/// Run the edge until SIGTERM/SIGINT
pub async fn run(args: &EdgeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (backend, mirror_url) = create_backend(&args.backend_config, DB_FILE).await?;

    let mut reconciler = if args.no_artifacts {
        ReconcilerConfig::without_artifacts()
    } else {
        ReconcilerConfig::default()
    };
    reconciler.artifact_timeout = Duration::from_secs(args.artifact_timeout);
    reconciler.mirror_url = Some(mirror_url);

    let config = EdgeServiceConfig {
        authority_url: args.authority_url.clone(),
        name: args.name.clone(),
        address: args.address.clone(),
        bind_host: args.host.clone(),
        sync_port: args.port,
        ssh_port: args.ssh_port,
        ssh_user: args.ssh_user.clone(),
        register_attempts: args.register_attempts,
        reconciler,
        ..Default::default()
    };
    let mut service = EdgeService::start(backend.clone(), config).await?;

    if let Some(addr) = service.address() {
        println!("edgedir edge '{}' listening on http://{addr}", args.name);
    }
    match service.registration() {
        Some(edge) => println!("Registered with authority as edge {}", edge.id),
        None if args.authority_url.is_some() => {
            eprintln!("Warning: not registered with the authority; pushes will not arrive until it is")
        }
        None => println!("No authority configured; waiting for pushes"),
    }

    shutdown_signal().await?;
    service.stop().await?;
    backend.close().await;

    println!("Edge shut down");
    Ok(())
}
