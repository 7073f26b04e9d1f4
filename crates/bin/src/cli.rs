//! CLI argument definitions for the edgedir binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Storage backend type
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Backend {
    /// SQLite database file in the data directory (default)
    Sqlite,
    /// PostgreSQL database (requires --postgres-url)
    Postgres,
}

/// edgedir: one user directory, many edge mirrors
#[derive(Parser, Debug)]
#[command(name = "edgedir")]
#[command(about = "Distribute a central user directory to edge nodes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the authority: user directory, edge registry, sync dispatcher
    Authority(AuthorityArgs),
    /// Run an edge: local mirror, reconciler, artifact regeneration
    Edge(EdgeArgs),
    /// Relay a password changed on this edge to the authority (password read from stdin)
    RelayPassword(RelayArgs),
    /// Check health of a running authority or edge
    Health(HealthArgs),
}

/// Storage options shared by the authority and the edge.
#[derive(clap::Args, Debug, Clone)]
pub struct BackendArgs {
    /// Storage backend to use
    #[arg(short, long, default_value = "sqlite", env = "EDGEDIR_BACKEND")]
    pub backend: Backend,

    /// Data directory for the SQLite database file
    #[arg(short = 'D', long, env = "EDGEDIR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL (required when backend=postgres)
    #[arg(long, env = "EDGEDIR_POSTGRES_URL")]
    pub postgres_url: Option<String>,
}

/// Arguments for the authority command
#[derive(clap::Args, Debug)]
pub struct AuthorityArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = edgedir::constants::DEFAULT_AUTHORITY_PORT, env = "EDGEDIR_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "EDGEDIR_HOST")]
    pub host: String,

    /// Per-edge push timeout in seconds
    #[arg(long, default_value_t = edgedir::constants::DEFAULT_PUSH_TIMEOUT.as_secs(), env = "EDGEDIR_PUSH_TIMEOUT")]
    pub push_timeout: u64,

    /// Seconds between unprompted full sync cycles (0 disables)
    #[arg(long, default_value_t = 300, env = "EDGEDIR_RESYNC_INTERVAL")]
    pub resync_interval: u64,

    #[command(flatten)]
    pub backend_config: BackendArgs,
}

/// Arguments for the edge command
#[derive(clap::Args, Debug)]
pub struct EdgeArgs {
    /// Authority base URL, e.g. http://authority:8000
    #[arg(long, env = "EDGEDIR_AUTHORITY_URL")]
    pub authority_url: Option<String>,

    /// Name this edge registers under
    #[arg(long, env = "EDGEDIR_EDGE_NAME")]
    pub name: String,

    /// Address the authority should push to
    #[arg(long, env = "EDGEDIR_EDGE_ADDRESS")]
    pub address: String,

    /// Port the sync server listens on
    #[arg(short, long, default_value_t = edgedir::constants::DEFAULT_EDGE_PORT, env = "EDGEDIR_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "EDGEDIR_HOST")]
    pub host: String,

    /// SSH port advertised to the authority
    #[arg(long, default_value_t = edgedir::constants::DEFAULT_SSH_PORT, env = "EDGEDIR_SSH_PORT")]
    pub ssh_port: u16,

    /// SSH user advertised to the authority
    #[arg(long, default_value = edgedir::constants::DEFAULT_SSH_USER, env = "EDGEDIR_SSH_USER")]
    pub ssh_user: String,

    /// Registration attempts before giving up
    #[arg(long, default_value_t = edgedir::constants::DEFAULT_REGISTER_ATTEMPTS, env = "EDGEDIR_REGISTER_ATTEMPTS")]
    pub register_attempts: u32,

    /// Per-step artifact timeout in seconds
    #[arg(long, default_value_t = 10, env = "EDGEDIR_ARTIFACT_TIMEOUT")]
    pub artifact_timeout: u64,

    /// Skip artifact regeneration (mirror only)
    #[arg(long, env = "EDGEDIR_NO_ARTIFACTS")]
    pub no_artifacts: bool,

    #[command(flatten)]
    pub backend_config: BackendArgs,
}

/// Arguments for the relay-password command
#[derive(clap::Args, Debug)]
pub struct RelayArgs {
    /// Authority base URL
    #[arg(long, env = "EDGEDIR_AUTHORITY_URL")]
    pub authority_url: String,

    /// Account whose password changed
    #[arg(short, long, env = "PAM_USER")]
    pub username: String,

    /// Name of this edge, sent with the relay
    #[arg(long, env = "EDGEDIR_EDGE_NAME")]
    pub edge_host: Option<String>,
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Base URL of the server to check
    #[arg(short, long, default_value = "http://127.0.0.1:8000", env = "EDGEDIR_HEALTH_URL")]
    pub url: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}
