//! Edge registry types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::RegistryError;
use crate::constants::{DEFAULT_EDGE_PORT, DEFAULT_SSH_PORT, DEFAULT_SSH_USER};

/// Whether the dispatcher should push to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Online => "online",
            Liveness::Offline => "offline",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Liveness::Online)
    }
}

impl From<bool> for Liveness {
    fn from(online: bool) -> Self {
        if online {
            Liveness::Online
        } else {
            Liveness::Offline
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Liveness {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Liveness::Online),
            "offline" => Ok(Liveness::Offline),
            other => Err(RegistryError::InvalidLiveness {
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of the most recent push to an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// RFC 3339 time the push settled.
    pub at: String,
    pub success: bool,
    pub message: String,
}

/// Everything the authority knows about one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub id: i64,
    pub name: String,
    /// Host or IP the authority pushes to. Unique across the registry.
    pub address: String,
    pub sync_port: u16,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub liveness: Liveness,
    pub registered_at: String,
    pub last_seen_at: String,
    pub last_sync: Option<SyncOutcome>,
}

impl EdgeDescriptor {
    /// `host:port` the sync endpoint listens on.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.sync_port)
    }
}

/// Body of an edge self-registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRegistration {
    pub name: String,
    pub address: String,
    #[serde(default = "default_sync_port")]
    pub sync_port: u16,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
}

impl EdgeRegistration {
    /// Registration with default ports and SSH user.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            sync_port: DEFAULT_EDGE_PORT,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
        }
    }

    pub fn with_sync_port(mut self, port: u16) -> Self {
        self.sync_port = port;
        self
    }
}

fn default_sync_port() -> u16 {
    DEFAULT_EDGE_PORT
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}
