//! OS authentication artifact regeneration.
//!
//! After a reconciliation commits, each configured [`ArtifactCommand`] runs as
//! an external process that reads the mirror and writes one file (an
//! extrausers `passwd` or `shadow`, typically). Steps are independent: one
//! failing or timing out never stops the next, and neither ever fails the
//! reconciliation. Outcomes come back as data.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::{ARTIFACT_OUTPUT_ENV, DEFAULT_ARTIFACT_TIMEOUT, MIRROR_URL_ENV};
use crate::sync::SyncError;

/// One external step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCommand {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// File the step writes. Its parent directory is created before the step
    /// runs, and the path is passed in `EDGEDIR_ARTIFACT_OUTPUT`.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl ArtifactCommand {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// The stock `passwd` and `shadow` generators.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("passwd", "bash")
                .arg("/usr/lib/edgedir/generate-passwd.sh")
                .output("/etc/passwd-edgedir"),
            Self::new("shadow", "bash")
                .arg("/usr/lib/edgedir/generate-shadow.sh")
                .output("/var/lib/extrausers/shadow"),
        ]
    }
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub name: String,
    pub success: bool,
    /// Trimmed stdout on success, the failure text otherwise.
    pub detail: String,
}

/// Runs the configured steps in order, each under its own timeout.
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    commands: Vec<ArtifactCommand>,
    timeout: Duration,
    mirror_url: Option<String>,
}

impl Default for ArtifactGenerator {
    fn default() -> Self {
        Self::new(ArtifactCommand::defaults(), DEFAULT_ARTIFACT_TIMEOUT)
    }
}

impl ArtifactGenerator {
    pub fn new(commands: Vec<ArtifactCommand>, timeout: Duration) -> Self {
        Self {
            commands,
            timeout,
            mirror_url: None,
        }
    }

    /// A generator with no steps.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), DEFAULT_ARTIFACT_TIMEOUT)
    }

    /// Pass the mirror connection URL to every step as `EDGEDIR_MIRROR_URL`.
    pub fn with_mirror_url(mut self, url: impl Into<String>) -> Self {
        self.mirror_url = Some(url.into());
        self
    }

    pub fn commands(&self) -> &[ArtifactCommand] {
        &self.commands
    }

    /// Run every step and report each one.
    pub async fn regenerate(&self) -> Vec<ArtifactOutcome> {
        let mut outcomes = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            let outcome = match self.run_step(command).await {
                Ok(stdout) => {
                    debug!(step = %command.name, "Artifact regenerated");
                    ArtifactOutcome {
                        name: command.name.clone(),
                        success: true,
                        detail: stdout,
                    }
                }
                Err(e) => {
                    warn!(step = %command.name, "{e}");
                    ArtifactOutcome {
                        name: command.name.clone(),
                        success: false,
                        detail: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_step(&self, command: &ArtifactCommand) -> Result<String, SyncError> {
        let failed = |reason: String| SyncError::ArtifactGeneration {
            step: command.name.clone(),
            reason,
        };

        if let Some(parent) = command.output.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(url) = &self.mirror_url {
            process.env(MIRROR_URL_ENV, url);
        }
        if let Some(output) = &command.output {
            process.env(ARTIFACT_OUTPUT_ENV, output);
        }

        let output = match tokio::time::timeout(self.timeout, process.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(format!("could not start {}: {e}", command.program))),
            Err(_) => return Err(failed(format!("timed out after {:?}", self.timeout))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(failed(format!("exit {code}: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
