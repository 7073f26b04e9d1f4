//! Backend creation and utility functions.

use std::path::PathBuf;
use std::sync::Arc;

use edgedir::backend::SqlxBackend;

use crate::cli::{Backend, BackendArgs};

/// Redact credentials from a PostgreSQL connection URL for safe logging
pub fn redact_postgres_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut redacted = parsed.clone();
        if !parsed.username().is_empty() {
            let _ = redacted.set_username("***");
        }
        if parsed.password().is_some() {
            let _ = redacted.set_password(Some("***"));
        }
        redacted.to_string()
    } else {
        "postgres://***@<unparsable-url>".to_string()
    }
}

/// Open the configured database.
///
/// `file_name` names the SQLite file inside the data directory, so an
/// authority and an edge can share one directory on a test host.
/// Returns the backend and the URL artifact steps should use to read it.
pub async fn create_backend(
    args: &BackendArgs,
    file_name: &str,
) -> Result<(Arc<SqlxBackend>, String), Box<dyn std::error::Error>> {
    match args.backend {
        Backend::Sqlite => {
            let data_dir = args.data_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            tokio::fs::create_dir_all(&data_dir).await?;

            let db_path = data_dir.join(file_name);
            tracing::info!("Using SQLite backend at {}", db_path.display());
            let backend = SqlxBackend::open_sqlite(&db_path).await?;
            Ok((Arc::new(backend), format!("sqlite:{}", db_path.display())))
        }
        Backend::Postgres => {
            let url = args
                .postgres_url
                .as_ref()
                .ok_or("PostgreSQL backend requires --postgres-url or EDGEDIR_POSTGRES_URL")?;

            let display_url = redact_postgres_url(url);
            tracing::info!("Connecting to PostgreSQL backend at {}", display_url);

            match SqlxBackend::connect_postgres(url).await {
                Ok(backend) => {
                    tracing::info!("Connected to PostgreSQL successfully");
                    Ok((Arc::new(backend), url.clone()))
                }
                Err(e) => {
                    Err(format!("Failed to connect to PostgreSQL at {display_url}: {e}").into())
                }
            }
        }
    }
}
