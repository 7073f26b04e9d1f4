//! Bulk account import from CSV or plain-text username lists.
//!
//! Imported accounts get a generated email and a temporary password, must
//! change it on first login, and are announced to edges by a single trailing
//! sync cycle.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Authority;
use crate::Result;
use crate::sync::SyncReason;
use crate::user::{NewUser, UserError, is_valid_username, normalize_username};

/// Input layout of an import file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    /// Header row with a `username` column.
    Csv,
    /// One username per line; blank lines and `#` comments ignored.
    Text,
}

impl ImportFormat {
    /// Pick the format from a file extension (`.csv` or `.txt`).
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// How imported accounts are filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Domain appended to the username to form the email.
    pub email_domain: String,
    /// Appended to the username to form the temporary password.
    /// `None` uses the current year.
    pub password_suffix: Option<String>,
}

impl ImportOptions {
    pub fn new(email_domain: impl Into<String>) -> Self {
        Self {
            email_domain: email_domain.into(),
            password_suffix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Raw input, when normalization changed it.
    pub original_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub username: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: Vec<ImportedUser>,
    pub failed: Vec<ImportFailure>,
    /// True when a sync cycle was scheduled for the new accounts.
    pub synced: bool,
}

/// Take the finished field out of the buffer.
fn finish_field(field: &mut String) -> String {
    let value = field.trim().to_string();
    field.clear();
    value
}

/// Split CSV text into records (RFC 4180).
///
/// Inside double quotes, commas and line breaks are literal and `""` is one
/// quote. Fields are trimmed. Blank lines produce no record.
fn csv_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' => record.push(finish_field(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(finish_field(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(UserError::InvalidImport {
            reason: "CSV has an unterminated quoted field".to_string(),
        }
        .into());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(finish_field(&mut field));
        records.push(record);
    }

    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(records)
}

/// Raw usernames from the `username` column of a CSV document.
fn csv_usernames(content: &str) -> Result<Vec<String>> {
    let mut records = csv_records(content)?.into_iter();
    let header = records.next().ok_or_else(|| UserError::InvalidImport {
        reason: "CSV file is empty".to_string(),
    })?;
    let column = header
        .iter()
        .position(|name| name.eq_ignore_ascii_case("username"))
        .ok_or_else(|| UserError::InvalidImport {
            reason: "CSV header has no 'username' column".to_string(),
        })?;

    Ok(records
        .map(|mut record| {
            if column < record.len() {
                record.swap_remove(column)
            } else {
                String::new()
            }
        })
        .collect())
}

fn text_usernames(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl Authority {
    /// Create one account per username in `content`.
    ///
    /// Per-row problems land in [`ImportReport::failed`]; only an unreadable
    /// file fails the whole call. At most one cycle is scheduled, after the
    /// last row, and only if something was created.
    pub async fn bulk_import(
        &self,
        content: &str,
        format: ImportFormat,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let raw_names = match format {
            ImportFormat::Csv => csv_usernames(content)?,
            ImportFormat::Text => text_usernames(content),
        };
        let suffix = options
            .password_suffix
            .clone()
            .unwrap_or_else(|| self.clock().current_year().to_string());

        let mut report = ImportReport::default();
        for raw in raw_names {
            if raw.is_empty() {
                report.failed.push(ImportFailure {
                    username: "unknown".to_string(),
                    reason: "Username is required".to_string(),
                });
                continue;
            }

            let username = normalize_username(&raw);
            if !is_valid_username(&username) {
                report.failed.push(ImportFailure {
                    username: raw,
                    reason: "Invalid username format after normalization".to_string(),
                });
                continue;
            }

            match self.store().find_by_username(&username).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    report.failed.push(ImportFailure {
                        username,
                        reason: "User already exists".to_string(),
                    });
                    continue;
                }
                // Earlier rows may already be committed; keep going so they still get a cycle.
                Err(e) => {
                    warn!(username = %username, "Import lookup failed: {e}");
                    report.failed.push(ImportFailure {
                        username,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            let new_user = NewUser {
                email: format!("{username}@{}", options.email_domain),
                password: format!("{username}{suffix}"),
                must_change_password: true,
                username: username.clone(),
                ..Default::default()
            };
            match self.insert_user(new_user).await {
                Ok(record) => report.created.push(ImportedUser {
                    id: record.id,
                    original_username: (raw != record.username).then_some(raw),
                    username: record.username,
                    email: record.email,
                }),
                Err(e) => {
                    warn!(username = %username, "Import row failed: {e}");
                    report.failed.push(ImportFailure {
                        username,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.created.is_empty() {
            self.scheduler.schedule(SyncReason::BulkImport);
            report.synced = true;
        }
        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "Bulk import finished"
        );
        Ok(report)
    }
}
