//! Read-side helpers over the append-only sync history.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::models::SyncAttemptRecord;

/// What the UI shows next to the sync button.
#[derive(Debug, Clone, Serialize)]
pub struct LastSyncStatus {
    pub last_sync_time: Option<String>,
    pub last_sync_status: Option<String>,
    pub last_success_time: Option<String>,
}

pub fn last_sync_status(db: &Database) -> Result<LastSyncStatus> {
    let last = db.last_attempt()?;
    let last_ok = db.last_successful_attempt()?;
    Ok(LastSyncStatus {
        last_sync_time: last.as_ref().map(|r| r.timestamp.clone()),
        last_sync_status: last.as_ref().map(|r| r.status.as_str().to_string()),
        last_success_time: last_ok.map(|r| r.timestamp),
    })
}

/// Human-relative rendering of an attempt timestamp ("2 minutes ago").
/// Malformed or future timestamps render as "just now".
#[must_use]
pub fn format_relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(then) = DateTime::parse_from_rfc3339(timestamp) else {
        return "just now".to_string();
    };
    let seconds = (now - then.with_timezone(&Utc)).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

#[must_use]
pub fn describe_attempt(record: &SyncAttemptRecord, now: DateTime<Utc>) -> String {
    format!(
        "{} sync {} {} (up {}, down {})",
        record.kind.as_str(),
        record.status.as_str(),
        format_relative_time(&record.timestamp, now),
        record.total_uploaded(),
        record.total_downloaded(),
    )
}
