use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use chrono::Utc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nibble_core::db::Database;
use nibble_core::engine::{OutcomeStatus, SyncConfig, SyncEngine, SyncOutcome};
use nibble_core::history::{describe_attempt, format_relative_time, last_sync_status};

use super::helpers::truncate;
use crate::config::Config;
use crate::remote_http::{HttpRemoteStore, SessionAuth};

fn build_engine(
    db: Arc<Mutex<Database>>,
    config: &Config,
) -> Result<Arc<SyncEngine<HttpRemoteStore, SessionAuth>>> {
    let Some(remote) = config.remote()? else {
        bail!(
            "No remote configured. Set NIBBLE_REMOTE_URL (and NIBBLE_API_KEY), \
             or write remote.json in the data directory"
        );
    };
    let session = config.load_session()?;
    let store = HttpRemoteStore::new(&remote, session.as_ref());
    let auth = SessionAuth::new(session);
    Ok(Arc::new(SyncEngine::new(
        db,
        store,
        auth,
        SyncConfig::default(),
    )))
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome.status {
        OutcomeStatus::Success => println!(
            "Sync complete: {} uploaded, {} downloaded ({} ms)",
            outcome.uploaded, outcome.downloaded, outcome.duration_ms
        ),
        OutcomeStatus::Partial => println!(
            "Sync partially complete: {} uploaded, {} downloaded, {} error(s)",
            outcome.uploaded,
            outcome.downloaded,
            outcome.errors.len()
        ),
        OutcomeStatus::Failed => println!("Sync failed"),
        OutcomeStatus::Skipped => println!("Sync skipped (already running or cancelled)"),
    }
    for error in &outcome.errors {
        eprintln!("  {error}");
    }
    Ok(())
}

pub(crate) async fn cmd_sync_now(
    db: Arc<Mutex<Database>>,
    config: &Config,
    debounce: bool,
    json: bool,
) -> Result<()> {
    let engine = build_engine(db, config)?;
    let outcome = if debounce {
        engine.sync_debounced().await
    } else {
        engine.run_full_sync().await
    };
    print_outcome(&outcome, json)
}

pub(crate) async fn cmd_sync_push(
    db: Arc<Mutex<Database>>,
    config: &Config,
    json: bool,
) -> Result<()> {
    let engine = build_engine(db, config)?;
    let outcome = engine.run_upload_only().await;
    print_outcome(&outcome, json)
}

pub(crate) async fn cmd_sync_pull(
    db: Arc<Mutex<Database>>,
    config: &Config,
    json: bool,
) -> Result<()> {
    let engine = build_engine(db, config)?;
    let outcome = engine.run_download_only().await;
    print_outcome(&outcome, json)
}

pub(crate) fn cmd_sync_status(db: &Database, json: bool) -> Result<()> {
    let status = last_sync_status(db)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let now = Utc::now();
    match db.last_attempt()? {
        Some(last) => println!("Last sync: {}", describe_attempt(&last, now)),
        None => println!("Never synced"),
    }
    if let Some(ref time) = status.last_success_time {
        println!("Last successful sync: {}", format_relative_time(time, now));
    }
    Ok(())
}

pub(crate) fn cmd_sync_history(db: &Database, limit: u64, json: bool) -> Result<()> {
    let attempts = db.list_sync_attempts(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempts)?);
        return Ok(());
    }

    if attempts.is_empty() {
        eprintln!("No sync attempts recorded yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct AttemptRow {
        #[tabled(rename = "When")]
        when: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Up")]
        uploaded: u64,
        #[tabled(rename = "Down")]
        downloaded: u64,
        #[tabled(rename = "ms")]
        duration: u64,
        #[tabled(rename = "Error")]
        error: String,
    }

    let now = Utc::now();
    let rows: Vec<AttemptRow> = attempts
        .iter()
        .map(|a| AttemptRow {
            when: format_relative_time(&a.timestamp, now),
            kind: a.kind.as_str().to_string(),
            status: a.status.as_str().to_string(),
            uploaded: a.total_uploaded(),
            downloaded: a.total_downloaded(),
            duration: a.duration_ms,
            error: a.error.as_deref().map(|e| truncate(e, 40)).unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
