//! The sync orchestrator: reconciles the device store with the shared remote
//! store across all record collections.
//!
//! One attempt walks CheckingAuth → Uploading → Downloading → Reconciling →
//! Classifying. Stages collect errors instead of throwing them; only the
//! orchestrator mutates the local store (commit) and the sync history.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{SyncEntity, decode_row, encode_row};
use crate::db::{Database, SyncSnapshot, SyncedMarks};
use crate::models::{
    CollectionCounts, DiaryEntry, ProfileSettings, Recipe, SyncAttemptRecord, SyncKind,
    SyncStatus, WeightEntry, new_record_id,
};
use crate::remote::{AuthProvider, RemoteError, RemoteStore};

const COLLECTIONS: &[&str] = &[
    DiaryEntry::COLLECTION,
    Recipe::COLLECTION,
    WeightEntry::COLLECTION,
    ProfileSettings::COLLECTION,
];

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Requests arriving within this window coalesce into one run.
    pub debounce_window: Duration,
    /// Bound on each remote call; an elapsed timeout is a type-level error,
    /// never a silent hang.
    pub call_timeout: Duration,
    /// How many attempts the history keeps.
    pub history_limit: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            call_timeout: Duration::from_secs(10),
            history_limit: 50,
        }
    }
}

/// Attempt outcome as seen by callers. `Skipped` covers both a run refused by
/// the single-flight guard and a run aborted by cancellation; neither writes
/// a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub uploaded: u64,
    pub downloaded: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncOutcome {
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            uploaded: 0,
            downloaded: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Default)]
struct UploadReport {
    uploaded: u64,
    synced_ids: Vec<String>,
    errors: Vec<String>,
    cancelled: bool,
}

#[derive(Debug)]
struct DownloadReport<E> {
    records: Vec<E>,
    fetched: u64,
    errors: Vec<String>,
    cancelled: bool,
}

impl<E> Default for DownloadReport<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            fetched: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }
}

/// Union merge, local precedence: keep every downloaded record whose merge id
/// is unseen locally, drop the rest (even when remote content differs).
fn merge_new<E: SyncEntity>(local: &[E], downloaded: Vec<E>) -> Vec<E> {
    let seen: HashSet<&str> = local.iter().map(E::merge_id).collect();
    let mut added: HashSet<String> = HashSet::new();
    downloaded
        .into_iter()
        .filter(|record| {
            !seen.contains(record.merge_id()) && added.insert(record.merge_id().to_string())
        })
        .collect()
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct PendingBurst {
    deadline: Arc<Mutex<Instant>>,
    rx: watch::Receiver<Option<SyncOutcome>>,
}

pub struct SyncEngine<R, A> {
    db: Arc<Mutex<Database>>,
    remote: R,
    auth: A,
    config: SyncConfig,
    in_flight: AtomicBool,
    debounce: tokio::sync::Mutex<Option<PendingBurst>>,
}

impl<R, A> SyncEngine<R, A>
where
    R: RemoteStore + 'static,
    A: AuthProvider + 'static,
{
    pub fn new(db: Arc<Mutex<Database>>, remote: R, auth: A, config: SyncConfig) -> Self {
        Self {
            db,
            remote,
            auth,
            config,
            in_flight: AtomicBool::new(false),
            debounce: tokio::sync::Mutex::new(None),
        }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn run_full_sync(&self) -> SyncOutcome {
        self.run(SyncKind::Full).await
    }

    pub async fn run_upload_only(&self) -> SyncOutcome {
        self.run(SyncKind::Upload).await
    }

    pub async fn run_download_only(&self) -> SyncOutcome {
        self.run(SyncKind::Download).await
    }

    /// Coalesce bursts of sync requests: each call resets the pending window
    /// and every caller in the burst resolves with the single run's outcome.
    pub async fn sync_debounced(self: Arc<Self>) -> SyncOutcome {
        let mut rx = {
            let mut pending = self.debounce.lock().await;
            if let Some(burst) = pending.as_ref() {
                let mut deadline = burst
                    .deadline
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                *deadline = Instant::now() + self.config.debounce_window;
                burst.rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                let deadline = Arc::new(Mutex::new(Instant::now() + self.config.debounce_window));
                *pending = Some(PendingBurst {
                    deadline: Arc::clone(&deadline),
                    rx: rx.clone(),
                });
                let engine = Arc::clone(&self);
                tokio::spawn(async move {
                    loop {
                        let target = *deadline.lock().unwrap_or_else(PoisonError::into_inner);
                        if Instant::now() >= target {
                            break;
                        }
                        tokio::time::sleep_until(target).await;
                    }
                    *engine.debounce.lock().await = None;
                    let outcome = engine.run_full_sync().await;
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(SyncOutcome::skipped),
            Err(_) => SyncOutcome::skipped(),
        }
    }

    async fn run(&self, kind: SyncKind) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(kind = kind.as_str(), "sync already in flight, skipping");
            return SyncOutcome::skipped();
        }
        let _guard = FlightGuard(&self.in_flight);
        self.run_guarded(kind).await
    }

    async fn run_guarded(&self, kind: SyncKind) -> SyncOutcome {
        let started = std::time::Instant::now();
        debug!(kind = kind.as_str(), "sync attempt starting");

        let owner = match self.auth.current_owner() {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                return self.finish_failed(kind, started, "Auth session missing".to_string());
            }
            Err(RemoteError::Cancelled) => return SyncOutcome::skipped(),
            Err(err) => return self.finish_failed(kind, started, err.to_string()),
        };

        let snapshot = match self.db().sync_snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return self.finish_failed(kind, started, format!("Local store error: {err:#}"));
            }
        };

        let mut counts: BTreeMap<String, CollectionCounts> = COLLECTIONS
            .iter()
            .map(|c| ((*c).to_string(), CollectionCounts::default()))
            .collect();
        let mut errors: Vec<String> = Vec::new();
        let mut marks = SyncedMarks::default();
        let mut cancelled = false;

        // Upload: each type touches a disjoint remote collection, so the four
        // batches run concurrently.
        if matches!(kind, SyncKind::Full | SyncKind::Upload) {
            let unsynced_profile: Vec<ProfileSettings> = if snapshot.profile_unsynced {
                snapshot.profile.clone()
            } else {
                Vec::new()
            };
            let unsynced_diary = unsynced(&snapshot.diary, &snapshot.unsynced);
            let unsynced_recipes = unsynced(&snapshot.recipes, &snapshot.unsynced);
            let unsynced_weights = unsynced(&snapshot.weights, &snapshot.unsynced);
            let (diary, recipes, weights, profile) = tokio::join!(
                self.upload_collection(&owner, &unsynced_diary),
                self.upload_collection(&owner, &unsynced_recipes),
                self.upload_collection(&owner, &unsynced_weights),
                self.upload_collection(&owner, &unsynced_profile),
            );
            marks.diary = diary.synced_ids.clone();
            marks.recipes = recipes.synced_ids.clone();
            marks.weights = weights.synced_ids.clone();
            marks.profile = profile.uploaded > 0;
            for (collection, report) in [
                (DiaryEntry::COLLECTION, &diary),
                (Recipe::COLLECTION, &recipes),
                (WeightEntry::COLLECTION, &weights),
                (ProfileSettings::COLLECTION, &profile),
            ] {
                if let Some(c) = counts.get_mut(collection) {
                    c.uploaded = report.uploaded;
                }
                errors.extend(report.errors.iter().cloned());
                cancelled |= report.cancelled;
            }
        }

        if cancelled {
            debug!(kind = kind.as_str(), "sync aborted during upload");
            return SyncOutcome::skipped();
        }

        // Download + reconcile. A failing type reports its error and zero
        // rows while the others proceed.
        if matches!(kind, SyncKind::Full | SyncKind::Download) {
            let (diary, recipes, weights, profile) = tokio::join!(
                self.download_collection::<DiaryEntry>(&owner),
                self.download_collection::<Recipe>(&owner),
                self.download_collection::<WeightEntry>(&owner),
                self.download_collection::<ProfileSettings>(&owner),
            );
            for (collection, fetched, report_errors, report_cancelled) in [
                (DiaryEntry::COLLECTION, diary.fetched, &diary.errors, diary.cancelled),
                (Recipe::COLLECTION, recipes.fetched, &recipes.errors, recipes.cancelled),
                (
                    WeightEntry::COLLECTION,
                    weights.fetched,
                    &weights.errors,
                    weights.cancelled,
                ),
                (
                    ProfileSettings::COLLECTION,
                    profile.fetched,
                    &profile.errors,
                    profile.cancelled,
                ),
            ] {
                if let Some(c) = counts.get_mut(collection) {
                    c.downloaded = fetched;
                }
                errors.extend(report_errors.iter().cloned());
                cancelled |= report_cancelled;
            }

            if cancelled {
                debug!(kind = kind.as_str(), "sync aborted during download");
                return SyncOutcome::skipped();
            }

            if let Err(err) = self.reconcile_and_commit(
                &snapshot,
                diary.records,
                recipes.records,
                weights.records,
                profile.records,
                &marks,
            ) {
                errors.push(format!("Failed to commit merged records: {err:#}"));
            }
        } else if let Err(err) = self
            .db()
            .commit_merge(&[], &[], &[], None, &marks)
        {
            errors.push(format!("Failed to record uploaded state: {err:#}"));
        }

        self.finish(kind, started, counts, errors)
    }

    fn reconcile_and_commit(
        &self,
        snapshot: &SyncSnapshot,
        diary: Vec<DiaryEntry>,
        recipes: Vec<Recipe>,
        weights: Vec<WeightEntry>,
        profile: Vec<ProfileSettings>,
        marks: &SyncedMarks,
    ) -> anyhow::Result<()> {
        let new_diary = merge_new(&snapshot.diary, diary);
        let new_recipes = merge_new(&snapshot.recipes, recipes);
        let new_weights = merge_new(&snapshot.weights, weights);
        // Singleton bootstrap: remote profile applies only when none exists.
        let new_profile = if snapshot.profile.is_empty() {
            profile.into_iter().next()
        } else {
            None
        };
        debug!(
            diary = new_diary.len(),
            recipes = new_recipes.len(),
            weights = new_weights.len(),
            profile = new_profile.is_some(),
            "merging downloaded records"
        );
        self.db().commit_merge(
            &new_diary,
            &new_recipes,
            &new_weights,
            new_profile.as_ref(),
            marks,
        )
    }

    async fn upload_collection<E: SyncEntity>(&self, owner: &str, records: &[E]) -> UploadReport {
        let mut report = UploadReport::default();
        if records.is_empty() {
            return report;
        }

        let mut rows = Vec::with_capacity(records.len());
        let mut sent_ids = Vec::with_capacity(records.len());
        for record in records {
            match encode_row(record, owner) {
                Ok(row) => {
                    rows.push(row);
                    sent_ids.push(record.merge_id().to_string());
                }
                Err(err) => report
                    .errors
                    .push(format!("Failed to encode {}: {err:#}", record.label())),
            }
        }

        let labels: BTreeMap<&str, String> = records
            .iter()
            .map(|r| (r.merge_id(), r.label()))
            .collect();
        let call = self
            .remote
            .upsert(E::COLLECTION, E::CONFLICT_KEY, owner, rows);
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(outcome)) => {
                report.uploaded = outcome.succeeded;
                let failed_ids: HashSet<&str> =
                    outcome.failed.iter().map(|item| item.id.as_str()).collect();
                report.synced_ids = sent_ids
                    .into_iter()
                    .filter(|id| !failed_ids.contains(id.as_str()))
                    .collect();
                for item in outcome.failed {
                    let label = labels.get(item.id.as_str()).unwrap_or(&item.label);
                    report
                        .errors
                        .push(format!("Failed to upload '{label}': {}", item.message));
                }
            }
            Ok(Err(RemoteError::Cancelled)) => report.cancelled = true,
            Ok(Err(err)) => report
                .errors
                .push(format!("{}: upload failed: {err}", E::COLLECTION)),
            Err(_) => report.errors.push(format!(
                "{}: upload timed out after {:?}",
                E::COLLECTION,
                self.config.call_timeout
            )),
        }
        debug!(
            collection = E::COLLECTION,
            uploaded = report.uploaded,
            errors = report.errors.len(),
            "upload stage done"
        );
        report
    }

    async fn download_collection<E: SyncEntity>(&self, owner: &str) -> DownloadReport<E> {
        let mut report = DownloadReport::default();
        let call = self.remote.fetch_all(E::COLLECTION, owner);
        let rows = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(RemoteError::Cancelled)) => {
                report.cancelled = true;
                return report;
            }
            Ok(Err(err)) => {
                report
                    .errors
                    .push(format!("{}: download failed: {err}", E::COLLECTION));
                return report;
            }
            Err(_) => {
                report.errors.push(format!(
                    "{}: download timed out after {:?}",
                    E::COLLECTION,
                    self.config.call_timeout
                ));
                return report;
            }
        };

        // "downloaded" reports what was fetched, before the merge filter.
        report.fetched = rows.len() as u64;
        for row in rows {
            match decode_row::<E>(row) {
                Ok(record) => report.records.push(record),
                Err(err) => report
                    .errors
                    .push(format!("{}: skipped malformed row: {err:#}", E::COLLECTION)),
            }
        }
        debug!(
            collection = E::COLLECTION,
            fetched = report.fetched,
            errors = report.errors.len(),
            "download stage done"
        );
        report
    }

    /// Status is a pure function of the error/count data of this attempt.
    fn finish(
        &self,
        kind: SyncKind,
        started: std::time::Instant,
        counts: BTreeMap<String, CollectionCounts>,
        errors: Vec<String>,
    ) -> SyncOutcome {
        let uploaded: u64 = counts.values().map(|c| c.uploaded).sum();
        let downloaded: u64 = counts.values().map(|c| c.downloaded).sum();
        let status = if errors.is_empty() {
            SyncStatus::Success
        } else if uploaded + downloaded > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = SyncAttemptRecord {
            id: new_record_id(),
            timestamp: Utc::now().to_rfc3339(),
            kind,
            status,
            counts,
            duration_ms,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        };
        if let Err(err) = self
            .db()
            .append_sync_attempt(&record, self.config.history_limit)
        {
            warn!("failed to record sync attempt: {err:#}");
        }

        match status {
            SyncStatus::Success => info!(
                kind = kind.as_str(),
                uploaded, downloaded, duration_ms, "sync finished"
            ),
            SyncStatus::Partial | SyncStatus::Failed => warn!(
                kind = kind.as_str(),
                status = status.as_str(),
                uploaded,
                downloaded,
                errors = errors.len(),
                "sync finished with errors"
            ),
        }

        let status = match status {
            SyncStatus::Success => OutcomeStatus::Success,
            SyncStatus::Partial => OutcomeStatus::Partial,
            SyncStatus::Failed => OutcomeStatus::Failed,
        };
        SyncOutcome {
            status,
            uploaded,
            downloaded,
            errors,
            duration_ms,
        }
    }

    fn finish_failed(
        &self,
        kind: SyncKind,
        started: std::time::Instant,
        error: String,
    ) -> SyncOutcome {
        let counts: BTreeMap<String, CollectionCounts> = COLLECTIONS
            .iter()
            .map(|c| ((*c).to_string(), CollectionCounts::default()))
            .collect();
        self.finish(kind, started, counts, vec![error])
    }
}

fn unsynced<E: SyncEntity>(records: &[E], unsynced_ids: &HashSet<String>) -> Vec<E> {
    records
        .iter()
        .filter(|r| unsynced_ids.contains(r.merge_id()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDiaryEntry, NewRecipe};
    use crate::remote::{ItemError, UpsertOutcome};
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockInner {
        rows: Mutex<HashMap<String, BTreeMap<String, Value>>>,
        fail_name: Mutex<Option<String>>,
        fail_fetch: Mutex<HashSet<String>>,
        cancel: AtomicBool,
        delay: Mutex<Option<Duration>>,
        upsert_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    #[derive(Clone, Default)]
    struct MockRemote {
        inner: Arc<MockInner>,
    }

    impl MockRemote {
        fn seed(&self, collection: &str, conflict_key: &str, rows: Vec<Value>) {
            let mut store = self.inner.rows.lock().unwrap();
            let bucket = store.entry(collection.to_string()).or_default();
            for row in rows {
                let key = row[conflict_key].as_str().unwrap_or_default().to_string();
                bucket.insert(key, row);
            }
        }

        fn row_count(&self, collection: &str) -> usize {
            self.inner
                .rows
                .lock()
                .unwrap()
                .get(collection)
                .map_or(0, BTreeMap::len)
        }

        fn delay(&self) -> Option<Duration> {
            *self.inner.delay.lock().unwrap()
        }
    }

    impl RemoteStore for MockRemote {
        fn upsert(
            &self,
            collection: &str,
            conflict_key: &str,
            _owner_id: &str,
            rows: Vec<Value>,
        ) -> impl Future<Output = Result<UpsertOutcome, RemoteError>> + Send {
            let collection = collection.to_string();
            let conflict_key = conflict_key.to_string();
            async move {
                self.inner.upsert_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay() {
                    tokio::time::sleep(delay).await;
                }
                if self.inner.cancel.load(Ordering::SeqCst) {
                    return Err(RemoteError::Cancelled);
                }
                let fail_name = self.inner.fail_name.lock().unwrap().clone();
                let mut outcome = UpsertOutcome::default();
                let mut store = self.inner.rows.lock().unwrap();
                let bucket = store.entry(collection).or_default();
                for row in rows {
                    let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
                    if fail_name.as_deref() == Some(name) {
                        outcome.failed.push(ItemError {
                            id: row.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                            label: name.to_string(),
                            message: "row rejected".to_string(),
                        });
                        continue;
                    }
                    let key = row[conflict_key.as_str()]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    bucket.insert(key, row);
                    outcome.succeeded += 1;
                }
                Ok(outcome)
            }
        }

        fn fetch_all(
            &self,
            collection: &str,
            owner_id: &str,
        ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send {
            let collection = collection.to_string();
            let owner_id = owner_id.to_string();
            async move {
                self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay() {
                    tokio::time::sleep(delay).await;
                }
                if self.inner.cancel.load(Ordering::SeqCst) {
                    return Err(RemoteError::Cancelled);
                }
                if self.inner.fail_fetch.lock().unwrap().contains(&collection) {
                    return Err(RemoteError::Transport("connection refused".to_string()));
                }
                let store = self.inner.rows.lock().unwrap();
                Ok(store
                    .get(&collection)
                    .map(|bucket| {
                        bucket
                            .values()
                            .filter(|row| {
                                row.get("owner_id").and_then(Value::as_str)
                                    == Some(owner_id.as_str())
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }

    struct MockAuth {
        owner: Option<String>,
    }

    impl AuthProvider for MockAuth {
        fn current_owner(&self) -> Result<Option<String>, RemoteError> {
            Ok(self.owner.clone())
        }
    }

    const OWNER: &str = "owner-1";

    fn engine(
        remote: MockRemote,
        owner: Option<&str>,
    ) -> (Arc<SyncEngine<MockRemote, MockAuth>>, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let auth = MockAuth {
            owner: owner.map(String::from),
        };
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&db),
            remote,
            auth,
            SyncConfig::default(),
        ));
        (engine, db)
    }

    fn add_entry(db: &Arc<Mutex<Database>>, name: &str) -> DiaryEntry {
        db.lock()
            .unwrap()
            .insert_diary_entry(&NewDiaryEntry {
                date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
                meal_type: "lunch".to_string(),
                name: name.to_string(),
                calories: 300.0,
                protein_g: None,
                carbs_g: None,
                fat_g: None,
                serving_size: None,
            })
            .unwrap()
    }

    fn remote_recipe_row(id: &str, name: &str) -> Value {
        serde_json::json!({
            "id": id,
            "owner_id": OWNER,
            "name": name,
            "servings": 4.0,
            "ingredients": ["200g rice"],
            "instructions": ["Cook"],
            "created_at": "2024-06-01T10:00:00Z",
        })
    }

    #[tokio::test]
    async fn test_empty_state_success() {
        let remote = MockRemote::default();
        let (engine, db) = engine(remote, Some(OWNER));

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.uploaded, 0);
        assert_eq!(outcome.downloaded, 0);
        assert!(outcome.errors.is_empty());

        let last = db.lock().unwrap().last_attempt().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Success);
        assert_eq!(last.kind, SyncKind::Full);
    }

    #[tokio::test]
    async fn test_first_upload_then_idempotent() {
        let remote = MockRemote::default();
        let (engine, db) = engine(remote.clone(), Some(OWNER));
        add_entry(&db, "Oatmeal");
        add_entry(&db, "Salad");
        add_entry(&db, "Soup");

        let first = engine.run_full_sync().await;
        assert_eq!(first.status, OutcomeStatus::Success);
        assert_eq!(first.uploaded, 3);
        assert_eq!(first.downloaded, 3);
        assert_eq!(remote.row_count("diary_entries"), 3);
        assert_eq!(db.lock().unwrap().list_diary_entries().unwrap().len(), 3);

        // Nothing changed: nothing left to upload, downloads report the full
        // remote row count, local size is unchanged.
        let second = engine.run_full_sync().await;
        assert_eq!(second.status, OutcomeStatus::Success);
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.downloaded, 3);
        assert_eq!(db.lock().unwrap().list_diary_entries().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_pull_new_remote_recipe() {
        let remote = MockRemote::default();
        remote.seed("recipes", "id", vec![remote_recipe_row("R1", "Fried rice")]);
        let (engine, db) = engine(remote, Some(OWNER));

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.downloaded, 1);
        let recipes = db.lock().unwrap().list_recipes().unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].id, "R1");

        // Pulling again must not duplicate it.
        engine.run_full_sync().await;
        assert_eq!(db.lock().unwrap().list_recipes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_precedence_discards_remote_edit() {
        let remote = MockRemote::default();
        let (engine, db) = engine(remote.clone(), Some(OWNER));
        let local = db
            .lock()
            .unwrap()
            .insert_recipe(&NewRecipe {
                name: "Granola".to_string(),
                servings: 8.0,
                ingredients: vec![],
                instructions: vec![],
                image_url: None,
            })
            .unwrap();
        // Already synced, so the upload stage leaves the remote copy alone.
        db.lock()
            .unwrap()
            .commit_merge(
                &[],
                &[],
                &[],
                None,
                &SyncedMarks {
                    recipes: vec![local.id.clone()],
                    ..SyncedMarks::default()
                },
            )
            .unwrap();
        remote.seed(
            "recipes",
            "id",
            vec![remote_recipe_row(&local.id, "Granola (remote edit)")],
        );

        engine.run_full_sync().await;
        let recipes = db.lock().unwrap().list_recipes().unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].name, "Granola");
    }

    #[tokio::test]
    async fn test_unauthenticated_no_remote_calls() {
        let remote = MockRemote::default();
        let (engine, db) = engine(remote.clone(), None);
        add_entry(&db, "Oatmeal");

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.errors, vec!["Auth session missing".to_string()]);
        assert_eq!(remote.inner.upsert_calls.load(Ordering::SeqCst), 0);
        assert_eq!(remote.inner.fetch_calls.load(Ordering::SeqCst), 0);

        let last = db.lock().unwrap().last_attempt().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
        assert_eq!(last.error.as_deref(), Some("Auth session missing"));
    }

    #[tokio::test]
    async fn test_partial_isolation_single_bad_row() {
        let remote = MockRemote::default();
        *remote.inner.fail_name.lock().unwrap() = Some("Salad".to_string());
        let (engine, db) = engine(remote.clone(), Some(OWNER));
        add_entry(&db, "Oatmeal");
        let bad = add_entry(&db, "Salad");
        add_entry(&db, "Soup");

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.uploaded, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Salad"));
        assert_eq!(remote.row_count("diary_entries"), 2);

        // The failed row stays unsynced and is retried next run.
        let snapshot = db.lock().unwrap().sync_snapshot().unwrap();
        assert_eq!(snapshot.unsynced.len(), 1);
        assert!(snapshot.unsynced.contains(&bad.id));
    }

    #[tokio::test]
    async fn test_transport_failure_isolated_per_type() {
        let remote = MockRemote::default();
        remote
            .inner
            .fail_fetch
            .lock()
            .unwrap()
            .insert("recipes".to_string());
        remote.seed("recipes", "id", vec![remote_recipe_row("R1", "Unreachable")]);
        let (engine, db) = engine(remote, Some(OWNER));
        add_entry(&db, "Oatmeal");

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.uploaded, 1);
        // Diary download still ran; recipe fetch contributed zero.
        assert_eq!(outcome.downloaded, 1);
        assert!(outcome.errors.iter().any(|e| e.contains("recipes")));

        let last = db.lock().unwrap().last_attempt().unwrap().unwrap();
        assert_eq!(last.counts["recipes"].downloaded, 0);
        assert_eq!(last.counts["diary_entries"].downloaded, 1);
    }

    #[tokio::test]
    async fn test_profile_bootstrap_then_local_authority() {
        let remote = MockRemote::default();
        remote.seed(
            "profile_settings",
            "owner_id",
            vec![serde_json::json!({
                "owner_id": OWNER,
                "calorie_target": 1800,
                "updated_at": "2024-06-01T10:00:00Z",
            })],
        );
        let (engine, db) = engine(remote.clone(), Some(OWNER));

        // First sync bootstraps the profile from the remote.
        engine.run_full_sync().await;
        let profile = db.lock().unwrap().get_profile().unwrap().unwrap();
        assert_eq!(profile.calorie_target, 1800);

        // A changed remote profile never overwrites existing local settings.
        remote.seed(
            "profile_settings",
            "owner_id",
            vec![serde_json::json!({
                "owner_id": OWNER,
                "calorie_target": 2500,
                "updated_at": "2024-06-02T10:00:00Z",
            })],
        );
        engine.run_full_sync().await;
        let profile = db.lock().unwrap().get_profile().unwrap().unwrap();
        assert_eq!(profile.calorie_target, 1800);
    }

    #[tokio::test]
    async fn test_upload_only_and_download_only() {
        let remote = MockRemote::default();
        remote.seed("recipes", "id", vec![remote_recipe_row("R1", "Fried rice")]);
        let (engine, db) = engine(remote.clone(), Some(OWNER));
        add_entry(&db, "Oatmeal");

        let up = engine.run_upload_only().await;
        assert_eq!(up.status, OutcomeStatus::Success);
        assert_eq!(up.uploaded, 1);
        assert_eq!(up.downloaded, 0);
        assert_eq!(db.lock().unwrap().list_recipes().unwrap().len(), 0);
        assert_eq!(
            db.lock().unwrap().last_attempt().unwrap().unwrap().kind,
            SyncKind::Upload
        );

        let down = engine.run_download_only().await;
        assert_eq!(down.status, OutcomeStatus::Success);
        assert_eq!(down.uploaded, 0);
        assert_eq!(down.downloaded, 2);
        assert_eq!(db.lock().unwrap().list_recipes().unwrap().len(), 1);
        assert_eq!(
            db.lock().unwrap().last_attempt().unwrap().unwrap().kind,
            SyncKind::Download
        );
    }

    #[tokio::test]
    async fn test_cancelled_leaves_no_trace() {
        let remote = MockRemote::default();
        remote.inner.cancel.store(true, Ordering::SeqCst);
        let (engine, db) = engine(remote, Some(OWNER));
        let entry = add_entry(&db, "Oatmeal");

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.errors.is_empty());

        // No history record, nothing marked synced, guard released.
        let db_guard = db.lock().unwrap();
        assert!(db_guard.last_attempt().unwrap().is_none());
        assert!(db_guard.sync_snapshot().unwrap().unsynced.contains(&entry.id));
        drop(db_guard);
        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_skips_concurrent_run() {
        let remote = MockRemote::default();
        *remote.inner.delay.lock().unwrap() = Some(Duration::from_millis(50));
        let (engine, db) = engine(remote.clone(), Some(OWNER));

        let (first, second) = tokio::join!(engine.run_full_sync(), engine.run_full_sync());
        let statuses = [first.status, second.status];
        assert!(statuses.contains(&OutcomeStatus::Success));
        assert!(statuses.contains(&OutcomeStatus::Skipped));

        // Exactly one pipeline executed: one fetch per collection, one
        // history record.
        assert_eq!(remote.inner.fetch_calls.load(Ordering::SeqCst), 4);
        assert_eq!(db.lock().unwrap().list_sync_attempts(10).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst() {
        let remote = MockRemote::default();
        let (engine, db) = engine(remote.clone(), Some(OWNER));

        let (a, b, c) = tokio::join!(
            Arc::clone(&engine).sync_debounced(),
            Arc::clone(&engine).sync_debounced(),
            Arc::clone(&engine).sync_debounced()
        );
        assert_eq!(a.status, OutcomeStatus::Success);
        assert_eq!(b.status, OutcomeStatus::Success);
        assert_eq!(c.status, OutcomeStatus::Success);

        assert_eq!(remote.inner.fetch_calls.load(Ordering::SeqCst), 4);
        assert_eq!(db.lock().unwrap().list_sync_attempts(10).unwrap().len(), 1);

        // A later request is a fresh burst, not part of the old one.
        let again = Arc::clone(&engine).sync_debounced().await;
        assert_eq!(again.status, OutcomeStatus::Success);
        assert_eq!(remote.inner.fetch_calls.load(Ordering::SeqCst), 8);
        assert_eq!(db.lock().unwrap().list_sync_attempts(10).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_an_error_not_a_hang() {
        let remote = MockRemote::default();
        *remote.inner.delay.lock().unwrap() = Some(Duration::from_secs(60));
        let (engine, db) = engine(remote, Some(OWNER));
        add_entry(&db, "Oatmeal");

        let outcome = engine.run_full_sync().await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.errors.iter().any(|e| e.contains("timed out")));

        let last = db.lock().unwrap().last_attempt().unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
    }

    fn diary_fixture(id: &str) -> DiaryEntry {
        DiaryEntry {
            id: id.to_string(),
            date: "2024-06-15".to_string(),
            meal_type: "lunch".to_string(),
            name: "Soup".to_string(),
            calories: 250.0,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            serving_size: None,
            logged_at: "2024-06-15T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_merge_new_union_and_no_duplicates() {
        let local = vec![diary_fixture("A"), diary_fixture("B")];
        let downloaded = vec![diary_fixture("B"), diary_fixture("C"), diary_fixture("C")];
        let merged = merge_new(&local, downloaded);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "C");
    }
}
