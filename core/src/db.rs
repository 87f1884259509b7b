use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    CollectionCounts, DiaryEntry, NewDiaryEntry, NewRecipe, NewWeightEntry, ProfileSettings,
    Recipe, SyncAttemptRecord, SyncKind, SyncStatus, WeightEntry, validate_meal_type,
};

/// Device-resident store. The UI (and CLI) read only from here; the remote
/// store is reached exclusively through the sync engine.
///
/// Rows carry a `synced_at` marker: NULL for records created or edited
/// locally since the last successful upload, set by the sync commit step.
pub struct Database {
    conn: Connection,
}

/// Point-in-time read of every collection, taken before a sync attempt.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    pub diary: Vec<DiaryEntry>,
    pub recipes: Vec<Recipe>,
    pub weights: Vec<WeightEntry>,
    /// Zero or one element; kept as a list so the generic upload stage can
    /// treat the singleton like any other collection.
    pub profile: Vec<ProfileSettings>,
    /// Ids (across all list collections) that still need uploading.
    pub unsynced: HashSet<String>,
    pub profile_unsynced: bool,
}

/// Records confirmed upserted by the remote in this attempt, to be marked
/// `synced_at` during the commit step.
#[derive(Debug, Clone, Default)]
pub struct SyncedMarks {
    pub diary: Vec<String>,
    pub recipes: Vec<String>,
    pub weights: Vec<String>,
    pub profile: bool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS diary_entries (
                    id TEXT PRIMARY KEY,
                    date TEXT NOT NULL,
                    meal_type TEXT NOT NULL,
                    name TEXT NOT NULL,
                    calories REAL NOT NULL,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    serving_size TEXT,
                    logged_at TEXT NOT NULL,
                    synced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    servings REAL NOT NULL DEFAULT 1.0,
                    ingredients TEXT NOT NULL DEFAULT '[]',
                    instructions TEXT NOT NULL DEFAULT '[]',
                    image_url TEXT,
                    created_at TEXT NOT NULL,
                    synced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS weight_entries (
                    id TEXT PRIMARY KEY,
                    date TEXT NOT NULL UNIQUE,
                    weight_kg REAL NOT NULL,
                    notes TEXT,
                    created_at TEXT NOT NULL,
                    synced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS profile (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    calorie_target INTEGER NOT NULL,
                    protein_target_g INTEGER,
                    carbs_target_g INTEGER,
                    fat_target_g INTEGER,
                    water_target_ml INTEGER,
                    exercise_target_min INTEGER,
                    height_cm REAL,
                    weight_kg REAL,
                    age INTEGER,
                    activity_level TEXT,
                    updated_at TEXT NOT NULL,
                    synced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS sync_history (
                    id TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    status TEXT NOT NULL,
                    counts TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    error TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_diary_entries_date ON diary_entries(date);
                CREATE INDEX IF NOT EXISTS idx_weight_entries_date ON weight_entries(date);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mappers ---

    fn diary_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<DiaryEntry> {
        Ok(DiaryEntry {
            id: row.get(0)?,
            date: row.get(1)?,
            meal_type: row.get(2)?,
            name: row.get(3)?,
            calories: row.get(4)?,
            protein_g: row.get(5)?,
            carbs_g: row.get(6)?,
            fat_g: row.get(7)?,
            serving_size: row.get(8)?,
            logged_at: row.get(9)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        let ingredients: String = row.get(3)?;
        let instructions: String = row.get(4)?;
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            servings: row.get(2)?,
            ingredients: serde_json::from_str(&ingredients).unwrap_or_default(),
            instructions: serde_json::from_str(&instructions).unwrap_or_default(),
            image_url: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn weight_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<WeightEntry> {
        let date: String = row.get(1)?;
        Ok(WeightEntry {
            id: row.get(0)?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
            })?,
            weight_kg: row.get(2)?,
            notes: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProfileSettings> {
        Ok(ProfileSettings {
            calorie_target: row.get(0)?,
            protein_target_g: row.get(1)?,
            carbs_target_g: row.get(2)?,
            fat_target_g: row.get(3)?,
            water_target_ml: row.get(4)?,
            exercise_target_min: row.get(5)?,
            height_cm: row.get(6)?,
            weight_kg: row.get(7)?,
            age: row.get(8)?,
            activity_level: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    // --- Diary entries ---

    pub fn insert_diary_entry(&self, entry: &NewDiaryEntry) -> Result<DiaryEntry> {
        let meal_type = validate_meal_type(&entry.meal_type)?;
        let id = Uuid::new_v4().to_string();
        let date = entry.date.format("%Y-%m-%d").to_string();
        let logged_at = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO diary_entries (id, date, meal_type, name, calories, protein_g,
             carbs_g, fat_g, serving_size, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                date,
                meal_type,
                entry.name,
                entry.calories,
                entry.protein_g,
                entry.carbs_g,
                entry.fat_g,
                entry.serving_size,
                logged_at,
            ],
        )?;
        self.get_diary_entry(&id)?
            .context("Diary entry vanished after insert")
    }

    pub fn get_diary_entry(&self, id: &str) -> Result<Option<DiaryEntry>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, date, meal_type, name, calories, protein_g, carbs_g, fat_g,
                 serving_size, logged_at FROM diary_entries WHERE id = ?1",
                params![id],
                Self::diary_entry_from_row,
            )
            .optional()?)
    }

    pub fn list_diary_entries(&self) -> Result<Vec<DiaryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, meal_type, name, calories, protein_g, carbs_g, fat_g,
             serving_size, logged_at FROM diary_entries ORDER BY date, logged_at",
        )?;
        let entries = stmt
            .query_map([], Self::diary_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn entries_for_date(&self, date: NaiveDate) -> Result<Vec<DiaryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, meal_type, name, calories, protein_g, carbs_g, fat_g,
             serving_size, logged_at FROM diary_entries WHERE date = ?1 ORDER BY logged_at",
        )?;
        let entries = stmt
            .query_map(
                params![date.format("%Y-%m-%d").to_string()],
                Self::diary_entry_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_diary_entry(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM diary_entries WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        if recipe.name.trim().is_empty() {
            anyhow::bail!("Recipe name must not be empty");
        }
        if recipe.servings <= 0.0 {
            anyhow::bail!("Recipe servings must be greater than 0");
        }
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO recipes (id, name, servings, ingredients, instructions, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                recipe.name,
                recipe.servings,
                serde_json::to_string(&recipe.ingredients)?,
                serde_json::to_string(&recipe.instructions)?,
                recipe.image_url,
                created_at,
            ],
        )?;
        self.get_recipe(&id)?.context("Recipe vanished after insert")
    }

    pub fn get_recipe(&self, id: &str) -> Result<Option<Recipe>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, servings, ingredients, instructions, image_url, created_at
                 FROM recipes WHERE id = ?1",
                params![id],
                Self::recipe_from_row,
            )
            .optional()?)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, servings, ingredients, instructions, image_url, created_at
             FROM recipes ORDER BY name",
        )?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn delete_recipe(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // --- Weight ---

    /// One entry per day: logging the same date again overwrites the value
    /// but keeps the original id, so the remote upsert stays idempotent.
    pub fn upsert_weight(&self, entry: &NewWeightEntry) -> Result<WeightEntry> {
        if entry.weight_kg <= 0.0 {
            anyhow::bail!("Weight must be greater than 0");
        }
        let date = entry.date.format("%Y-%m-%d").to_string();
        let created_at = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO weight_entries (id, date, weight_kg, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(date) DO UPDATE SET weight_kg = ?3, notes = ?4, synced_at = NULL",
            params![id, date, entry.weight_kg, entry.notes, created_at],
        )?;
        self.get_weight(entry.date)?
            .context("Weight entry vanished after upsert")
    }

    pub fn get_weight(&self, date: NaiveDate) -> Result<Option<WeightEntry>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, date, weight_kg, notes, created_at FROM weight_entries WHERE date = ?1",
                params![date.format("%Y-%m-%d").to_string()],
                Self::weight_entry_from_row,
            )
            .optional()?)
    }

    pub fn list_weight_entries(&self) -> Result<Vec<WeightEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, weight_kg, notes, created_at FROM weight_entries ORDER BY date",
        )?;
        let entries = stmt
            .query_map([], Self::weight_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_weight(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM weight_entries WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // --- Profile settings ---

    pub fn get_profile(&self) -> Result<Option<ProfileSettings>> {
        Ok(self
            .conn
            .query_row(
                "SELECT calorie_target, protein_target_g, carbs_target_g, fat_target_g,
                 water_target_ml, exercise_target_min, height_cm, weight_kg, age,
                 activity_level, updated_at FROM profile WHERE id = 1",
                [],
                Self::profile_from_row,
            )
            .optional()?)
    }

    pub fn set_profile(&self, profile: &ProfileSettings) -> Result<()> {
        crate::models::validate_profile(profile)?;
        self.conn.execute(
            "INSERT INTO profile (id, calorie_target, protein_target_g, carbs_target_g,
             fat_target_g, water_target_ml, exercise_target_min, height_cm, weight_kg,
             age, activity_level, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                calorie_target = ?1, protein_target_g = ?2, carbs_target_g = ?3,
                fat_target_g = ?4, water_target_ml = ?5, exercise_target_min = ?6,
                height_cm = ?7, weight_kg = ?8, age = ?9, activity_level = ?10,
                updated_at = ?11, synced_at = NULL",
            params![
                profile.calorie_target,
                profile.protein_target_g,
                profile.carbs_target_g,
                profile.fat_target_g,
                profile.water_target_ml,
                profile.exercise_target_min,
                profile.height_cm,
                profile.weight_kg,
                profile.age,
                profile.activity_level,
                profile.updated_at,
            ],
        )?;
        Ok(())
    }

    // --- Sync snapshot & merge commit (sync engine only) ---

    fn unsynced_ids(&self, table: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {table} WHERE synced_at IS NULL"))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn sync_snapshot(&self) -> Result<SyncSnapshot> {
        let mut unsynced = HashSet::new();
        for table in ["diary_entries", "recipes", "weight_entries"] {
            unsynced.extend(self.unsynced_ids(table)?);
        }
        let profile_unsynced = self
            .conn
            .query_row(
                "SELECT synced_at IS NULL FROM profile WHERE id = 1",
                [],
                |row| row.get::<_, bool>(0),
            )
            .optional()?
            .unwrap_or(false);
        Ok(SyncSnapshot {
            diary: self.list_diary_entries()?,
            recipes: self.list_recipes()?,
            weights: self.list_weight_entries()?,
            profile: self.get_profile()?.into_iter().collect(),
            unsynced,
            profile_unsynced,
        })
    }

    /// Apply a reconciliation result in one transaction: append records whose
    /// ids were not seen locally, bootstrap the profile if none exists, and
    /// mark this attempt's confirmed uploads as synced. Existing local rows
    /// are never edited or deleted here.
    pub fn commit_merge(
        &self,
        diary: &[DiaryEntry],
        recipes: &[Recipe],
        weights: &[WeightEntry],
        profile: Option<&ProfileSettings>,
        marks: &SyncedMarks,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for entry in diary {
            tx.execute(
                "INSERT OR IGNORE INTO diary_entries (id, date, meal_type, name, calories,
                 protein_g, carbs_g, fat_g, serving_size, logged_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.id,
                    entry.date,
                    entry.meal_type,
                    entry.name,
                    entry.calories,
                    entry.protein_g,
                    entry.carbs_g,
                    entry.fat_g,
                    entry.serving_size,
                    entry.logged_at,
                    now,
                ],
            )?;
        }
        for recipe in recipes {
            tx.execute(
                "INSERT OR IGNORE INTO recipes (id, name, servings, ingredients, instructions,
                 image_url, created_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    recipe.id,
                    recipe.name,
                    recipe.servings,
                    serde_json::to_string(&recipe.ingredients)?,
                    serde_json::to_string(&recipe.instructions)?,
                    recipe.image_url,
                    recipe.created_at,
                    now,
                ],
            )?;
        }
        for entry in weights {
            tx.execute(
                "INSERT OR IGNORE INTO weight_entries (id, date, weight_kg, notes, created_at,
                 synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id,
                    entry.date.format("%Y-%m-%d").to_string(),
                    entry.weight_kg,
                    entry.notes,
                    entry.created_at,
                    now,
                ],
            )?;
        }
        if let Some(p) = profile {
            tx.execute(
                "INSERT OR IGNORE INTO profile (id, calorie_target, protein_target_g,
                 carbs_target_g, fat_target_g, water_target_ml, exercise_target_min,
                 height_cm, weight_kg, age, activity_level, updated_at, synced_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    p.calorie_target,
                    p.protein_target_g,
                    p.carbs_target_g,
                    p.fat_target_g,
                    p.water_target_ml,
                    p.exercise_target_min,
                    p.height_cm,
                    p.weight_kg,
                    p.age,
                    p.activity_level,
                    p.updated_at,
                    now,
                ],
            )?;
        }
        for (table, ids) in [
            ("diary_entries", &marks.diary),
            ("recipes", &marks.recipes),
            ("weight_entries", &marks.weights),
        ] {
            for id in ids {
                tx.execute(
                    &format!("UPDATE {table} SET synced_at = ?1 WHERE id = ?2"),
                    params![now, id],
                )?;
            }
        }
        if marks.profile {
            tx.execute(
                "UPDATE profile SET synced_at = ?1 WHERE id = 1",
                params![now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Sync history ---

    pub fn append_sync_attempt(&self, record: &SyncAttemptRecord, keep_last: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_history (id, timestamp, kind, status, counts, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.timestamp,
                record.kind.as_str(),
                record.status.as_str(),
                serde_json::to_string(&record.counts)?,
                i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
                record.error,
            ],
        )?;
        // Bounded log: drop everything beyond the newest keep_last rows.
        self.conn.execute(
            "DELETE FROM sync_history WHERE rowid NOT IN
             (SELECT rowid FROM sync_history ORDER BY rowid DESC LIMIT ?1)",
            params![i64::try_from(keep_last).unwrap_or(i64::MAX)],
        )?;
        Ok(())
    }

    fn sync_attempt_from_row(row: &rusqlite::Row) -> rusqlite::Result<SyncAttemptRecord> {
        let kind: String = row.get(2)?;
        let status: String = row.get(3)?;
        let counts: String = row.get(4)?;
        let duration_ms: i64 = row.get(5)?;
        let counts: BTreeMap<String, CollectionCounts> =
            serde_json::from_str(&counts).unwrap_or_default();
        Ok(SyncAttemptRecord {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            kind: SyncKind::parse(&kind).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
            })?,
            status: SyncStatus::parse(&status).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
            })?,
            counts,
            duration_ms: u64::try_from(duration_ms).unwrap_or(0),
            error: row.get(6)?,
        })
    }

    pub fn list_sync_attempts(&self, limit: u64) -> Result<Vec<SyncAttemptRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, kind, status, counts, duration_ms, error
             FROM sync_history ORDER BY rowid DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
                Self::sync_attempt_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn last_attempt(&self) -> Result<Option<SyncAttemptRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, timestamp, kind, status, counts, duration_ms, error
                 FROM sync_history ORDER BY rowid DESC LIMIT 1",
                [],
                Self::sync_attempt_from_row,
            )
            .optional()?)
    }

    pub fn last_successful_attempt(&self) -> Result<Option<SyncAttemptRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, timestamp, kind, status, counts, duration_ms, error
                 FROM sync_history WHERE status = 'success' ORDER BY rowid DESC LIMIT 1",
                [],
                Self::sync_attempt_from_row,
            )
            .optional()?)
    }
}
