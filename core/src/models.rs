use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: String,
    pub date: String,
    pub meal_type: String,
    pub name: String,
    pub calories: f64,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    pub logged_at: String,
}

#[derive(Debug, Clone)]
pub struct NewDiaryEntry {
    pub date: NaiveDate,
    pub meal_type: String,
    pub name: String,
    pub calories: f64,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub serving_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub servings: f64,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub name: String,
    pub servings: f64,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: String,
    pub date: NaiveDate,
    pub weight_kg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewWeightEntry {
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub notes: Option<String>,
}

/// Per-owner singleton: goals plus body stats. Upserted as one row keyed on
/// the owner, never by a generated id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub calorie_target: i64,
    pub protein_target_g: Option<i64>,
    pub carbs_target_g: Option<i64>,
    pub fat_target_g: Option<i64>,
    pub water_target_ml: Option<i64>,
    pub exercise_target_min: Option<i64>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub age: Option<i64>,
    pub activity_level: Option<String>,
    pub updated_at: String,
}

// --- Sync attempt history ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Full,
    Upload,
    Download,
}

impl SyncKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => bail!("Unknown sync kind '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => bail!("Unknown sync status '{other}'"),
        }
    }
}

/// Counts for one remote collection within a single attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub uploaded: u64,
    pub downloaded: u64,
}

/// One row of the append-only sync history. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAttemptRecord {
    pub id: String,
    pub timestamp: String,
    pub kind: SyncKind,
    pub status: SyncStatus,
    pub counts: BTreeMap<String, CollectionCounts>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncAttemptRecord {
    #[must_use]
    pub fn total_uploaded(&self) -> u64 {
        self.counts.values().map(|c| c.uploaded).sum()
    }

    #[must_use]
    pub fn total_downloaded(&self) -> u64 {
        self.counts.values().map(|c| c.downloaded).sum()
    }
}

#[must_use]
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

// --- Validation ---

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

/// Validate a diary entry arriving from the remote (or a local insert).
pub fn validate_diary_entry(entry: &DiaryEntry) -> Result<()> {
    if entry.id.trim().is_empty() {
        bail!("Diary entry id must not be empty");
    }
    if entry.name.trim().is_empty() {
        bail!("Diary entry name must not be empty");
    }
    validate_meal_type(&entry.meal_type)?;
    if entry.calories < 0.0 {
        bail!("calories must not be negative");
    }
    for (field, value) in [
        ("protein_g", entry.protein_g),
        ("carbs_g", entry.carbs_g),
        ("fat_g", entry.fat_g),
    ] {
        if value.is_some_and(|v| v < 0.0) {
            bail!("{field} must not be negative");
        }
    }
    NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d").map_err(|_| {
        anyhow::anyhow!("Invalid diary entry date '{}'. Must be YYYY-MM-DD", entry.date)
    })?;
    Ok(())
}

pub fn validate_recipe(recipe: &Recipe) -> Result<()> {
    if recipe.id.trim().is_empty() {
        bail!("Recipe id must not be empty");
    }
    if recipe.name.trim().is_empty() {
        bail!("Recipe name must not be empty");
    }
    if recipe.servings <= 0.0 {
        bail!("Recipe servings must be greater than 0");
    }
    Ok(())
}

pub fn validate_weight_entry(entry: &WeightEntry) -> Result<()> {
    if entry.id.trim().is_empty() {
        bail!("Weight entry id must not be empty");
    }
    if entry.weight_kg <= 0.0 {
        bail!("weight_kg must be greater than 0");
    }
    Ok(())
}

pub fn validate_profile(profile: &ProfileSettings) -> Result<()> {
    if profile.calorie_target <= 0 {
        bail!("calorie_target must be greater than 0");
    }
    for (field, value) in [
        ("protein_target_g", profile.protein_target_g),
        ("carbs_target_g", profile.carbs_target_g),
        ("fat_target_g", profile.fat_target_g),
        ("water_target_ml", profile.water_target_ml),
        ("exercise_target_min", profile.exercise_target_min),
        ("age", profile.age),
    ] {
        if value.is_some_and(|v| v <= 0) {
            bail!("{field} must be greater than 0");
        }
    }
    if profile.height_cm.is_some_and(|v| v <= 0.0) {
        bail!("height_cm must be greater than 0");
    }
    if profile.weight_kg.is_some_and(|v| v <= 0.0) {
        bail!("weight_kg must be greater than 0");
    }
    Ok(())
}
