//! Conversion between local records and remote collection rows.
//!
//! All field renames and type coercions live here; nothing outside this
//! module inspects a raw remote row. The conversions are total functions so
//! they can be unit-tested against fixed fixtures.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::models::{
    DiaryEntry, ProfileSettings, Recipe, WeightEntry, validate_diary_entry, validate_profile,
    validate_recipe, validate_weight_entry,
};

/// Ties a local entity type to its remote collection: row shape, collection
/// name, conflict key, merge identifier, and a human-readable label used in
/// upload error messages.
pub trait SyncEntity: Clone + Send + Sync + 'static {
    type Row: Serialize + DeserializeOwned + Send;

    const COLLECTION: &'static str;
    const CONFLICT_KEY: &'static str;

    fn to_row(&self, owner_id: &str) -> Self::Row;
    fn from_row(row: Self::Row) -> Result<Self>;
    fn merge_id(&self) -> &str;
    fn label(&self) -> String;
}

pub fn encode_row<E: SyncEntity>(record: &E, owner_id: &str) -> Result<Value> {
    serde_json::to_value(record.to_row(owner_id))
        .with_context(|| format!("Failed to encode {} row", E::COLLECTION))
}

pub fn decode_row<E: SyncEntity>(value: Value) -> Result<E> {
    let row: E::Row = serde_json::from_value(value)
        .with_context(|| format!("Malformed {} row", E::COLLECTION))?;
    E::from_row(row)
}

// --- Diary entries ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntryRow {
    pub id: String,
    pub owner_id: String,
    pub entry_date: String,
    pub meal_type: String,
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub carbs_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
    #[serde(default)]
    pub serving_size: Option<String>,
    pub logged_at: String,
}

impl SyncEntity for DiaryEntry {
    type Row = DiaryEntryRow;

    const COLLECTION: &'static str = "diary_entries";
    const CONFLICT_KEY: &'static str = "id";

    fn to_row(&self, owner_id: &str) -> DiaryEntryRow {
        DiaryEntryRow {
            id: self.id.clone(),
            owner_id: owner_id.to_string(),
            entry_date: self.date.clone(),
            meal_type: self.meal_type.clone(),
            name: self.name.clone(),
            calories: self.calories,
            protein_g: self.protein_g,
            carbs_g: self.carbs_g,
            fat_g: self.fat_g,
            serving_size: self.serving_size.clone(),
            logged_at: self.logged_at.clone(),
        }
    }

    fn from_row(row: DiaryEntryRow) -> Result<Self> {
        let entry = DiaryEntry {
            id: row.id,
            date: row.entry_date,
            meal_type: row.meal_type,
            name: row.name,
            calories: row.calories,
            protein_g: row.protein_g,
            carbs_g: row.carbs_g,
            fat_g: row.fat_g,
            serving_size: row.serving_size,
            logged_at: row.logged_at,
        };
        validate_diary_entry(&entry)?;
        Ok(entry)
    }

    fn merge_id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        format!("{} ({})", self.name, self.date)
    }
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub servings: f64,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: String,
}

impl SyncEntity for Recipe {
    type Row = RecipeRow;

    const COLLECTION: &'static str = "recipes";
    const CONFLICT_KEY: &'static str = "id";

    fn to_row(&self, owner_id: &str) -> RecipeRow {
        RecipeRow {
            id: self.id.clone(),
            owner_id: owner_id.to_string(),
            name: self.name.clone(),
            servings: self.servings,
            ingredients: self.ingredients.clone(),
            instructions: self.instructions.clone(),
            image_url: self.image_url.clone(),
            created_at: self.created_at.clone(),
        }
    }

    fn from_row(row: RecipeRow) -> Result<Self> {
        let recipe = Recipe {
            id: row.id,
            name: row.name,
            servings: row.servings,
            ingredients: row.ingredients,
            instructions: row.instructions,
            image_url: row.image_url,
            created_at: row.created_at,
        };
        validate_recipe(&recipe)?;
        Ok(recipe)
    }

    fn merge_id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}

// --- Weight entries ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntryRow {
    pub id: String,
    pub owner_id: String,
    pub entry_date: String,
    pub weight_kg: f64,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: String,
}

impl SyncEntity for WeightEntry {
    type Row = WeightEntryRow;

    const COLLECTION: &'static str = "weight_entries";
    const CONFLICT_KEY: &'static str = "id";

    fn to_row(&self, owner_id: &str) -> WeightEntryRow {
        WeightEntryRow {
            id: self.id.clone(),
            owner_id: owner_id.to_string(),
            entry_date: self.date.format("%Y-%m-%d").to_string(),
            weight_kg: self.weight_kg,
            notes: self.notes.clone(),
            created_at: self.created_at.clone(),
        }
    }

    fn from_row(row: WeightEntryRow) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&row.entry_date, "%Y-%m-%d").map_err(|_| {
            anyhow::anyhow!(
                "Invalid weight entry date '{}'. Must be YYYY-MM-DD",
                row.entry_date
            )
        })?;
        let entry = WeightEntry {
            id: row.id,
            date,
            weight_kg: row.weight_kg,
            notes: row.notes,
            created_at: row.created_at,
        };
        validate_weight_entry(&entry)?;
        Ok(entry)
    }

    fn merge_id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> String {
        format!("weight on {}", self.date.format("%Y-%m-%d"))
    }
}

// --- Profile settings (singleton, conflict key is the owner) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub owner_id: String,
    pub calorie_target: i64,
    #[serde(default)]
    pub protein_target_g: Option<i64>,
    #[serde(default)]
    pub carbs_target_g: Option<i64>,
    #[serde(default)]
    pub fat_target_g: Option<i64>,
    #[serde(default)]
    pub water_target_ml: Option<i64>,
    #[serde(default)]
    pub exercise_target_min: Option<i64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub activity_level: Option<String>,
    pub updated_at: String,
}

impl SyncEntity for ProfileSettings {
    type Row = ProfileRow;

    const COLLECTION: &'static str = "profile_settings";
    const CONFLICT_KEY: &'static str = "owner_id";

    fn to_row(&self, owner_id: &str) -> ProfileRow {
        ProfileRow {
            owner_id: owner_id.to_string(),
            calorie_target: self.calorie_target,
            protein_target_g: self.protein_target_g,
            carbs_target_g: self.carbs_target_g,
            fat_target_g: self.fat_target_g,
            water_target_ml: self.water_target_ml,
            exercise_target_min: self.exercise_target_min,
            height_cm: self.height_cm,
            weight_kg: self.weight_kg,
            age: self.age,
            activity_level: self.activity_level.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    fn from_row(row: ProfileRow) -> Result<Self> {
        let profile = ProfileSettings {
            calorie_target: row.calorie_target,
            protein_target_g: row.protein_target_g,
            carbs_target_g: row.carbs_target_g,
            fat_target_g: row.fat_target_g,
            water_target_ml: row.water_target_ml,
            exercise_target_min: row.exercise_target_min,
            height_cm: row.height_cm,
            weight_kg: row.weight_kg,
            age: row.age,
            activity_level: row.activity_level,
            updated_at: row.updated_at,
        };
        validate_profile(&profile)?;
        Ok(profile)
    }

    // The singleton has no client-generated id; it merges by owner and only
    // on first-sync bootstrap, so this is never used as a set key.
    fn merge_id(&self) -> &str {
        "profile"
    }

    fn label(&self) -> String {
        "profile settings".to_string()
    }
}
