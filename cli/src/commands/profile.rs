use anyhow::{Result, bail};
use chrono::Utc;

use nibble_core::db::Database;
use nibble_core::models::ProfileSettings;

use super::helpers::opt_num;

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_profile_set(
    db: &Database,
    calories: Option<i64>,
    protein: Option<i64>,
    carbs: Option<i64>,
    fat: Option<i64>,
    water: Option<i64>,
    exercise: Option<i64>,
    height: Option<f64>,
    weight: Option<f64>,
    age: Option<i64>,
    activity: Option<String>,
    json: bool,
) -> Result<()> {
    let existing = db.get_profile()?;
    let Some(calorie_target) = calories.or(existing.as_ref().map(|p| p.calorie_target)) else {
        bail!("No profile yet. Set a calorie target first: nibble profile set --calories <kcal>");
    };

    // Unset flags keep their current values.
    let base = existing.unwrap_or(ProfileSettings {
        calorie_target,
        protein_target_g: None,
        carbs_target_g: None,
        fat_target_g: None,
        water_target_ml: None,
        exercise_target_min: None,
        height_cm: None,
        weight_kg: None,
        age: None,
        activity_level: None,
        updated_at: String::new(),
    });
    let profile = ProfileSettings {
        calorie_target,
        protein_target_g: protein.or(base.protein_target_g),
        carbs_target_g: carbs.or(base.carbs_target_g),
        fat_target_g: fat.or(base.fat_target_g),
        water_target_ml: water.or(base.water_target_ml),
        exercise_target_min: exercise.or(base.exercise_target_min),
        height_cm: height.or(base.height_cm),
        weight_kg: weight.or(base.weight_kg),
        age: age.or(base.age),
        activity_level: activity.or(base.activity_level),
        updated_at: Utc::now().to_rfc3339(),
    };
    db.set_profile(&profile)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Profile updated ({calorie_target} kcal/day target)");
    }

    Ok(())
}

pub(crate) fn cmd_profile_show(db: &Database, json: bool) -> Result<()> {
    let Some(profile) = db.get_profile()? else {
        if json {
            println!("{}", serde_json::json!({ "error": "No profile set" }));
        } else {
            eprintln!("No profile set. Use `nibble profile set --calories <kcal>` to create one.");
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("Daily targets:");
    println!("  Calories: {} kcal", profile.calorie_target);
    let grams = |v: Option<i64>| v.map_or("-".to_string(), |g| format!("{g} g"));
    println!("  Protein:  {}", grams(profile.protein_target_g));
    println!("  Carbs:    {}", grams(profile.carbs_target_g));
    println!("  Fat:      {}", grams(profile.fat_target_g));
    if let Some(ml) = profile.water_target_ml {
        println!("  Water:    {ml} ml");
    }
    if let Some(min) = profile.exercise_target_min {
        println!("  Exercise: {min} min");
    }
    println!("Stats:");
    println!("  Height: {} cm", opt_num(profile.height_cm));
    println!("  Weight: {} kg", opt_num(profile.weight_kg));
    if let Some(age) = profile.age {
        println!("  Age: {age}");
    }
    if let Some(ref level) = profile.activity_level {
        println!("  Activity: {level}");
    }
    println!("Updated: {}", profile.updated_at);

    Ok(())
}
