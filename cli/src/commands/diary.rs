use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nibble_core::db::Database;
use nibble_core::models::{MEAL_TYPES, NewDiaryEntry, validate_meal_type};

use super::helpers::{json_error, opt_num, parse_date, truncate};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_diary_add(
    db: &Database,
    name: &str,
    calories: f64,
    meal: &str,
    date: Option<String>,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
    serving: Option<String>,
    json: bool,
) -> Result<()> {
    let meal_type = validate_meal_type(meal)?;
    let date = parse_date(date)?;
    let entry = db.insert_diary_entry(&NewDiaryEntry {
        date,
        meal_type,
        name: name.to_string(),
        calories,
        protein_g: protein,
        carbs_g: carbs,
        fat_g: fat,
        serving_size: serving,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Logged {} ({:.0} kcal) as {} on {}",
            entry.name, entry.calories, entry.meal_type, entry.date
        );
        println!("  id: {}", entry.id);
    }

    Ok(())
}

pub(crate) fn cmd_diary_show(db: &Database, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let entries = db.entries_for_date(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!(
            "No diary entries for {}. Use `nibble diary add` to log one.",
            date.format("%Y-%m-%d")
        );
        return Ok(());
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Food")]
        name: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
        #[tabled(rename = "ID")]
        id: String,
    }

    // Grouped by meal type for display only; storage stays flat.
    let mut rows = Vec::new();
    for meal in MEAL_TYPES {
        for e in entries.iter().filter(|e| e.meal_type == *meal) {
            rows.push(EntryRow {
                meal: (*meal).to_string(),
                name: truncate(&e.name, 35),
                calories: format!("{:.0}", e.calories),
                protein: opt_num(e.protein_g),
                carbs: opt_num(e.carbs_g),
                fat: opt_num(e.fat_g),
                id: e.id.clone(),
            });
        }
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let total: f64 = entries.iter().map(|e| e.calories).sum();
    match db.get_profile()? {
        Some(profile) => {
            #[allow(clippy::cast_precision_loss)]
            let remaining = profile.calorie_target as f64 - total;
            println!(
                "Total: {total:.0} / {} kcal ({remaining:.0} remaining)",
                profile.calorie_target
            );
        }
        None => println!("Total: {total:.0} kcal"),
    }

    Ok(())
}

pub(crate) fn cmd_diary_delete(db: &Database, id: &str, json: bool) -> Result<()> {
    if db.delete_diary_entry(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted diary entry {id}");
        }
    } else if json {
        println!("{}", json_error(&format!("No diary entry with id {id}")));
    } else {
        eprintln!("No diary entry with id {id}");
    }
    Ok(())
}
