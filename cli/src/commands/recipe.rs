use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nibble_core::db::Database;
use nibble_core::models::{NewRecipe, Recipe};

use super::helpers::{json_error, truncate};

pub(crate) fn cmd_recipe_create(
    db: &Database,
    name: &str,
    servings: f64,
    ingredients: Vec<String>,
    instructions: Vec<String>,
    image_url: Option<String>,
    json: bool,
) -> Result<()> {
    let recipe = db.insert_recipe(&NewRecipe {
        name: name.to_string(),
        servings,
        ingredients,
        instructions,
        image_url,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!(
            "Created recipe '{}' ({} servings, {} ingredients)",
            recipe.name,
            recipe.servings,
            recipe.ingredients.len()
        );
        println!("  id: {}", recipe.id);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_list(db: &Database, json: bool) -> Result<()> {
    let recipes = db.list_recipes()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else if recipes.is_empty() {
        eprintln!("No recipes found. Use `nibble recipe create` to add one.");
    } else {
        #[derive(Tabled)]
        struct RecipeRow {
            #[tabled(rename = "Name")]
            name: String,
            #[tabled(rename = "Servings")]
            servings: String,
            #[tabled(rename = "Ingredients")]
            ingredients: usize,
            #[tabled(rename = "ID")]
            id: String,
        }

        let rows: Vec<RecipeRow> = recipes
            .iter()
            .map(|r| RecipeRow {
                name: truncate(&r.name, 35),
                servings: format!("{:.0}", r.servings),
                ingredients: r.ingredients.len(),
                id: r.id.clone(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}

/// Accepts either a recipe id or an exact (case-insensitive) name.
fn resolve_recipe(db: &Database, reference: &str) -> Result<Recipe> {
    if let Some(recipe) = db.get_recipe(reference)? {
        return Ok(recipe);
    }
    let matches: Vec<Recipe> = db
        .list_recipes()?
        .into_iter()
        .filter(|r| r.name.eq_ignore_ascii_case(reference))
        .collect();
    match matches.len() {
        0 => bail!("No recipe found for '{reference}'"),
        1 => Ok(matches.into_iter().next().unwrap()),
        n => bail!("{n} recipes named '{reference}'. Use the id instead"),
    }
}

pub(crate) fn cmd_recipe_show(db: &Database, reference: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(db, reference)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    println!("{} ({} servings)", recipe.name, recipe.servings);
    println!("  id: {}", recipe.id);
    if let Some(ref url) = recipe.image_url {
        println!("  image: {url}");
    }
    if !recipe.ingredients.is_empty() {
        println!("\nIngredients:");
        for ingredient in &recipe.ingredients {
            println!("  - {ingredient}");
        }
    }
    if !recipe.instructions.is_empty() {
        println!("\nInstructions:");
        for (i, step) in recipe.instructions.iter().enumerate() {
            println!("  {}. {step}", i + 1);
        }
    }

    Ok(())
}

pub(crate) fn cmd_recipe_delete(db: &Database, id: &str, json: bool) -> Result<()> {
    if db.delete_recipe(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted recipe {id}");
        }
    } else if json {
        println!("{}", json_error(&format!("No recipe with id {id}")));
    } else {
        eprintln!("No recipe with id {id}");
    }
    Ok(())
}
