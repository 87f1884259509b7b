mod commands;
mod config;
mod remote_http;

use std::process;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_account_login, cmd_account_logout, cmd_account_show, cmd_diary_add, cmd_diary_delete,
    cmd_diary_show, cmd_profile_set, cmd_profile_show, cmd_recipe_create, cmd_recipe_delete,
    cmd_recipe_list, cmd_recipe_show, cmd_sync_history, cmd_sync_now, cmd_sync_pull,
    cmd_sync_push, cmd_sync_status, cmd_weight_delete, cmd_weight_history, cmd_weight_log,
};
use crate::config::Config;
use nibble_core::db::Database;

#[derive(Parser)]
#[command(
    name = "nibble",
    version,
    about = "A local-first nutrition tracker with background sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the food diary
    Diary {
        #[command(subcommand)]
        command: DiaryCommands,
    },
    /// Track body weight
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Daily targets and body stats
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Manage the sync account session
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Sync with the remote store
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
}

#[derive(Subcommand)]
enum DiaryCommands {
    /// Log a food entry
    Add {
        /// Food name
        name: String,
        /// Calories for this entry
        calories: f64,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date to log for (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Protein in grams
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs in grams
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat in grams
        #[arg(long)]
        fat: Option<f64>,
        /// Serving size description (e.g. "1 bowl", "200g")
        #[arg(long)]
        serving: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show diary entries for a date (default: today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a diary entry by id
    Delete {
        /// Entry id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Log a weight entry (one per day; re-logging overwrites)
    Log {
        /// Weight value (number)
        value: f64,
        /// Unit: kg or lbs (default: kg)
        #[arg(short, long, default_value = "kg")]
        unit: String,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weight history
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a weight entry by id
    Delete {
        /// Weight entry id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Create {
        /// Recipe name
        name: String,
        /// Number of servings this recipe makes
        #[arg(short, long, default_value = "1")]
        servings: f64,
        /// Ingredient line (repeatable)
        #[arg(long = "ingredient")]
        ingredients: Vec<String>,
        /// Instruction step (repeatable)
        #[arg(long = "instruction")]
        instructions: Vec<String>,
        /// Image URL
        #[arg(long)]
        image_url: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recipe details by id or name
    Show {
        /// Recipe id or name
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe by id
    Delete {
        /// Recipe id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Set daily targets and stats (unset flags keep current values)
    Set {
        /// Daily calorie target
        #[arg(long)]
        calories: Option<i64>,
        /// Daily protein target in grams
        #[arg(long)]
        protein: Option<i64>,
        /// Daily carbs target in grams
        #[arg(long)]
        carbs: Option<i64>,
        /// Daily fat target in grams
        #[arg(long)]
        fat: Option<i64>,
        /// Daily water target in ml
        #[arg(long)]
        water: Option<i64>,
        /// Daily exercise target in minutes
        #[arg(long)]
        exercise: Option<i64>,
        /// Height in cm
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// Age in years
        #[arg(long)]
        age: Option<i64>,
        /// Activity level (e.g. sedentary, light, moderate, active)
        #[arg(long)]
        activity: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the current profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Store a session for sync
    Login {
        /// Owner id assigned by the backend
        owner_id: String,
        /// Access token
        token: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the stored session
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in account
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Run a full sync (upload, download, reconcile)
    Now {
        /// Coalesce with other sync requests arriving within the window
        #[arg(long)]
        debounce: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload local changes only
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download and merge remote records only
    Pull {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show when the last sync ran and how it went
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent sync attempts
    History {
        /// Number of attempts to show
        #[arg(short, long, default_value = "20")]
        limit: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Diary { command } => match command {
            DiaryCommands::Add {
                name,
                calories,
                meal,
                date,
                protein,
                carbs,
                fat,
                serving,
                json,
            } => cmd_diary_add(
                &db, &name, calories, &meal, date, protein, carbs, fat, serving, json,
            ),
            DiaryCommands::Show { date, json } => cmd_diary_show(&db, date, json),
            DiaryCommands::Delete { id, json } => cmd_diary_delete(&db, &id, json),
        },
        Commands::Weight { command } => match command {
            WeightCommands::Log {
                value,
                unit,
                date,
                notes,
                json,
            } => cmd_weight_log(&db, value, &unit, date, notes, json),
            WeightCommands::History { json } => cmd_weight_history(&db, json),
            WeightCommands::Delete { id, json } => cmd_weight_delete(&db, &id, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                name,
                servings,
                ingredients,
                instructions,
                image_url,
                json,
            } => cmd_recipe_create(&db, &name, servings, ingredients, instructions, image_url, json),
            RecipeCommands::List { json } => cmd_recipe_list(&db, json),
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&db, &recipe, json),
            RecipeCommands::Delete { id, json } => cmd_recipe_delete(&db, &id, json),
        },
        Commands::Profile { command } => match command {
            ProfileCommands::Set {
                calories,
                protein,
                carbs,
                fat,
                water,
                exercise,
                height,
                weight,
                age,
                activity,
                json,
            } => cmd_profile_set(
                &db, calories, protein, carbs, fat, water, exercise, height, weight, age,
                activity, json,
            ),
            ProfileCommands::Show { json } => cmd_profile_show(&db, json),
        },
        Commands::Account { command } => match command {
            AccountCommands::Login {
                owner_id,
                token,
                json,
            } => cmd_account_login(&config, &owner_id, &token, json),
            AccountCommands::Logout { json } => cmd_account_logout(&config, json),
            AccountCommands::Show { json } => cmd_account_show(&config, json),
        },
        Commands::Sync { command } => match command {
            SyncCommands::Now { debounce, json } => {
                cmd_sync_now(Arc::new(Mutex::new(db)), &config, debounce, json).await
            }
            SyncCommands::Push { json } => {
                cmd_sync_push(Arc::new(Mutex::new(db)), &config, json).await
            }
            SyncCommands::Pull { json } => {
                cmd_sync_pull(Arc::new(Mutex::new(db)), &config, json).await
            }
            SyncCommands::Status { json } => cmd_sync_status(&db, json),
            SyncCommands::History { limit, json } => cmd_sync_history(&db, limit, json),
        },
    }
}
