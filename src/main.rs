use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};

/// Membership voting backend for the plus servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the HTTP port from the environment
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Override the state directory from the environment
    #[arg(long)]
    state_path: Option<String>,
}

mod config;
mod error;
mod managers;
mod models;
mod state;
mod web;

use config::AppConfig;
use managers::{create_shared_suggestion_manager, create_shared_voting_manager};
use models::User;
use state::{create_shared_plus_database, PlusDatabase};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(state_path) = args.state_path {
        config.state_path = state_path;
    }

    // Ensure state directory exists
    tokio::fs::create_dir_all(&config.state_path).await.ok();

    let db_path = config.database_path();
    info!("Loading plus database from {}...", db_path);
    let database = PlusDatabase::load(&db_path).await?;
    info!(
        "Loaded {} users, {} suggestions, {} votes, {} summaries",
        database.users.len(),
        database.suggestions.len(),
        database.votes.len(),
        database.summaries.len()
    );
    let db = create_shared_plus_database(database);

    // Install the admin's bootstrap credential so the first tokens can
    // be issued through the API.
    if let Some(admin_token) = &config.admin_token {
        let mut store = db.write().await;
        if store.find_user(&config.admin_discord_id).is_none() {
            store.upsert_user(User::new(
                config.admin_discord_id.clone(),
                "admin".to_string(),
            ));
        }
        store
            .api_tokens
            .retain(|_, owner| owner != &config.admin_discord_id);
        store
            .api_tokens
            .insert(admin_token.clone(), config.admin_discord_id.clone());
        store.touch();
        store.save(&db_path).await?;
        info!("Admin credential installed for {}", config.admin_discord_id);
    } else {
        warn!("ADMIN_TOKEN not set - admin endpoints are unreachable this run");
    }

    let suggestion_manager = create_shared_suggestion_manager(db.clone(), db_path.clone());
    let voting_manager = create_shared_voting_manager(db.clone(), db_path, config.clone());

    let state = AppState {
        db,
        config,
        suggestion_manager,
        voting_manager,
    };

    web::start_web_server(state).await
}
