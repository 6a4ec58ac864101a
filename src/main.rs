use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use podsift::categorizer::gemini::GeminiClient;
use podsift::categorizer::{BatchCategorizer, Categorizer, NoopCategorizer};
use podsift::config::Config;
use podsift::database::Database;
use podsift::error::AppError;
use podsift::export;
use podsift::spotify::SpotifyClient;
use podsift::sync;

/// Incremental Spotify playlist podcast extractor with LLM categorization.
#[derive(Parser, Debug)]
#[command(name = "podsift", version, about)]
struct Args {
    /// Run without LLM categorization
    #[arg(long)]
    no_llm: bool,

    /// Reset the database before running
    #[arg(long)]
    reset_db: bool,

    /// Reset every episode's category to the pending label, keeping the rows
    #[arg(long)]
    reset_categories: bool,

    /// Only export existing data to CSV, no ingestion
    #[arg(long)]
    export_only: bool,

    /// Playlist to sync (overrides SPOTIFY_PLAYLIST_ID)
    #[arg(long)]
    playlist_id: Option<String>,

    /// Output CSV path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Path to the .env file
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

// Execution is deliberately sequential; the current-thread runtime keeps it
// to a single OS thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let mut config = Config::load(&args.env_file)?;
    if args.no_llm {
        config.gemini_api_key = None;
    }
    if let Some(id) = args.playlist_id {
        config.playlist_id = Some(id);
    }

    log::info!("Configuration:");
    log::info!("  - Database: {}", config.db_path.display());
    log::info!(
        "  - LLM categorization: {}",
        if args.no_llm {
            "disabled (--no-llm)"
        } else if config.gemini_api_key.is_some() {
            "enabled"
        } else {
            "no API key"
        }
    );

    // Export-only needs no credentials and performs no ingestion.
    if args.export_only {
        if !config.db_path.exists() {
            return Err(AppError::Config(format!(
                "database {} does not exist, nothing to export",
                config.db_path.display()
            )));
        }
        let db = Database::new(&config.db_path, config.labels.clone())?;
        export_and_log_stats(&db, args.output.as_deref(), config.playlist_id.as_deref())?;
        return Ok(());
    }

    let playlist_id = config.playlist_id.clone().ok_or_else(|| {
        AppError::Config(
            "SPOTIFY_PLAYLIST_ID not set; use --playlist-id or the .env file".to_string(),
        )
    })?;

    // Credentials are validated before any ingestion work starts.
    let spotify = build_spotify_client(&config).await?;

    let db = Database::new(&config.db_path, config.labels.clone())?;

    if args.reset_db {
        db.reset()?;
    } else if args.reset_categories {
        let count = db.reset_categories()?;
        log::info!("Reset categories of {} episodes", count);
    }

    let mut categorizer = build_categorizer(&config);

    let stats = db.stats()?;
    if stats.total_episodes > 0 {
        log::info!(
            "Store: {} episodes, {} categories, {} uncategorized",
            stats.total_episodes,
            stats.total_categories,
            stats.uncategorized
        );
    }

    let report = sync::sync_playlist(&spotify, &db, categorizer.as_mut(), &playlist_id).await?;
    if report.processed == 0 {
        log::info!("No new episodes found");
    }

    sync::backfill_pending(&db, categorizer.as_mut()).await?;

    export_and_log_stats(&db, args.output.as_deref(), Some(&playlist_id))?;

    Ok(())
}

async fn build_spotify_client(config: &Config) -> Result<SpotifyClient, AppError> {
    if let Some(token) = &config.spotify_access_token {
        log::info!("Using direct Spotify access token");
        return Ok(SpotifyClient::new(token.clone()));
    }

    match (
        &config.spotify_client_id,
        &config.spotify_client_secret,
        &config.spotify_refresh_token,
    ) {
        (Some(id), Some(secret), Some(refresh)) => {
            SpotifyClient::from_refresh_token(id, secret, refresh)
                .await
                .map_err(AppError::Config)
        }
        _ => Err(AppError::Config(
            "missing Spotify credentials: set SPOTIFY_ACCESS_TOKEN or \
             SPOTIFY_CLIENT_ID + SPOTIFY_CLIENT_SECRET + SPOTIFY_REFRESH_TOKEN"
                .to_string(),
        )),
    }
}

fn build_categorizer(config: &Config) -> Box<dyn Categorizer> {
    match &config.gemini_api_key {
        Some(key) => {
            log::info!(
                "Gemini model '{}' configured ({} RPM, at most {} categories)",
                config.gemini_model,
                config.rpm_limit,
                config.max_categories
            );
            let model = GeminiClient::new(key.clone()).with_model(&config.gemini_model);
            Box::new(BatchCategorizer::new(
                Box::new(model),
                config.rpm_limit,
                config.max_categories,
            ))
        }
        None => Box::new(NoopCategorizer),
    }
}

fn export_and_log_stats(
    db: &Database,
    output: Option<&Path>,
    playlist_id: Option<&str>,
) -> Result<(), AppError> {
    match export::export_to_csv(db, output, playlist_id)? {
        Some(path) => {
            log::info!("Export complete: {}", path.display());
            let stats = db.stats()?;
            if !stats.top_categories.is_empty() {
                log::info!("Top categories:");
                for (category, count) in stats.top_categories.iter().take(5) {
                    log::info!("  - {}: {} episodes", category, count);
                }
            }
        }
        None => log::warn!("Nothing exported (store has no rows)"),
    }
    Ok(())
}
