use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use newsdesk::ai::LlmClient;
use newsdesk::api::{self, AppState};
use newsdesk::collect::{default_sources, Fetcher};
use newsdesk::config::{Config, API_KEY_ENV, CONFIG_PATH_ENV};
use newsdesk::export::Exporter;
use newsdesk::monitor::{Monitor, Trigger};
use newsdesk::scheduler::Scheduler;
use newsdesk::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Tech news monitor with AI categorization and exports")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", env = CONFIG_PATH_ENV, default_value = "newsdesk.toml")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Run one collection pass, print its report and exit
    #[arg(long)]
    collect_once: bool,
}

/// Create the data directory with user-only permissions.
fn prepare_data_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory '{}'", dir.display()))?;
        tracing::info!(path = %dir.display(), "Created data directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set data directory permissions to 0700"
            );
        }
    }
    Ok(())
}

/// Delete the database file and its WAL sidecars.
fn reset_database(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        match std::fs::remove_file(PathBuf::from(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to delete database"),
        }
    }
    println!("Database reset.");
    Ok(())
}

fn build_client(config: &Config) -> Result<Option<LlmClient>> {
    let Some(key) = config.api_key() else {
        tracing::warn!(
            env = API_KEY_ENV,
            "No LLM API key configured; categorization and summaries are disabled"
        );
        return Ok(None);
    };
    let client = LlmClient::new(
        &config.llm_base_url,
        key,
        config.ai_timeout(),
        config.ai_max_retries,
    )
    .context("Failed to create LLM client")?;
    Ok(Some(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    tracing::debug!(?config, "Loaded configuration");

    prepare_data_dir(&config.data_dir)?;
    let db_path = config.database_path();
    if args.reset_db {
        reset_database(&db_path)?;
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsdesk appears to be running. Please stop it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    if config.seed_default_sources {
        let added = db
            .seed_sources_if_empty(&default_sources())
            .await
            .context("Failed to seed default sources")?;
        if added > 0 {
            tracing::info!(sources = added, "Seeded default sources");
        }
    }

    let fetcher = Fetcher::new(config.fetch_timeout()).context("Failed to create HTTP client")?;
    let monitor = Monitor::new(
        db.clone(),
        fetcher,
        build_client(&config)?,
        config.collect_concurrency(),
    );

    if args.collect_once {
        let report = monitor
            .collect_all(Trigger::Manual)
            .await
            .context("Collection failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let exporter = Exporter::new(config.exports_dir()).context("Failed to prepare exports directory")?;
    let scheduler = Scheduler::new(monitor.clone());
    if config.start_scheduler {
        scheduler.start().await;
    }

    let state = AppState {
        db,
        monitor,
        scheduler: scheduler.clone(),
        exporter: Arc::new(exporter),
    };
    let app = api::router(state);

    let bind = args.bind.unwrap_or_else(|| config.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!(addr = %bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            scheduler.stop();
        })
        .await
        .context("Server error")?;

    Ok(())
}
