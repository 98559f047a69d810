// Main entry point for the Jutzo administration tool

use anyhow::Context;
use clap::{Parser, Subcommand};
use jutzo::schema::SchemaManager;
use jutzo::state::RedisSessionCache;
use jutzo::store::PgCredentialStore;
use jutzo::{AuthorizationEngine, Config};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Administer a Jutzo identity store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare the schema, ensure an administrator exists, and report status
    Init,

    /// List registered users in username order
    ListUsers {
        /// Start strictly after this username
        #[arg(long, default_value = "")]
        after: String,

        /// Page size; 0 lists everything
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Grant a right to a user
    Grant { username: String, right: String },

    /// Revoke a right from a user
    Revoke { username: String, right: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration first (before any logging)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing subscriber with config values
    init_tracing(&config)?;

    let config = Arc::new(config);
    let engine = connect(config).await?;

    let result = run(&engine, cli.command).await;
    engine.shutdown().await;

    if let Err(ref e) = result {
        error!(error = %e, "Command failed");
    }
    result
}

/// Open both backends, bring the schema up to date and build the engine
async fn connect(config: Arc<Config>) -> anyhow::Result<AuthorizationEngine> {
    let store = PgCredentialStore::connect(
        &config.database_url,
        config.db_max_connections,
        config.backend_timeout(),
        config.ticket_ttl(),
    )
    .await
    .context("Failed to connect to database")?;

    let version = SchemaManager::new(store.pool().clone())
        .prepare()
        .await
        .context("Schema preparation failed")?;
    info!(version, "Schema ready");

    let cache = RedisSessionCache::new(&config.redis_url, config.backend_timeout())
        .await
        .context("Failed to connect to Redis")?;

    let engine = AuthorizationEngine::new(config, Arc::new(store), Arc::new(cache))
        .await
        .context("Failed to initialize engine")?;
    Ok(engine)
}

async fn run(engine: &AuthorizationEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            let admins = engine.count_admins().await?;
            println!("schema version {}", jutzo::schema::SUPPORTED_VERSION);
            println!("administrators {}", admins);
        }
        Command::ListUsers { after, limit } => {
            for user in engine.list_users(&after, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    user.username,
                    user.email,
                    if user.email_validated { "validated" } else { "unvalidated" },
                    user.rights,
                    user.creation_time.to_rfc3339(),
                );
            }
        }
        Command::Grant { username, right } => {
            let rights = engine.grant_right(&username, &right).await?;
            println!("{}\t{}", username, rights);
        }
        Command::Revoke { username, right } => {
            let rights = engine.revoke_right(&username, &right).await?;
            println!("{}\t{}", username, rights);
        }
    }
    Ok(())
}

/// Initialize tracing subscriber based on configuration
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let level = parse_log_level(&config.log_level).map_err(anyhow::Error::msg)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so command output stays clean
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<tracing::Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(format!("Invalid log level: {}", level)),
    }
}
