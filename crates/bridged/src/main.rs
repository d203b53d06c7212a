//! Moderation-event bridge daemon.
//!
//! `bridged run` drives the poll scheduler against the configured
//! Postgres database and tenant credential file until interrupted.
//! `bridged health` probes a tenant's labeler. `bridged migrate` applies
//! the schema migrations and exits.

#![deny(unsafe_code)]

use bridge_core::credential::{CredentialStore, StaticCredentialStore, TenantCredential};
use bridge_store::pg::{migrator, PgAuditStore, PgMappingStore, PgSyncStateStore};
use clap::{Parser, Subcommand};
use ozone_bridge::queue::{HttpReviewQueue, LogReviewQueue, ReviewQueue};
use ozone_bridge::scheduler::{PollScheduler, SchedulerConfig};
use ozone_bridge::BridgeService;
use ozone_client::OzoneClient;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "bridged", about = "Bidirectional moderation-event bridge")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling scheduler until interrupted
    Run,
    /// Probe a tenant's labeler health endpoint
    Health {
        #[arg(short, long)]
        tenant: String,
    },
    /// Apply database migrations and exit
    Migrate,
}

struct Config {
    database_url: String,
    poll_enabled: bool,
    poll_interval_ms: u64,
    credentials_file: Option<PathBuf>,
    review_queue_url: Option<Url>,
}

impl Config {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| "DATABASE_URL is required")?,
            poll_enabled: parse_bool(std::env::var("POLL_ENABLED").ok().as_deref()),
            poll_interval_ms: match std::env::var("POLL_INTERVAL_MS").ok() {
                Some(raw) => raw.parse::<u64>().map_err(|_| "invalid POLL_INTERVAL_MS")?,
                None => 30_000,
            },
            credentials_file: std::env::var("CREDENTIALS_FILE").ok().map(PathBuf::from),
            review_queue_url: match std::env::var("REVIEW_QUEUE_URL").ok() {
                Some(raw) => Some(Url::parse(&raw)?),
                None => None,
            },
        })
    }
}

fn parse_bool(raw: Option<&str>) -> bool {
    matches!(raw, Some("true") | Some("TRUE") | Some("1"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().json().with_env_filter(filter).init();
}

fn load_credentials(
    path: Option<&Path>,
) -> Result<StaticCredentialStore, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(StaticCredentialStore::new(Vec::new()));
    };
    let text = std::fs::read_to_string(path)?;
    let credentials: Vec<TenantCredential> = serde_json::from_str(&text)?;
    info!(count = credentials.len(), file = %path.display(), "loaded tenant credentials");
    Ok(StaticCredentialStore::new(credentials))
}

async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(5).connect(database_url).await
}

async fn cmd_run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(&config.database_url).await?;
    migrator().run(&pool).await?;

    let credentials = load_credentials(config.credentials_file.as_deref())?;
    let service = Arc::new(BridgeService::new(
        Arc::new(credentials),
        Arc::new(PgSyncStateStore::new(pool.clone())),
        Arc::new(PgMappingStore::new(pool.clone())),
        Arc::new(PgAuditStore::new(pool)),
    ));
    let queue: Arc<dyn ReviewQueue> = match config.review_queue_url {
        Some(url) => {
            info!(url = %url, "review-queue items will be POSTed");
            Arc::new(HttpReviewQueue::new(url)?)
        }
        None => {
            info!("no REVIEW_QUEUE_URL configured; review-queue items will be logged");
            Arc::new(LogReviewQueue)
        }
    };
    let scheduler = PollScheduler::new(
        service,
        queue,
        SchedulerConfig {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            enabled: config.poll_enabled,
        },
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    scheduler.run(cancel).await;
    Ok(())
}

// The health probe needs no database; it goes straight from the
// credential file to the labeler.
async fn cmd_health(
    config: Config,
    tenant: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = load_credentials(config.credentials_file.as_deref())?;
    let credential = credentials
        .get(tenant)
        .await?
        .ok_or_else(|| format!("tenant {tenant} has no labeler credential"))?;
    let health = OzoneClient::new(credential)?.health_check().await?;
    println!("labeler for {tenant}: version {}", health.version);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    match cli.cmd {
        Command::Run => cmd_run(config).await?,
        Command::Health { tenant } => cmd_health(config, &tenant).await?,
        Command::Migrate => {
            let pool = connect(&config.database_url).await?;
            migrator().run(&pool).await?;
            info!("migrations applied");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing() {
        assert!(parse_bool(Some("true")));
        assert!(parse_bool(Some("TRUE")));
        assert!(parse_bool(Some("1")));
        assert!(!parse_bool(Some("false")));
        assert!(!parse_bool(Some("yes")));
        assert!(!parse_bool(None));
    }

    #[tokio::test]
    async fn missing_credentials_file_yields_empty_store() {
        let store = load_credentials(None).unwrap();
        assert!(store.get("any").await.unwrap().is_none());
    }
}
