mod auth;
mod config;
mod http;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use platform_db::{DbPool, connect};
use platform_obs::{ObsConfig, init_tracing};
use platform_storage::{MemoryStorage, ObjectStore, build_store};
use products_crm::{AppSchema, CrmSettings, build_schema, seed_demo};
use products_listings::{
    BigQueryListingSource, DatabaseListingSource, Listing, ListingError, ListingFilters,
    ListingPage, ListingResult, ListingSource,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::JwtVerifier,
    config::{AppConfig, ListingsBackend},
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "deal-desk", version, about = "Business acquisition deal desk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + GraphQL server.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Insert demo listings and a sample pipeline for one user.
    Seed {
        #[arg(long, env = "SEED_USER_ID", help = "Owner of the demo deals")]
        user_id: Uuid,
    },
    /// Print the GraphQL schema.
    #[command(name = "schema:print")]
    SchemaPrint {
        #[arg(long, value_name = "FILE", help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
    /// Rollback every migration.
    Reset,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

impl From<&ServeCommand> for ServeConfig {
    fn from(value: &ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(ObsConfig::from_env())?;
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    match cli.command {
        Command::Serve(cmd) => run_server(cmd, config).await,
        Command::Migrate(action) => migrate(action, &config).await,
        Command::Seed { user_id } => run_seed(user_id, &config).await,
        Command::SchemaPrint { output } => schema_print(output),
    }
}

async fn setup_pool(config: &AppConfig) -> Result<DbPool> {
    connect(&config.database).await.map_err(Into::into)
}

async fn run_server(cmd: ServeCommand, config: AppConfig) -> Result<()> {
    let verifier = config
        .jwt_secret
        .as_deref()
        .map(JwtVerifier::new)
        .context("JWT_SECRET (or SUPABASE_JWT_SECRET) must be set to serve")?;
    let pool = setup_pool(&config).await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;

    let listings = listing_source(&config, &pool)?;
    let store = build_store(&config.storage).context("failed to configure object storage")?;
    info!(
        listings = listings.backend(),
        bucket = store.bucket(),
        "backends configured"
    );
    let AppSchema(schema) = build_schema(
        Arc::new(pool.clone()),
        store,
        listings.clone(),
        config.crm,
    );
    let state = AppState {
        pool,
        schema,
        listings,
        verifier: Arc::new(verifier),
        cors_allowed_origins: Arc::new(config.cors_allowed_origins.clone()),
    };
    http::serve((&cmd).into(), state).await
}

fn listing_source(config: &AppConfig, pool: &DbPool) -> Result<Arc<dyn ListingSource>> {
    let source: Arc<dyn ListingSource> = match &config.listings {
        ListingsBackend::Database => Arc::new(DatabaseListingSource::new(
            pool.clone(),
            config.listings_online_only,
        )?),
        ListingsBackend::BigQuery(bq) => Arc::new(BigQueryListingSource::new(bq.as_ref().clone())?),
    };
    Ok(source)
}

async fn run_seed(user_id: Uuid, config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    ensure_migrations(&pool, false).await?;
    let summary = seed_demo(&pool, user_id).await?;
    info!(
        %user_id,
        listings = summary.listings,
        deals = summary.deals,
        "seed complete"
    );
    Ok(())
}

fn schema_print(path: Option<PathBuf>) -> Result<()> {
    let sdl = offline_schema().sdl();
    match path {
        Some(target) => {
            std::fs::write(&target, sdl)
                .with_context(|| format!("failed to write {}", target.display()))?;
            info!(path = %target.display(), "schema written");
        }
        None => println!("{sdl}"),
    }
    Ok(())
}

/// Schema with placeholder data, enough to render SDL without a database.
fn offline_schema() -> products_crm::CrmSchema {
    let pool = DbPool::Disconnected;
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStorage::default());
    let listings: Arc<dyn ListingSource> = Arc::new(OfflineListings);
    build_schema(Arc::new(pool), store, listings, CrmSettings::default()).0
}

struct OfflineListings;

#[async_trait]
impl ListingSource for OfflineListings {
    fn backend(&self) -> &'static str {
        "offline"
    }

    async fn search(&self, _filters: &ListingFilters) -> ListingResult<ListingPage> {
        Err(ListingError::Config("no listing source in offline mode".into()))
    }

    async fn get(&self, _id: &str) -> ListingResult<Option<Listing>> {
        Err(ListingError::Config("no listing source in offline mode".into()))
    }
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "{} pending migration(s); run `deal-desk migrate up` or pass --allow-dirty",
            pending.len()
        );
    }
    Ok(())
}

async fn migrate(action: MigrateCommand, config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    match action {
        MigrateCommand::Up => {
            Migrator::up(&pool, None).await?;
            info!("database migrations applied");
        }
        MigrateCommand::Down => {
            Migrator::down(&pool, Some(1)).await?;
            info!("most recent migration rolled back");
        }
        MigrateCommand::Reset => {
            Migrator::reset(&pool).await?;
            info!("all migrations rolled back");
        }
    }
    Ok(())
}
