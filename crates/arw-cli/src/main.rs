mod analysis;
mod assets;
mod cache;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::analysis::AnalysisCommands;
use crate::assets::AssetsCommands;
use crate::cache::CacheCommands;

#[derive(Debug, Parser)]
#[command(name = "arw-cli")]
#[command(about = "Analysis pipeline command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Run, inspect and delete analysis results
    Analysis {
        #[command(subcommand)]
        command: AnalysisCommands,
    },
    /// Result cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Inspect the asset registry
    Assets {
        #[command(subcommand)]
        command: AssetsCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database answers
    Ping,
    /// Apply pending migrations
    Migrate,
    /// Upsert the asset registry from the assets file
    Seed {
        /// Override `ARW_ASSETS_PATH`
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("arw-cli ready; run with --help for commands");
        return Ok(());
    };

    let config = arw_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = arw_db::PoolConfig::from_app_config(&config);
    let pool = arw_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => run_db(&pool, &config, command).await,
        Commands::Analysis { command } => analysis::run(pool, &config, command).await,
        Commands::Cache { command } => cache::run(pool, command).await,
        Commands::Assets { command } => assets::run(pool, command).await,
    }
}

async fn run_db(
    pool: &sqlx::PgPool,
    config: &arw_core::AppConfig,
    command: DbCommands,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Ping => {
            arw_db::ping(pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            let applied = arw_db::run_migrations(pool).await?;
            println!("applied {applied} migrations");
        }
        DbCommands::Seed { path } => {
            let path = path.unwrap_or_else(|| config.assets_path.clone());
            let file = arw_core::load_assets(&path)?;
            let count = arw_db::seed_assets(pool, &file.assets).await?;
            tracing::info!(count, path = %path.display(), "asset registry seeded");
            println!("seeded {count} assets from {}", path.display());
        }
    }
    Ok(())
}
