//! Asset registry inspection commands.

use std::sync::Arc;

use arw_engine::{AssetCatalog, PeriodResolver, PgStore};
use chrono::NaiveDate;
use clap::Subcommand;
use sqlx::PgPool;

/// Sub-commands available under `assets`.
#[derive(Debug, Subcommand)]
pub enum AssetsCommands {
    /// List registered assets
    List,
    /// Show which asset serves an analysis variable
    Variable { name: String },
    /// Clamp a date range to an asset's coverage window
    Check {
        #[arg(long)]
        key: String,
        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day of the range (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },
}

pub(crate) async fn run(pool: PgPool, command: AssetsCommands) -> anyhow::Result<()> {
    match command {
        AssetsCommands::List => {
            let rows = arw_db::list_assets(&pool).await?;
            if rows.is_empty() {
                println!("no assets registered; run `arw-cli db seed`");
            }
            for row in rows {
                println!("{:<24} {:<16} {}", row.key, row.asset_type, row.source);
            }
        }
        AssetsCommands::Variable { name } => {
            let catalog = AssetCatalog::new(Arc::new(PgStore::new(pool)));
            let asset = catalog.asset_for_variable(&name).await?;
            println!("{name} is served by {} ({})", asset.key, asset.source);
        }
        AssetsCommands::Check { key, start, end } => {
            let resolver = PeriodResolver::new(Arc::new(PgStore::new(pool)));
            match resolver.clamp_range(&key, start, end).await? {
                Some(range) => println!("{key} covers {} to {}", range.start, range.end),
                None => println!("{key} has no coverage between {start} and {end}"),
            }
        }
    }
    Ok(())
}
