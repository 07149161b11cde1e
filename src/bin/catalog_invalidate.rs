use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use catalog_sync::catalog::SqliteCatalog;
use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::invalidate::Invalidator;
use catalog_sync::model::{ExecutionContext, ProductId};
use catalog_sync::scope::ConfigScopes;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Flag catalog products for resync in every scope with an index account"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Product ids to invalidate (comma separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "all")]
    ids: Vec<ProductId>,

    /// Invalidate the whole enabled and visible catalog
    #[arg(long)]
    all: bool,

    /// Run as part of schema setup or upgrade (full invalidation becomes a no-op)
    #[arg(long)]
    setup_context: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if !args.all && args.ids.is_empty() {
        bail!("pass --ids or --all");
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let invalidator = Invalidator::new(
        pool.clone(),
        Arc::new(SqliteCatalog::new(pool.clone())),
        Arc::new(ConfigScopes::from_config(&cfg)),
    );

    let report = if args.all {
        let ctx = if args.setup_context {
            ExecutionContext::SetupUpgrade
        } else {
            ExecutionContext::Normal
        };
        invalidator.invalidate_all(ctx).await
    } else {
        invalidator.invalidate(&args.ids).await
    };

    info!(
        scopes = report.scopes,
        created = report.created,
        dirtied = report.dirtied,
        deleted = report.deleted,
        skipped = report.skipped,
        "invalidation complete"
    );
    if !report.failed_scopes.is_empty() {
        bail!("invalidation failed for scopes {:?}", report.failed_scopes);
    }
    Ok(())
}
