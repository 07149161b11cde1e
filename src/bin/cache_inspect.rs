use std::path::PathBuf;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;

use catalog_sync::cache;
use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::scope::ConfigScopes;

#[derive(Parser, Debug)]
#[command(about = "Show product cache state per scope")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Number of oldest dirty entries to list per scope
    #[arg(long, default_value = "10")]
    oldest: i64,

    /// Remove entries deleted longer than `app.purge_after_days` ago
    #[arg(long)]
    purge_deleted: bool,

    /// Flag every live entry dirty so the next pass resends everything
    #[arg(long)]
    mark_all_dirty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let now = Utc::now();
    for scope in ConfigScopes::from_config(&cfg).all() {
        if args.mark_all_dirty {
            let n = cache::mark_all_dirty(&pool, scope.id, now).await?;
            println!("[{}] marked {} entries dirty", scope.code, n);
        }
        if args.purge_deleted {
            let cutoff = now - Duration::days(cfg.app.purge_after_days);
            let n = cache::purge_deleted(&pool, scope.id, cutoff).await?;
            println!("[{}] purged {} deleted entries", scope.code, n);
        }

        let stats = cache::scope_stats(&pool, scope.id).await?;
        println!(
            "[{}] id={} total={} dirty={} deleted={}",
            scope.code, scope.id, stats.total, stats.dirty, stats.deleted
        );
        let oldest = cache::dirty_entries_before(&pool, scope.id, Utc::now(), args.oldest).await?;
        for entry in oldest {
            println!(
                "  product {} rev {} dirty since {}",
                entry.product_id, entry.revision, entry.updated_at
            );
        }
    }
    Ok(())
}
