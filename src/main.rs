use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use catalog_sync::catalog::SqliteCatalog;
use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::push::HttpPushClient;
use catalog_sync::scope::ConfigScopes;
use catalog_sync::sync::{SyncOptions, SyncService};

#[derive(Debug, Parser)]
#[command(author, version, about = "Push dirty catalog products to the search index")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let service = SyncService::new(
        pool.clone(),
        Arc::new(SqliteCatalog::new(pool.clone())),
        Arc::new(ConfigScopes::from_config(&cfg)),
        Arc::new(HttpPushClient::from_config(&cfg)?),
        SyncOptions::from_config(&cfg),
    );

    let stop = service.stop_handle();
    let wake = Arc::new(Notify::new());
    let waker = wake.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; finishing current batch");
            stop.store(true, Ordering::Relaxed);
            waker.notify_one();
        }
    });

    let stop = service.stop_handle();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    info!(scopes = cfg.scopes.len(), "starting catalog sync");
    while !stop.load(Ordering::Relaxed) {
        match service.run_all().await {
            Ok(reports) => {
                let failed: usize = reports.iter().map(|r| r.failed).sum();
                if failed > 0 {
                    warn!(failed, "some batches failed; they are retried on the next pass");
                }
            }
            Err(err) => {
                error!(%err, "sync pass aborted");
                return Err(err.into());
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_sleep) => {}
            _ = wake.notified() => {}
        }
    }

    info!("catalog sync stopped");
    Ok(())
}
