use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use catalog_sync::catalog::SqliteCatalog;
use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::model::ScopeId;
use catalog_sync::push::HttpPushClient;
use catalog_sync::scope::ConfigScopes;
use catalog_sync::sync::{SyncOptions, SyncReport, SyncService};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one sync pass over the dirty products and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only sync this scope id
    #[arg(long)]
    scope: Option<ScopeId>,
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

    let scopes = ConfigScopes::from_config(&cfg);
    let service = SyncService::new(
        pool.clone(),
        Arc::new(SqliteCatalog::new(pool.clone())),
        Arc::new(scopes.clone()),
        Arc::new(HttpPushClient::from_config(&cfg)?),
        SyncOptions::from_config(&cfg),
    );

    let reports = match args.scope {
        Some(id) => {
            let scope = scopes
                .all()
                .into_iter()
                .find(|s| s.id == id)
                .ok_or_else(|| anyhow!("scope {} is not configured", id))?;
            vec![service.run(&scope).await?]
        }
        None => service.run_all().await?,
    };

    for report in &reports {
        print_report(report);
    }
    info!(scopes = reports.len(), "sync pass complete");
    Ok(())
}

fn print_report(report: &SyncReport) {
    if let Some(reason) = report.skipped {
        println!("scope {}: skipped ({:?})", report.scope_id, reason);
        return;
    }
    println!(
        "scope {}: dirty={} batches={} pushed={} failed={} empty={} sent={} cleaned={}{}",
        report.scope_id,
        report.dirty,
        report.batches,
        report.pushed,
        report.failed,
        report.empty,
        report.products_sent,
        report.cleaned,
        if report.stopped { " (stopped)" } else { "" }
    );
    if !report.failed_ids.is_empty() {
        println!("  still dirty: {:?}", report.failed_ids);
    }
}
