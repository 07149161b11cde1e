use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::{BatchBuilder, SyncBatch, DEFAULT_BATCH_SIZE};
use crate::cache::{self, CleanTarget};
use crate::catalog::{CatalogReader, CatalogSnapshot};
use crate::config::Config;
use crate::db::Pool;
use crate::dedup::DedupTracker;
use crate::error::SyncError;
use crate::model::{DestinationScope, ProductId, ProductRecord, ScopeId};
use crate::push::{build_upsert_payload, PushClient};
use crate::scope::ScopeResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub batch_size: usize,
    /// Maximum dirty entries picked up per scope and run.
    pub sweep_limit: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sweep_limit: 10_000,
        }
    }
}

impl SyncOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.app.batch_size,
            sweep_limit: cfg.app.sweep_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoAccount,
    SyncDisabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub scope_id: ScopeId,
    pub skipped: Option<SkipReason>,
    pub dirty: usize,
    pub batches: usize,
    pub pushed: usize,
    pub failed: usize,
    /// Batches with nothing to send after mapping.
    pub empty: usize,
    pub products_sent: usize,
    pub cleaned: u64,
    pub failed_ids: Vec<ProductId>,
    /// The run stopped before all batches were attempted.
    pub stopped: bool,
}

/// Pushes dirty products of each scope to the index and marks them clean.
#[derive(Clone)]
pub struct SyncService {
    pool: Pool,
    catalog: Arc<dyn CatalogReader>,
    scopes: Arc<dyn ScopeResolver>,
    push: Arc<dyn PushClient>,
    builder: BatchBuilder,
    sweep_limit: i64,
    stop: Arc<AtomicBool>,
}

impl SyncService {
    pub fn new(
        pool: Pool,
        catalog: Arc<dyn CatalogReader>,
        scopes: Arc<dyn ScopeResolver>,
        push: Arc<dyn PushClient>,
        options: SyncOptions,
    ) -> Self {
        Self {
            pool,
            catalog,
            scopes,
            push,
            builder: BatchBuilder::new(options.batch_size),
            sweep_limit: options.sweep_limit.max(1),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that, once set, stops runs before their next batch.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sync every scope that has an account. A failing scope is logged and
    /// skipped; invariant violations end the run.
    #[instrument(skip_all)]
    pub async fn run_all(&self) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::new();
        for scope in self.scopes.active_scopes_with_account() {
            if self.stopping() {
                info!("stop requested; remaining scopes left for the next run");
                break;
            }
            match self.run(&scope).await {
                Ok(report) => reports.push(report),
                Err(err) if err.is_invariant_violation() => {
                    error!(%err, scope_id = scope.id, "sync invariant violated; aborting run");
                    return Err(err);
                }
                Err(err) => {
                    error!(?err, scope_id = scope.id, "sync failed for scope");
                }
            }
        }
        Ok(reports)
    }

    #[instrument(skip_all, fields(scope_id = scope.id))]
    pub async fn run(&self, scope: &DestinationScope) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            run_id: Uuid::new_v4(),
            scope_id: scope.id,
            ..Default::default()
        };
        let run_id = report.run_id;

        let Some(account) = self.scopes.account_for(scope) else {
            warn!(%run_id, scope = %scope.code, "no index account for scope; skipping");
            report.skipped = Some(SkipReason::NoAccount);
            return Ok(report);
        };
        if !self.scopes.is_sync_enabled_for(scope) {
            debug!(%run_id, scope = %scope.code, "product sync disabled for scope");
            report.skipped = Some(SkipReason::SyncDisabled);
            return Ok(report);
        }

        let started = Utc::now();
        let dirty =
            cache::dirty_entries_before(&self.pool, scope.id, started, self.sweep_limit).await?;
        report.dirty = dirty.len();
        if dirty.is_empty() {
            debug!(%run_id, "nothing dirty");
            return Ok(report);
        }

        let revisions: HashMap<ProductId, i64> =
            dirty.iter().map(|e| (e.product_id, e.revision)).collect();
        let ids: Vec<ProductId> = dirty.iter().map(|e| e.product_id).collect();
        let snapshot = CatalogSnapshot::load(self.catalog.as_ref(), scope, &ids).await?;

        // Rows that vanished since invalidation drop out here; the next
        // invalidation marks them deleted.
        let candidates: Vec<ProductRecord> = ids
            .iter()
            .filter_map(|id| snapshot.record(*id).cloned())
            .collect();
        if candidates.len() < ids.len() {
            let vanished: Vec<ProductId> = ids
                .iter()
                .copied()
                .filter(|id| snapshot.record(*id).is_none())
                .collect();
            debug!(%run_id, ?vanished, "dirty products missing from catalog");
        }

        let mut tracker = DedupTracker::new();
        let batches = self
            .builder
            .build(scope, &candidates, &snapshot, &mut tracker)?;
        check_batches(scope, &batches)?;
        report.batches = batches.len();

        // An id carried by several batches is only clean once all of them
        // went through.
        let mut pending: HashMap<ProductId, usize> = HashMap::new();
        for batch in &batches {
            for id in &batch.covered {
                *pending.entry(*id).or_default() += 1;
            }
        }

        for batch in &batches {
            if self.stopping() {
                info!(%run_id, next_batch = batch.ordinal, "stop requested; leaving remaining batches dirty");
                report.stopped = true;
                break;
            }

            let payload = build_upsert_payload(batch);
            if payload.is_empty() {
                debug!(%run_id, batch = batch.ordinal, ids = ?batch.ids(), "no product data to send; skipping call");
                report.empty += 1;
            } else {
                match self.push.submit(&payload, &account).await {
                    Ok(()) => {
                        report.pushed += 1;
                        report.products_sent += payload.len();
                    }
                    Err(err) => {
                        error!(
                            ?err,
                            %run_id,
                            scope_id = scope.id,
                            batch = batch.ordinal,
                            ids = ?batch.ids(),
                            covered = ?batch.covered,
                            "batch push failed; entries stay dirty"
                        );
                        report.failed += 1;
                        report.failed_ids.extend(batch.ids());
                        continue;
                    }
                }
            }

            let targets: Vec<CleanTarget> = batch
                .covered
                .iter()
                .filter_map(|id| {
                    let left = pending.get_mut(id)?;
                    *left -= 1;
                    if *left > 0 {
                        return None;
                    }
                    revisions.get(id).map(|revision| CleanTarget {
                        product_id: *id,
                        revision: *revision,
                    })
                })
                .collect();
            report.cleaned += cache::mark_clean(&self.pool, scope.id, &targets, Utc::now()).await?;
        }

        info!(
            %run_id,
            scope = %scope.code,
            dirty = report.dirty,
            batches = report.batches,
            pushed = report.pushed,
            failed = report.failed,
            cleaned = report.cleaned,
            "scope sync finished"
        );
        Ok(report)
    }
}

fn check_batches(scope: &DestinationScope, batches: &[SyncBatch]) -> Result<(), SyncError> {
    let mut seen = HashSet::new();
    for batch in batches {
        for record in &batch.records {
            if batch.scope_id != scope.id || record.scope_id != scope.id {
                return Err(SyncError::ScopeMismatch {
                    expected: scope.id,
                    found: if batch.scope_id != scope.id {
                        batch.scope_id
                    } else {
                        record.scope_id
                    },
                    batch: batch.ordinal,
                    product_id: record.id,
                });
            }
            if !seen.insert(record.id) {
                return Err(SyncError::DuplicateCanonical {
                    scope_id: scope.id,
                    product_id: record.id,
                });
            }
        }
    }
    Ok(())
}
