//! Reacts to catalog changes by flagging cache entries for resync.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::cache::{self, InvalidateOutcome};
use crate::catalog::CatalogReader;
use crate::db::Pool;
use crate::model::{DestinationScope, ExecutionContext, ProductId, ScopeId};
use crate::scope::ScopeResolver;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub scopes: usize,
    pub created: u64,
    pub dirtied: u64,
    pub deleted: u64,
    pub failed_scopes: Vec<ScopeId>,
    /// Full reindex was suppressed by the execution context.
    pub skipped: bool,
}

impl InvalidationReport {
    fn absorb(&mut self, outcome: InvalidateOutcome, deleted: u64) {
        self.created += outcome.created;
        self.dirtied += outcome.dirtied;
        self.deleted += deleted;
    }
}

#[derive(Clone)]
pub struct Invalidator {
    pool: Pool,
    catalog: Arc<dyn CatalogReader>,
    scopes: Arc<dyn ScopeResolver>,
}

impl Invalidator {
    pub fn new(pool: Pool, catalog: Arc<dyn CatalogReader>, scopes: Arc<dyn ScopeResolver>) -> Self {
        Self {
            pool,
            catalog,
            scopes,
        }
    }

    /// Flag `ids` dirty in every scope with an account. Ids the catalog no
    /// longer returns for a scope are marked deleted there.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub async fn invalidate(&self, ids: &[ProductId]) -> InvalidationReport {
        let ids: Vec<ProductId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut report = InvalidationReport::default();
        if ids.is_empty() {
            return report;
        }

        for scope in self.scopes.active_scopes_with_account() {
            report.scopes += 1;
            match self.invalidate_in_scope(&scope, &ids).await {
                Ok((outcome, deleted)) => report.absorb(outcome, deleted),
                Err(err) => {
                    error!(?err, scope_id = scope.id, "invalidation failed for scope");
                    report.failed_scopes.push(scope.id);
                }
            }
        }

        info!(
            requested = ids.len(),
            created = report.created,
            dirtied = report.dirtied,
            deleted = report.deleted,
            failed = report.failed_scopes.len(),
            "products invalidated"
        );
        report
    }

    pub async fn invalidate_one(&self, id: ProductId) -> InvalidationReport {
        self.invalidate(&[id]).await
    }

    /// Flag the whole enabled and visible catalog of every scope. Does nothing
    /// while schema setup or upgrade is running.
    #[instrument(skip_all)]
    pub async fn invalidate_all(&self, ctx: ExecutionContext) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        if !ctx.allows_full_reindex() {
            info!("full invalidation skipped during setup/upgrade");
            report.skipped = true;
            return report;
        }

        for scope in self.scopes.active_scopes_with_account() {
            report.scopes += 1;
            match self.invalidate_full_scope(&scope).await {
                Ok(outcome) => report.absorb(outcome, 0),
                Err(err) => {
                    error!(?err, scope_id = scope.id, "full invalidation failed for scope");
                    report.failed_scopes.push(scope.id);
                }
            }
        }

        info!(
            created = report.created,
            dirtied = report.dirtied,
            failed = report.failed_scopes.len(),
            "catalog fully invalidated"
        );
        report
    }

    async fn invalidate_in_scope(
        &self,
        scope: &DestinationScope,
        ids: &[ProductId],
    ) -> Result<(InvalidateOutcome, u64)> {
        let existing: BTreeSet<ProductId> = self
            .catalog
            .fetch_by_ids(ids, scope)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let now = Utc::now();
        let present: Vec<ProductId> = existing.iter().copied().collect();
        let outcome = cache::invalidate_or_create(&self.pool, scope.id, &present, now).await?;

        // A deleted catalog row cannot be fetched, so the shortfall is the
        // only signal that it disappeared.
        let mut deleted = 0;
        if ids.len() > existing.len() {
            let missing: Vec<ProductId> = ids
                .iter()
                .copied()
                .filter(|id| !existing.contains(id))
                .collect();
            deleted = cache::mark_deleted(&self.pool, scope.id, &missing, now).await?;
            if deleted > 0 {
                warn!(scope_id = scope.id, ?missing, deleted, "products gone from catalog");
            }
        }
        Ok((outcome, deleted))
    }

    async fn invalidate_full_scope(&self, scope: &DestinationScope) -> Result<InvalidateOutcome> {
        let ids: Vec<ProductId> = self
            .catalog
            .fetch_all_visible(scope)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        cache::invalidate_or_create(&self.pool, scope.id, &ids, Utc::now()).await
    }
}
