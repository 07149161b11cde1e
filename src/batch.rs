//! Turns candidate products into bounded, deduplicated batches for one scope.
//!
//! Variants are replaced by their composite parents, composites claim their
//! variants, and every canonical product lands in exactly one batch. Nothing
//! here touches the network or the cache store.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::catalog::CatalogSnapshot;
use crate::dedup::DedupTracker;
use crate::error::SyncError;
use crate::model::{DestinationScope, ProductId, ProductKind, ProductRecord, ScopeId};
use crate::relations::ParentResolution;

pub const DEFAULT_BATCH_SIZE: usize = 4;

/// One outbound upsert for one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    pub scope_id: ScopeId,
    pub ordinal: usize,
    /// Canonical products, in input order.
    pub records: Vec<ProductRecord>,
    /// Candidate ids whose changes this batch carries, canonical ids included.
    pub covered: BTreeSet<ProductId>,
}

impl SyncBatch {
    fn new(scope_id: ScopeId, ordinal: usize) -> Self {
        Self {
            scope_id,
            ordinal,
            records: Vec::new(),
            covered: BTreeSet::new(),
        }
    }

    pub fn ids(&self) -> Vec<ProductId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Products that represent `record` in the index.
fn canonical_records<'a>(
    record: &'a ProductRecord,
    snapshot: &'a CatalogSnapshot,
) -> Vec<&'a ProductRecord> {
    match record.kind {
        ProductKind::Simple | ProductKind::Composite(_) => vec![record],
        ProductKind::Variant => variant_canonicals(record, snapshot),
    }
}

fn variant_canonicals<'a>(
    record: &'a ProductRecord,
    snapshot: &'a CatalogSnapshot,
) -> Vec<&'a ProductRecord> {
    match snapshot.graph.resolve_parents(record.id) {
        ParentResolution::Standalone => vec![record],
        ParentResolution::Ambiguous(candidates) => {
            warn!(
                product_id = record.id,
                scope_id = record.scope_id,
                ?candidates,
                "variant has several parents without option context; pushing it as standalone"
            );
            vec![record]
        }
        ParentResolution::Parents(ids) => {
            let parents: Vec<&ProductRecord> =
                ids.iter().filter_map(|id| snapshot.record(*id)).collect();
            if parents.is_empty() {
                debug!(
                    product_id = record.id,
                    ?ids,
                    "parents not in catalog for this scope; pushing variant itself"
                );
                vec![record]
            } else {
                parents
            }
        }
    }
}

/// Variants a canonical product claims once queued.
fn folded_children(record: &ProductRecord, snapshot: &CatalogSnapshot) -> BTreeSet<ProductId> {
    if record.kind.is_composite() {
        snapshot.graph.children_of(record.id)
    } else {
        BTreeSet::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    max_size: usize,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchBuilder {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Build the batches for `scope` from `candidates`.
    ///
    /// `tracker` belongs to the current run; ids it already knows are not
    /// queued again but are credited to the batch holding their canonical id.
    pub fn build(
        &self,
        scope: &DestinationScope,
        candidates: &[ProductRecord],
        snapshot: &CatalogSnapshot,
        tracker: &mut DedupTracker,
    ) -> Result<Vec<SyncBatch>, SyncError> {
        let mut batches: Vec<SyncBatch> = Vec::new();
        let mut batch_of: HashMap<ProductId, usize> = HashMap::new();

        for record in candidates {
            if record.scope_id != scope.id {
                return Err(SyncError::ScopeMismatch {
                    expected: scope.id,
                    found: record.scope_id,
                    batch: batches.len(),
                    product_id: record.id,
                });
            }

            if tracker.is_processed(record.id) {
                credit(&mut batches, &batch_of, tracker, record.id, record.id);
                continue;
            }

            for canonical in canonical_records(record, snapshot) {
                if tracker.is_processed(canonical.id) {
                    // Already queued through a sibling variant.
                    tracker.mark_processed(record.id, canonical.id);
                    credit(&mut batches, &batch_of, tracker, record.id, canonical.id);
                    continue;
                }

                tracker.mark_processed(canonical.id, canonical.id);
                tracker.mark_processed(record.id, canonical.id);
                for child in folded_children(canonical, snapshot) {
                    tracker.mark_processed(child, canonical.id);
                }

                if batches
                    .last()
                    .map_or(true, |batch| batch.len() >= self.max_size)
                {
                    batches.push(SyncBatch::new(scope.id, batches.len()));
                }
                let index = batches.len() - 1;
                let batch = &mut batches[index];
                batch.records.push(canonical.clone());
                batch.covered.insert(canonical.id);
                batch.covered.insert(record.id);
                batch_of.insert(canonical.id, index);
            }
        }

        Ok(batches)
    }
}

/// Attribute `id` to the batch that carries `via` (or `via`'s canonical id).
fn credit(
    batches: &mut [SyncBatch],
    batch_of: &HashMap<ProductId, usize>,
    tracker: &DedupTracker,
    id: ProductId,
    via: ProductId,
) {
    let index = batch_of.get(&via).or_else(|| {
        tracker
            .canonical_of(via)
            .and_then(|canonical| batch_of.get(&canonical))
    });
    if let Some(&index) = index {
        batches[index].covered.insert(id);
    }
}
