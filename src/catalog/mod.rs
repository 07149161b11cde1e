//! Read-only access to the product catalog.
//!
//! The catalog store is owned elsewhere; this module only defines what the
//! pipeline needs from it and ships a SQLite adapter.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::model::{DestinationScope, ProductId, ProductRecord};
use crate::relations::RelationGraph;

pub mod sqlite;

pub use sqlite::SqliteCatalog;

/// Stored configurable-option linkage between a composite and one variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantLink {
    pub parent_id: ProductId,
    pub child_id: ProductId,
    pub attribute_code: Option<String>,
}

#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Records among `ids` that exist in the catalog for `scope`.
    async fn fetch_by_ids(
        &self,
        ids: &[ProductId],
        scope: &DestinationScope,
    ) -> Result<Vec<ProductRecord>>;

    /// Every enabled and visible record of `scope`.
    async fn fetch_all_visible(&self, scope: &DestinationScope) -> Result<Vec<ProductRecord>>;

    /// Links where any of `ids` is the parent or the child.
    async fn variant_links(&self, ids: &[ProductId]) -> Result<Vec<VariantLink>>;
}

/// Records and linkage needed to build batches for one scope, loaded once so
/// batch building itself does no I/O.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub records: HashMap<ProductId, ProductRecord>,
    pub graph: RelationGraph,
}

impl CatalogSnapshot {
    pub fn new<I>(records: I, graph: RelationGraph) -> Self
    where
        I: IntoIterator<Item = ProductRecord>,
    {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            graph,
        }
    }

    pub fn record(&self, id: ProductId) -> Option<&ProductRecord> {
        self.records.get(&id)
    }

    /// Load `ids`, their linkage, and the parent/child records the linkage
    /// points at. Ids missing from the catalog are simply absent.
    #[instrument(skip_all, fields(scope_id = scope.id, count = ids.len()))]
    pub async fn load(
        catalog: &dyn CatalogReader,
        scope: &DestinationScope,
        ids: &[ProductId],
    ) -> Result<Self> {
        let mut records: HashMap<ProductId, ProductRecord> = catalog
            .fetch_by_ids(ids, scope)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let found: Vec<ProductId> = records.keys().copied().collect();
        let mut graph = RelationGraph::from_links(catalog.variant_links(&found).await?);

        // Parents reached through variants need their own records and their
        // full child lists.
        let parents: Vec<ProductId> = graph
            .all_parent_ids()
            .into_iter()
            .filter(|id| !records.contains_key(id))
            .collect();
        if !parents.is_empty() {
            graph.extend(catalog.variant_links(&parents).await?);
            for record in catalog.fetch_by_ids(&parents, scope).await? {
                records.insert(record.id, record);
            }
        }

        Ok(Self { records, graph })
    }
}
