use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{instrument, warn};

use super::{CatalogReader, VariantLink};
use crate::db::{placeholders, Pool, IN_CLAUSE_CHUNK};
use crate::model::{DestinationScope, ProductId, ProductKind, ProductRecord, ScopeId};

const RECORD_SELECT: &str = "SELECT p.id, p.sku, p.name, p.kind, p.enabled, p.visible, p.price, s.scope_id \
     FROM catalog_products p \
     JOIN catalog_product_scopes s ON s.product_id = p.id";

/// Catalog adapter over the `catalog_*` tables.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: Pool,
}

impl SqliteCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &SqliteRow) -> Result<Option<ProductRecord>> {
    let id: ProductId = row.try_get("id")?;
    let kind_raw: String = row.try_get("kind")?;
    let Some(kind) = ProductKind::parse_kind(&kind_raw) else {
        warn!(product_id = id, kind = %kind_raw, "skipping product with unknown type");
        return Ok(None);
    };
    let scope_id: ScopeId = row.try_get("scope_id")?;
    Ok(Some(ProductRecord {
        id,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        kind,
        enabled: row.try_get("enabled")?,
        visible: row.try_get("visible")?,
        price: row.try_get("price")?,
        scope_id,
    }))
}

#[async_trait]
impl CatalogReader for SqliteCatalog {
    #[instrument(skip_all, fields(scope_id = scope.id, count = ids.len()))]
    async fn fetch_by_ids(
        &self,
        ids: &[ProductId],
        scope: &DestinationScope,
    ) -> Result<Vec<ProductRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(IN_CLAUSE_CHUNK) {
            let sql = format!(
                "{} WHERE s.scope_id = ? AND p.id IN ({}) ORDER BY p.id",
                RECORD_SELECT,
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql).bind(scope.id);
            for id in chunk {
                query = query.bind(*id);
            }
            for row in query.fetch_all(&self.pool).await? {
                if let Some(record) = record_from_row(&row)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    #[instrument(skip_all, fields(scope_id = scope.id))]
    async fn fetch_all_visible(&self, scope: &DestinationScope) -> Result<Vec<ProductRecord>> {
        let sql = format!(
            "{} WHERE s.scope_id = ? AND p.enabled = 1 AND p.visible = 1 ORDER BY p.id",
            RECORD_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(scope.id)
            .fetch_all(&self.pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(record) = record_from_row(row)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn variant_links(&self, ids: &[ProductId]) -> Result<Vec<VariantLink>> {
        let mut links = Vec::new();
        for chunk in ids.chunks(IN_CLAUSE_CHUNK) {
            let marks = placeholders(chunk.len());
            let sql = format!(
                "SELECT parent_id, child_id, attribute_code FROM catalog_variant_links \
                 WHERE parent_id IN ({marks}) OR child_id IN ({marks}) \
                 ORDER BY parent_id, child_id"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk.iter().chain(chunk.iter()) {
                query = query.bind(*id);
            }
            for row in query.fetch_all(&self.pool).await? {
                links.push(VariantLink {
                    parent_id: row.try_get("parent_id")?,
                    child_id: row.try_get("child_id")?,
                    attribute_code: row.try_get("attribute_code")?,
                });
            }
        }
        Ok(links)
    }
}
