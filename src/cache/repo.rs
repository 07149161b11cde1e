use super::model::{CacheEntry, CleanTarget, InvalidateOutcome, ScopeStats};
use crate::db::{placeholders, Pool, IN_CLAUSE_CHUNK};
use crate::model::{ProductId, ScopeId};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Rows removed per statement when purging logically deleted entries.
pub const PURGE_CHUNK: i64 = 100;

const ENTRY_COLUMNS: &str =
    "id, product_id, scope_id, is_dirty, revision, created_at, updated_at, deleted_at";

/// Fixed-width UTC timestamp so text comparisons in SQL order correctly.
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, sqlx::Error> {
    Ok(CacheEntry {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        scope_id: row.try_get("scope_id")?,
        is_dirty: row.try_get("is_dirty")?,
        revision: row.try_get("revision")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn unique_ids(product_ids: &[ProductId]) -> Vec<ProductId> {
    let mut seen = HashSet::with_capacity(product_ids.len());
    product_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

#[instrument(skip_all)]
pub async fn get_entry(
    pool: &Pool,
    product_id: ProductId,
    scope_id: ScopeId,
) -> Result<Option<CacheEntry>> {
    let sql = format!(
        "SELECT {} FROM product_cache WHERE product_id = ? AND scope_id = ?",
        ENTRY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(product_id)
        .bind(scope_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref()
        .map(entry_from_row)
        .transpose()
        .context("failed to decode cache entry")
}

#[instrument(skip_all)]
pub async fn entries_for(
    pool: &Pool,
    scope_id: ScopeId,
    product_ids: &[ProductId],
) -> Result<Vec<CacheEntry>> {
    let ids = unique_ids(product_ids);
    let mut entries = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CLAUSE_CHUNK) {
        let sql = format!(
            "SELECT {} FROM product_cache WHERE scope_id = ? AND product_id IN ({}) ORDER BY product_id",
            ENTRY_COLUMNS,
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql).bind(scope_id);
        for id in chunk {
            query = query.bind(*id);
        }
        for row in query.fetch_all(pool).await? {
            entries.push(entry_from_row(&row).context("failed to decode cache entry")?);
        }
    }
    Ok(entries)
}

/// Mark existing entries dirty and create the missing ones, clearing any
/// deletion mark. Each touched row gets a new revision.
#[instrument(skip_all, fields(scope_id = scope_id, count = product_ids.len()))]
pub async fn invalidate_or_create(
    pool: &Pool,
    scope_id: ScopeId,
    product_ids: &[ProductId],
    now: DateTime<Utc>,
) -> Result<InvalidateOutcome> {
    let ids = unique_ids(product_ids);
    let now = stamp(now);
    let mut outcome = InvalidateOutcome::default();

    for chunk in ids.chunks(IN_CLAUSE_CHUNK) {
        // The first statement must write: a WAL transaction that reads
        // first cannot be upgraded while another connection writes.
        let mut tx = pool.begin().await?;

        let update = format!(
            "UPDATE product_cache SET is_dirty = 1, revision = revision + 1, updated_at = ?, deleted_at = NULL \
             WHERE scope_id = ? AND product_id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&update).bind(now.as_str()).bind(scope_id);
        for id in chunk {
            query = query.bind(*id);
        }
        outcome.dirtied += query.execute(&mut *tx).await?.rows_affected();

        for id in chunk {
            outcome.created += sqlx::query(
                "INSERT INTO product_cache (product_id, scope_id, is_dirty, revision, created_at, updated_at) \
                 VALUES (?, ?, 1, 1, ?, ?) \
                 ON CONFLICT (product_id, scope_id) DO NOTHING",
            )
            .bind(*id)
            .bind(scope_id)
            .bind(now.as_str())
            .bind(now.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
    }

    debug!(
        scope_id,
        created = outcome.created,
        dirtied = outcome.dirtied,
        "cache entries invalidated"
    );
    Ok(outcome)
}

/// Flag entries whose product vanished from the catalog. Rows are kept until
/// [`purge_deleted`] removes them.
#[instrument(skip_all, fields(scope_id = scope_id, count = product_ids.len()))]
pub async fn mark_deleted(
    pool: &Pool,
    scope_id: ScopeId,
    product_ids: &[ProductId],
    now: DateTime<Utc>,
) -> Result<u64> {
    let ids = unique_ids(product_ids);
    let now = stamp(now);
    let mut affected = 0;
    for chunk in ids.chunks(IN_CLAUSE_CHUNK) {
        let sql = format!(
            "UPDATE product_cache SET deleted_at = ?, updated_at = ? \
             WHERE scope_id = ? AND deleted_at IS NULL AND product_id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql).bind(now.as_str()).bind(now.as_str()).bind(scope_id);
        for id in chunk {
            query = query.bind(*id);
        }
        affected += query.execute(pool).await?.rows_affected();
    }
    Ok(affected)
}

/// Clear the dirty flag of entries that still carry the given revision.
/// Entries invalidated after the revision was read stay dirty.
#[instrument(skip_all, fields(scope_id = scope_id, count = targets.len()))]
pub async fn mark_clean(
    pool: &Pool,
    scope_id: ScopeId,
    targets: &[CleanTarget],
    now: DateTime<Utc>,
) -> Result<u64> {
    if targets.is_empty() {
        return Ok(0);
    }
    let now = stamp(now);
    let mut tx = pool.begin().await?;
    let mut affected = 0;
    for target in targets {
        affected += sqlx::query(
            "UPDATE product_cache SET is_dirty = 0, updated_at = ? \
             WHERE scope_id = ? AND product_id = ? AND revision = ? AND is_dirty = 1",
        )
        .bind(now.as_str())
        .bind(scope_id)
        .bind(target.product_id)
        .bind(target.revision)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(affected)
}

/// Force every live entry of a scope to be pushed again.
#[instrument(skip_all)]
pub async fn mark_all_dirty(pool: &Pool, scope_id: ScopeId, now: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE product_cache SET is_dirty = 1, revision = revision + 1, updated_at = ? \
         WHERE scope_id = ? AND deleted_at IS NULL",
    )
    .bind(stamp(now))
    .bind(scope_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Live dirty entries last touched at or before `before`, oldest first.
#[instrument(skip_all)]
pub async fn dirty_entries_before(
    pool: &Pool,
    scope_id: ScopeId,
    before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<CacheEntry>> {
    let sql = format!(
        "SELECT {} FROM product_cache \
         WHERE scope_id = ? AND is_dirty = 1 AND deleted_at IS NULL AND updated_at <= ? \
         ORDER BY updated_at ASC, id ASC LIMIT ?",
        ENTRY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(scope_id)
        .bind(stamp(before))
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| entry_from_row(row).context("failed to decode cache entry"))
        .collect()
}

#[instrument(skip_all)]
pub async fn count_dirty(pool: &Pool, scope_id: ScopeId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM product_cache WHERE scope_id = ? AND is_dirty = 1 AND deleted_at IS NULL",
    )
    .bind(scope_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn scope_stats(pool: &Pool, scope_id: ScopeId) -> Result<ScopeStats> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS total, \
                COALESCE(SUM(CASE WHEN is_dirty = 1 AND deleted_at IS NULL THEN 1 ELSE 0 END), 0) AS dirty, \
                COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS deleted \
         FROM product_cache WHERE scope_id = ?",
    )
    .bind(scope_id)
    .fetch_one(pool)
    .await?;
    Ok(ScopeStats {
        total: row.try_get("total")?,
        dirty: row.try_get("dirty")?,
        deleted: row.try_get("deleted")?,
    })
}

/// Physically remove entries flagged deleted at or before `older_than`,
/// [`PURGE_CHUNK`] rows at a time.
#[instrument(skip_all)]
pub async fn purge_deleted(
    pool: &Pool,
    scope_id: ScopeId,
    older_than: DateTime<Utc>,
) -> Result<u64> {
    let cutoff = stamp(older_than);
    let mut purged = 0;
    loop {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM product_cache \
             WHERE scope_id = ? AND deleted_at IS NOT NULL AND deleted_at <= ? \
             ORDER BY id LIMIT ?",
        )
        .bind(scope_id)
        .bind(cutoff.as_str())
        .bind(PURGE_CHUNK)
        .fetch_all(pool)
        .await?;
        if ids.is_empty() {
            break;
        }
        let sql = format!(
            "DELETE FROM product_cache WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        purged += query.execute(pool).await?.rows_affected();
        if (ids.len() as i64) < PURGE_CHUNK {
            break;
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_dirty_keeps_single_row() {
        let pool = setup_pool().await;
        let t0 = Utc::now();

        let first = invalidate_or_create(&pool, 1, &[10, 11, 10], t0).await.unwrap();
        assert_eq!(first, InvalidateOutcome { created: 2, dirtied: 0 });

        let second = invalidate_or_create(&pool, 1, &[10], t0 + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(second, InvalidateOutcome { created: 0, dirtied: 1 });

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_cache WHERE product_id = 10")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let entry = get_entry(&pool, 10, 1).await.unwrap().unwrap();
        assert!(entry.is_dirty);
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.created_at, t0_micros(t0));
    }

    fn t0_micros(t: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&stamp(t)).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let pool = setup_pool().await;
        let now = Utc::now();
        invalidate_or_create(&pool, 1, &[5], now).await.unwrap();
        invalidate_or_create(&pool, 2, &[5], now).await.unwrap();

        let entry = get_entry(&pool, 5, 1).await.unwrap().unwrap();
        mark_clean(&pool, 1, &[entry.clean_target()], now).await.unwrap();

        assert!(!get_entry(&pool, 5, 1).await.unwrap().unwrap().is_dirty);
        assert!(get_entry(&pool, 5, 2).await.unwrap().unwrap().is_dirty);
        assert_eq!(count_dirty(&pool, 1).await.unwrap(), 0);
        assert_eq!(count_dirty(&pool, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_revision_is_not_cleaned() {
        let pool = setup_pool().await;
        let now = Utc::now();
        invalidate_or_create(&pool, 1, &[7], now).await.unwrap();
        let read = get_entry(&pool, 7, 1).await.unwrap().unwrap();

        // Invalidated again while a push was in flight.
        invalidate_or_create(&pool, 1, &[7], now).await.unwrap();

        let cleaned = mark_clean(&pool, 1, &[read.clean_target()], now).await.unwrap();
        assert_eq!(cleaned, 0);
        assert!(get_entry(&pool, 7, 1).await.unwrap().unwrap().is_dirty);
    }

    #[tokio::test]
    async fn deleted_entries_leave_sweeps_and_revive_on_invalidate() {
        let pool = setup_pool().await;
        let now = Utc::now();
        invalidate_or_create(&pool, 1, &[1, 2], now).await.unwrap();
        assert_eq!(mark_deleted(&pool, 1, &[2, 99], now).await.unwrap(), 1);

        let dirty = dirty_entries_before(&pool, 1, now, 10).await.unwrap();
        assert_eq!(dirty.iter().map(|e| e.product_id).collect::<Vec<_>>(), vec![1]);

        invalidate_or_create(&pool, 1, &[2], now).await.unwrap();
        let revived = get_entry(&pool, 2, 1).await.unwrap().unwrap();
        assert!(!revived.is_deleted());
        assert!(revived.is_dirty);
    }

    #[tokio::test]
    async fn dirty_sweep_is_oldest_first_and_limited() {
        let pool = setup_pool().await;
        let t0 = Utc::now() - Duration::minutes(10);
        invalidate_or_create(&pool, 1, &[3], t0 + Duration::seconds(2)).await.unwrap();
        invalidate_or_create(&pool, 1, &[1], t0).await.unwrap();
        invalidate_or_create(&pool, 1, &[2], t0 + Duration::seconds(1)).await.unwrap();
        invalidate_or_create(&pool, 1, &[4], t0 + Duration::minutes(20)).await.unwrap();

        let entries = dirty_entries_before(&pool, 1, t0 + Duration::minutes(5), 2)
            .await
            .unwrap();
        assert_eq!(
            entries.iter().map(|e| e.product_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn mark_all_dirty_skips_deleted() {
        let pool = setup_pool().await;
        let now = Utc::now();
        invalidate_or_create(&pool, 1, &[1, 2, 3], now).await.unwrap();
        let entries = entries_for(&pool, 1, &[1, 2, 3]).await.unwrap();
        let targets: Vec<CleanTarget> = entries.iter().map(CacheEntry::clean_target).collect();
        mark_clean(&pool, 1, &targets, now).await.unwrap();
        mark_deleted(&pool, 1, &[3], now).await.unwrap();

        assert_eq!(mark_all_dirty(&pool, 1, now).await.unwrap(), 2);
        let stats = scope_stats(&pool, 1).await.unwrap();
        assert_eq!(stats, ScopeStats { total: 3, dirty: 2, deleted: 1 });
    }

    #[tokio::test]
    async fn purge_removes_only_old_deleted_rows() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let ids: Vec<ProductId> = (1..=250).collect();
        invalidate_or_create(&pool, 1, &ids, now).await.unwrap();
        mark_deleted(&pool, 1, &ids[..230], now - Duration::days(40)).await.unwrap();
        mark_deleted(&pool, 1, &ids[230..240], now).await.unwrap();

        let purged = purge_deleted(&pool, 1, now - Duration::days(30)).await.unwrap();
        assert_eq!(purged, 230);
        let stats = scope_stats(&pool, 1).await.unwrap();
        assert_eq!(stats.total, 20);
        assert_eq!(stats.deleted, 10);
    }
}
