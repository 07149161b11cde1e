use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

use catalog_sync::cache;
use catalog_sync::catalog::SqliteCatalog;
use catalog_sync::config;
use catalog_sync::db::Pool;
use catalog_sync::model::{Account, DestinationScope, ProductId};
use catalog_sync::push::{PushClient, UpsertPayload};
use catalog_sync::scope::ConfigScopes;
use catalog_sync::sync::{SkipReason, SyncOptions, SyncService};

async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn insert_product(pool: &Pool, id: ProductId, kind: &str, enabled: bool) {
    sqlx::query(
        "INSERT INTO catalog_products (id, sku, name, kind, enabled, visible, price) VALUES (?, ?, ?, ?, ?, 1, 19.99)",
    )
    .bind(id)
    .bind(format!("SKU-{id}"))
    .bind(format!("Product {id}"))
    .bind(kind)
    .bind(enabled)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO catalog_product_scopes (product_id, scope_id) VALUES (?, 1)")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

async fn link(pool: &Pool, parent: ProductId, child: ProductId, attribute: &str) {
    sqlx::query(
        "INSERT INTO catalog_variant_links (parent_id, child_id, attribute_code) VALUES (?, ?, ?)",
    )
    .bind(parent)
    .bind(child)
    .bind(attribute)
    .execute(pool)
    .await
    .unwrap();
}

async fn dirty(pool: &Pool, ids: &[ProductId]) {
    cache::invalidate_or_create(pool, 1, ids, Utc::now())
        .await
        .unwrap();
}

async fn is_dirty(pool: &Pool, id: ProductId) -> bool {
    cache::get_entry(pool, id, 1)
        .await
        .unwrap()
        .map(|e| e.is_dirty)
        .unwrap_or(false)
}

fn scope() -> DestinationScope {
    DestinationScope {
        id: 1,
        code: "default".into(),
    }
}

fn scope_cfg(with_account: bool, sync_enabled: bool) -> config::Scope {
    config::Scope {
        id: 1,
        code: "default".into(),
        sync_enabled,
        account: with_account.then(|| Account {
            name: "main-store".into(),
            api_token: "secret".into(),
        }),
    }
}

#[derive(Clone, Default)]
struct RecordingPush {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    /// Products re-invalidated while their batch is in flight.
    touch_during_push: Option<(Pool, Vec<ProductId>)>,
}

impl RecordingPush {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().await.clone()
    }

    async fn batch_sizes(&self) -> Vec<usize> {
        self.calls().await.iter().map(|(_, ids)| ids.len()).collect()
    }
}

#[async_trait::async_trait]
impl PushClient for RecordingPush {
    async fn submit(&self, payload: &UpsertPayload, account: &Account) -> Result<()> {
        self.calls.lock().await.push((
            account.name.clone(),
            payload
                .products
                .iter()
                .map(|p| p.product_id.clone())
                .collect(),
        ));
        if let Some((pool, ids)) = &self.touch_during_push {
            cache::invalidate_or_create(pool, 1, ids, Utc::now()).await?;
        }
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or(Ok(()))
    }
}

fn service(pool: &Pool, push: &RecordingPush, scope: config::Scope) -> SyncService {
    SyncService::new(
        pool.clone(),
        Arc::new(SqliteCatalog::new(pool.clone())),
        Arc::new(ConfigScopes::new(vec![scope])),
        Arc::new(push.clone()),
        SyncOptions::default(),
    )
}

#[tokio::test]
async fn variant_is_pushed_through_its_parent() {
    let pool = setup_pool().await;
    insert_product(&pool, 500, "configurable", true).await;
    insert_product(&pool, 501, "variant", true).await;
    link(&pool, 500, 501, "color").await;
    dirty(&pool, &[501]).await;

    let push = RecordingPush::default();
    let report = service(&pool, &push, scope_cfg(true, true))
        .run(&scope())
        .await
        .unwrap();

    assert_eq!(report.batches, 1);
    assert_eq!(report.cleaned, 1);
    assert_eq!(
        push.calls().await,
        vec![("main-store".to_string(), vec!["500".to_string()])]
    );
    assert!(!is_dirty(&pool, 501).await);
    assert!(cache::get_entry(&pool, 500, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn siblings_share_one_parent_push() {
    let pool = setup_pool().await;
    insert_product(&pool, 500, "configurable", true).await;
    for child in [501, 502, 503] {
        insert_product(&pool, child, "variant", true).await;
        link(&pool, 500, child, "size").await;
    }
    dirty(&pool, &[501, 502, 503, 500]).await;

    let push = RecordingPush::default();
    let report = service(&pool, &push, scope_cfg(true, true))
        .run(&scope())
        .await
        .unwrap();

    assert_eq!(report.batches, 1);
    assert_eq!(report.products_sent, 1);
    assert_eq!(report.cleaned, 4);
    assert_eq!(cache::count_dirty(&pool, 1).await.unwrap(), 0);
}

#[tokio::test]
async fn nine_products_go_out_in_three_batches() {
    let pool = setup_pool().await;
    let ids: Vec<ProductId> = (1..=9).collect();
    for id in &ids {
        insert_product(&pool, *id, "simple", true).await;
    }
    dirty(&pool, &ids).await;

    let push = RecordingPush::default();
    let report = service(&pool, &push, scope_cfg(true, true))
        .run(&scope())
        .await
        .unwrap();

    assert_eq!(push.batch_sizes().await, vec![4, 4, 1]);
    assert_eq!(report.pushed, 3);
    assert_eq!(report.products_sent, 9);
    assert_eq!(report.cleaned, 9);
    assert_eq!(cache::count_dirty(&pool, 1).await.unwrap(), 0);
}

#[tokio::test]
async fn failed_batch_stays_dirty_and_is_retried() {
    let pool = setup_pool().await;
    let ids: Vec<ProductId> = (1..=9).collect();
    for id in &ids {
        insert_product(&pool, *id, "simple", true).await;
    }
    dirty(&pool, &ids).await;

    let push = RecordingPush::with_responses(vec![Ok(()), Err(anyhow!("503 from index")), Ok(())]);
    let svc = service(&pool, &push, scope_cfg(true, true));
    let report = svc.run(&scope()).await.unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!((report.pushed, report.failed), (2, 1));
    assert_eq!(report.failed_ids, vec![5, 6, 7, 8]);
    for id in 1..=9 {
        assert_eq!(is_dirty(&pool, id).await, (5..=8).contains(&id), "product {id}");
    }

    let retry = svc.run(&scope()).await.unwrap();
    assert_eq!(retry.dirty, 4);
    assert_eq!(retry.cleaned, 4);
    assert_eq!(push.batch_sizes().await, vec![4, 4, 1, 4]);
    assert_eq!(cache::count_dirty(&pool, 1).await.unwrap(), 0);
}

#[tokio::test]
async fn scope_without_account_or_sync_is_skipped() {
    let pool = setup_pool().await;
    insert_product(&pool, 1, "simple", true).await;
    dirty(&pool, &[1]).await;
    let push = RecordingPush::default();

    let no_account = service(&pool, &push, scope_cfg(false, true))
        .run(&scope())
        .await
        .unwrap();
    assert_eq!(no_account.skipped, Some(SkipReason::NoAccount));

    let disabled = service(&pool, &push, scope_cfg(true, false))
        .run(&scope())
        .await
        .unwrap();
    assert_eq!(disabled.skipped, Some(SkipReason::SyncDisabled));

    assert!(push.calls().await.is_empty());
    assert!(is_dirty(&pool, 1).await);
}

#[tokio::test]
async fn batch_without_sendable_products_makes_no_call() {
    let pool = setup_pool().await;
    insert_product(&pool, 1, "simple", false).await;
    dirty(&pool, &[1]).await;

    let push = RecordingPush::default();
    let report = service(&pool, &push, scope_cfg(true, true))
        .run(&scope())
        .await
        .unwrap();

    assert_eq!(report.empty, 1);
    assert_eq!(report.pushed, 0);
    assert!(push.calls().await.is_empty());
    assert!(!is_dirty(&pool, 1).await);
}

#[tokio::test]
async fn change_during_push_keeps_entry_dirty() {
    let pool = setup_pool().await;
    insert_product(&pool, 1, "simple", true).await;
    insert_product(&pool, 2, "simple", true).await;
    dirty(&pool, &[1, 2]).await;

    let push = RecordingPush {
        touch_during_push: Some((pool.clone(), vec![2])),
        ..Default::default()
    };
    let report = service(&pool, &push, scope_cfg(true, true))
        .run(&scope())
        .await
        .unwrap();

    assert_eq!(report.pushed, 1);
    assert_eq!(report.cleaned, 1);
    assert!(!is_dirty(&pool, 1).await);
    assert!(is_dirty(&pool, 2).await);
}

#[tokio::test]
async fn stop_request_leaves_work_for_next_run() {
    let pool = setup_pool().await;
    insert_product(&pool, 1, "simple", true).await;
    dirty(&pool, &[1]).await;

    let push = RecordingPush::default();
    let svc = service(&pool, &push, scope_cfg(true, true));
    svc.stop_handle().store(true, Ordering::Relaxed);

    let report = svc.run(&scope()).await.unwrap();
    assert!(report.stopped);
    assert!(push.calls().await.is_empty());
    assert!(is_dirty(&pool, 1).await);
}

#[tokio::test]
async fn run_all_visits_each_account_scope() {
    let pool = setup_pool().await;
    insert_product(&pool, 1, "simple", true).await;
    dirty(&pool, &[1]).await;

    let push = RecordingPush::default();
    let reports = service(&pool, &push, scope_cfg(true, true))
        .run_all()
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].scope_id, 1);
    assert_eq!(reports[0].cleaned, 1);
}
