use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::Account;

pub mod payload;

pub use payload::{build_product, build_upsert_payload, ProductPayload, UpsertPayload};

const UPSERT_PATH: &str = "v1/products/upsert";

/// Outbound side of the pipeline: one call per batch.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn submit(&self, payload: &UpsertPayload, account: &Account) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpPushClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpPushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPushClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpPushClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.index.base_url).context("invalid index.base_url")?;
        Self::new(
            base_url,
            Duration::from_secs(cfg.index.request_timeout_seconds),
        )
    }

    pub fn build_request(
        &self,
        payload: &UpsertPayload,
        account: &Account,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(UPSERT_PATH)
            .context("invalid index base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", account.api_token))
            .header("Content-Type", "application/json")
            .json(payload)
            .build()
            .context("failed to build upsert request")
    }
}

#[async_trait]
impl PushClient for HttpPushClient {
    async fn submit(&self, payload: &UpsertPayload, account: &Account) -> Result<()> {
        let request = self.build_request(payload, account)?;
        debug!(url = %request.url(), account = %account.name, products = payload.len(), "sending upsert");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach index")?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(account = %account.name, "rate limited by index: {}", body);
            return Err(anyhow!("received 429 from index: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("index error {}: {}", status, body));
        }

        info!(account = %account.name, products = payload.len(), "upsert accepted");
        Ok(())
    }
}
