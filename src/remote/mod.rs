use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Request timeout for ERP calls. The ERP endpoint is the only slow,
/// network-bound operation in a sync run.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A child record inside a stock group. Each variant carries its own
/// external id, which is the join key against local catalog SKUs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockVariant {
    pub external_id: String,
    pub quantity: i64,
    pub unit: Option<String>,
}

/// A top-level record in the ERP's stock dataset. A group fans out into
/// zero or more variants; quantities live on the variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockGroup {
    pub external_id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub variants: Vec<StockVariant>,
}

/// Remote data client for the ERP inventory API.
///
/// Implementations must be usable from spawned chunk tasks, hence
/// `Send + Sync`. Token refresh and endpoint auth details are the
/// implementation's concern.
#[async_trait]
pub trait StockClient: Send + Sync {
    /// Fetch current stock records for the given external ids.
    async fn fetch_stock(&self, external_ids: &[String]) -> Result<Vec<StockGroup>>;

    /// Fetch one page of the remote product catalog.
    async fn fetch_catalog_page(&self, page: u32, limit: u32) -> Result<Vec<StockGroup>>;
}

/// Flatten the nested group/variant structure into a quantity index keyed
/// by variant external id. Resolved once per chunk so the executor never
/// branches on dataset shape while applying items.
pub fn index_by_external_id(groups: &[StockGroup]) -> HashMap<String, i64> {
    let mut index = HashMap::new();
    for group in groups {
        for variant in &group.variants {
            index.insert(variant.external_id.clone(), variant.quantity);
        }
    }
    index
}

/// HTTP implementation of [`StockClient`].
#[derive(Debug)]
pub struct HttpStockClient {
    http: reqwest::Client,
    base_url: url::Url,
    api_key: Option<String>,
}

impl HttpStockClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid ERP base URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid ERP endpoint path '{path}': {e}")))
    }

    async fn get_groups(&self, url: url::Url) -> Result<Vec<StockGroup>> {
        let mut req = self.http.get(url.clone());
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Error::Remote(format!(
                "{} returned {}",
                url.path(),
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl StockClient for HttpStockClient {
    async fn fetch_stock(&self, external_ids: &[String]) -> Result<Vec<StockGroup>> {
        let mut url = self.endpoint("stock")?;
        url.query_pairs_mut()
            .append_pair("skus", &external_ids.join(","));
        self.get_groups(url).await
    }

    async fn fetch_catalog_page(&self, page: u32, limit: u32) -> Result<Vec<StockGroup>> {
        let mut url = self.endpoint("products")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_groups(url).await
    }
}
