//! # Subgraph
//!
//! GraphQL indexing-service boundary and the pool catalog query.

use crate::pool_types::{PoolDescriptor, PoolType, TokenInfo};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Default page size for `id_gt` pagination.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One GraphQL endpoint.
#[async_trait]
pub trait IndexingClient: Send + Sync {
    /// Runs `query` and returns its `data` object.
    async fn query(&self, query: &str, variables: Value) -> Result<Value>;
}

/// `IndexingClient` over HTTP.
pub struct HttpIndexingClient {
    client: reqwest::Client,
    url: Url,
}

impl HttpIndexingClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid subgraph URL {}", url))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[async_trait]
impl IndexingClient for HttpIndexingClient {
    async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request to {} failed: {}", self.url, e))?;

        if !response.status().is_success() {
            if response.status() == 429 {
                return Err(anyhow!("Rate limited (429) by {}", self.url));
            }
            return Err(anyhow!("HTTP error {} from {}", response.status(), self.url));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("JSON parse failed: {}", e))?;
        if let Some(error) = body.errors.first() {
            return Err(anyhow!(
                "GraphQL error from {}: {} ({} errors)",
                self.url,
                error.message,
                body.errors.len()
            ));
        }
        body.data
            .ok_or_else(|| anyhow!("GraphQL response from {} has no data", self.url))
    }
}

pub const POOLS_QUERY: &str = r#"
query Pools($first: Int!, $lastId: String!) {
  pools(first: $first, where: { id_gt: $lastId }, orderBy: id, orderDirection: asc) {
    id
    address
    poolType
    poolTypeVersion
    tokens {
      address
      decimals
    }
  }
}
"#;

#[derive(Deserialize)]
struct PoolsPage {
    pools: Vec<SubgraphPool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphPool {
    id: String,
    address: Address,
    pool_type: Option<String>,
    pool_type_version: Option<u32>,
    #[serde(default)]
    tokens: Vec<SubgraphToken>,
}

#[derive(Deserialize)]
struct SubgraphToken {
    address: Address,
    decimals: u8,
}

impl SubgraphPool {
    fn into_descriptor(self) -> Option<PoolDescriptor> {
        let pool_type = match self.pool_type.as_deref().map(str::parse::<PoolType>) {
            Some(Ok(pool_type)) => pool_type,
            Some(Err(e)) => {
                debug!("Skipping pool {}: {}", self.id, e);
                return None;
            }
            None => {
                debug!("Skipping pool {} without poolType", self.id);
                return None;
            }
        };
        Some(PoolDescriptor {
            id: self.id.to_lowercase(),
            address: self.address,
            pool_type,
            version: self.pool_type_version.unwrap_or(1),
            tokens: self
                .tokens
                .into_iter()
                .map(|t| TokenInfo {
                    address: t.address,
                    decimals: t.decimals,
                })
                .collect(),
        })
    }
}

/// Pages through every pool the indexing service knows, ordered by id.
/// Pools of unsupported types are skipped.
pub async fn fetch_pool_catalog<C>(client: &C, page_size: usize) -> Result<Vec<PoolDescriptor>>
where
    C: IndexingClient + ?Sized,
{
    let page_size = page_size.max(1);
    let mut last_id = String::new();
    let mut pools = Vec::new();
    let mut pages = 0usize;

    loop {
        let data = client
            .query(POOLS_QUERY, json!({ "first": page_size, "lastId": last_id }))
            .await?;
        let page: PoolsPage =
            serde_json::from_value(data).context("Unexpected pools page shape")?;
        pages += 1;

        let fetched = page.pools.len();
        if let Some(last) = page.pools.last() {
            last_id = last.id.clone();
        }
        pools.extend(page.pools.into_iter().filter_map(SubgraphPool::into_descriptor));

        if fetched < page_size {
            break;
        }
    }

    info!(
        "Fetched {} supported pools from the indexing service in {} pages",
        pools.len(),
        pages
    );
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves `pools` through `id_gt` pagination and records every request.
    struct PagedIndexer {
        pools: Vec<Value>,
        requests: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl IndexingClient for PagedIndexer {
        async fn query(&self, _query: &str, variables: Value) -> Result<Value> {
            self.requests.lock().unwrap().push(variables.clone());
            let first = variables["first"].as_u64().unwrap() as usize;
            let last_id = variables["lastId"].as_str().unwrap().to_string();
            let page: Vec<Value> = self
                .pools
                .iter()
                .filter(|p| p["id"].as_str().unwrap() > last_id.as_str())
                .take(first)
                .cloned()
                .collect();
            Ok(json!({ "pools": page }))
        }
    }

    fn subgraph_pool(n: u64, pool_type: &str) -> Value {
        json!({
            "id": format!("0x{:064x}", n),
            "address": format!("0x{:040x}", n),
            "poolType": pool_type,
            "poolTypeVersion": 2,
            "tokens": [
                { "address": "0x6b175474e89094c44da98b954eedeac495271d0f", "decimals": 18 },
                { "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "decimals": 6 }
            ]
        })
    }

    #[tokio::test]
    async fn test_fetch_pool_catalog_paginates_by_id() {
        let indexer = PagedIndexer {
            pools: vec![
                subgraph_pool(1, "Weighted"),
                subgraph_pool(2, "ComposableStable"),
                subgraph_pool(3, "Managed"),
                subgraph_pool(4, "AaveLinear"),
                subgraph_pool(5, "GyroE"),
            ],
            requests: Mutex::new(Vec::new()),
        };

        let pools = fetch_pool_catalog(&indexer, 2).await.unwrap();

        let types: Vec<PoolType> = pools.iter().map(|p| p.pool_type).collect();
        assert_eq!(
            types,
            vec![
                PoolType::Weighted,
                PoolType::ComposableStable,
                PoolType::Linear,
                PoolType::GyroE
            ]
        );
        assert_eq!(pools[0].version, 2);
        assert_eq!(pools[0].tokens[1].decimals, 6);

        let requests = indexer.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0]["lastId"], "");
        assert_eq!(requests[1]["lastId"], format!("0x{:064x}", 2));
        assert_eq!(requests[2]["lastId"], format!("0x{:064x}", 4));
    }

    #[test]
    fn test_http_client_rejects_bad_url() {
        assert!(HttpIndexingClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
