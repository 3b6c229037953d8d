//! # Indexing Client Pool
//!
//! Several equivalent indexing endpoints behind one logical client.
//!
//! Each logical call starts at the next endpoint in rotation and, on failure
//! or timeout, moves on to the following one until `max_attempts` is used up.
//! Attempts are sequential so a flaky endpoint never sees duplicated load.
//!
//! The pool implements [`IndexingClient`] itself, so anything written against
//! a single client gets rotation and retries by taking the pool instead.

use crate::metrics;
use crate::subgraph::IndexingClient;
use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IndexingError {
    #[error("all indexing clients failed after {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error("no indexing clients configured")]
    NoClients,
}

pub struct IndexingClientPool<C: ?Sized> {
    clients: Vec<Arc<C>>,
    next: AtomicUsize,
    max_attempts: usize,
    attempt_timeout: Duration,
    retry_delay: Duration,
}

impl<C: ?Sized + Send + Sync> IndexingClientPool<C> {
    pub fn new(clients: Vec<Arc<C>>, max_attempts: usize) -> Self {
        Self {
            clients,
            next: AtomicUsize::new(0),
            max_attempts: max_attempts.max(1),
            attempt_timeout: Duration::from_secs(30),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Fixed pause between a failed attempt and the next one
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Runs `op` against the clients in rotation, up to `max_attempts` times.
    pub async fn call<T, F, Fut>(&self, op: F, max_attempts: usize) -> Result<T, IndexingError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if self.clients.is_empty() {
            return Err(IndexingError::NoClients);
        }
        let attempts = max_attempts.max(1);
        let count = self.clients.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for attempt in 0..attempts {
            let index = (start + attempt) % count;
            let client = Arc::clone(&self.clients[index]);

            match tokio::time::timeout(self.attempt_timeout, op(client)).await {
                Ok(Ok(value)) => {
                    metrics::record_indexing_attempt(true);
                    return Ok(value);
                }
                Ok(Err(e)) => warn!(
                    "Indexing client {} failed (attempt {}/{}): {}",
                    index,
                    attempt + 1,
                    attempts,
                    e
                ),
                Err(_) => warn!(
                    "Indexing client {} timed out after {:?} (attempt {}/{})",
                    index,
                    self.attempt_timeout,
                    attempt + 1,
                    attempts
                ),
            }
            metrics::record_indexing_attempt(false);

            if attempt + 1 < attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        metrics::increment_indexing_exhausted();
        Err(IndexingError::Exhausted { attempts })
    }

    /// `call` with the pool's configured attempt budget.
    pub async fn call_default<T, F, Fut>(&self, op: F) -> Result<T, IndexingError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.call(op, self.max_attempts).await
    }
}

#[async_trait]
impl<C> IndexingClient for IndexingClientPool<C>
where
    C: IndexingClient + ?Sized + 'static,
{
    async fn query(&self, query: &str, variables: Value) -> anyhow::Result<Value> {
        let query = query.to_string();
        let result = self
            .call_default(|client| {
                let query = query.clone();
                let variables = variables.clone();
                async move { client.query(&query, variables).await }
            })
            .await?;
        Ok(result)
    }
}
