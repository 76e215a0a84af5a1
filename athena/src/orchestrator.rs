//! Query submission, polling and result caching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, WeakShared};
use moka::future::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, warn};

use crate::client::{AthenaApi, QueryState};

const CACHE_MAX_ENTRIES: u64 = 256;

/// A decoded result set: data rows only, header stripped.
pub type Rows = Arc<Vec<Vec<String>>>;

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("query failed: {0}")]
    Failed(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("query engine failure: {0}")]
    Backend(String),
}

/// A statement eligible for startup cache hydration.
#[derive(Debug, Clone)]
pub struct WarmupStatement {
    pub sql: String,
    pub ttl: Duration,
}

#[derive(Clone)]
struct CachedQuery {
    rows: Rows,
    completed: DateTime<Utc>,
    ttl: Duration,
}

impl CachedQuery {
    fn is_valid(&self) -> bool {
        (Utc::now() - self.completed)
            .to_std()
            .map(|age| age <= self.ttl)
            .unwrap_or(false)
    }
}

/// Per-entry TTL, counted from query completion so that warmup-hydrated
/// entries expire on the same schedule as locally computed ones.
struct CacheExpiry;

impl Expiry<String, CachedQuery> for CacheExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedQuery,
        _created_at: Instant,
    ) -> Option<Duration> {
        let age = (Utc::now() - value.completed).to_std().unwrap_or_default();
        Some(value.ttl.saturating_sub(age))
    }
}

type QueryFuture = BoxFuture<'static, Result<Rows, QueryError>>;

struct Inner {
    client: Arc<dyn AthenaApi>,
    cache: Cache<String, CachedQuery>,
    inflight: Mutex<HashMap<String, WeakShared<QueryFuture>>>,
}

/// Runs SQL against Athena and hands out decoded result rows.
///
/// Identical statements are keyed by the hash of their text: completed
/// results replay from the cache while their TTL lasts, and statements
/// already executing are joined instead of submitted again.
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

fn fingerprint(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

impl QueryOrchestrator {
    pub fn new(client: Arc<dyn AthenaApi>) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_MAX_ENTRIES)
            .expire_after(CacheExpiry)
            .build();
        Self {
            inner: Arc::new(Inner {
                client,
                cache,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runs `sql` and returns its data rows. With a nonzero `ttl` the
    /// result is served from and stored into the cache.
    pub async fn run_query(&self, sql: &str, ttl: Duration) -> Result<Rows, QueryError> {
        let fingerprint = fingerprint(sql);
        if !ttl.is_zero() {
            if let Some(entry) = self.inner.cache.get(&fingerprint).await {
                if entry.is_valid() {
                    debug!("query {fingerprint} served from cache");
                    return Ok(entry.rows);
                }
            }
        }

        let shared = {
            let mut inflight = self.inner.inflight.lock().expect("inflight lock");
            match inflight.get(&fingerprint).and_then(WeakShared::upgrade) {
                Some(existing) => {
                    debug!("joining in-flight query {fingerprint}");
                    existing
                }
                None => {
                    let inner = self.inner.clone();
                    let sql = sql.to_string();
                    let key = fingerprint.clone();
                    let future = async move {
                        let result = execute_query(inner.client.clone(), &sql).await;
                        inner.inflight.lock().expect("inflight lock").remove(&key);
                        if let Ok(rows) = &result {
                            if !ttl.is_zero() {
                                inner
                                    .cache
                                    .insert(
                                        key.clone(),
                                        CachedQuery {
                                            rows: rows.clone(),
                                            completed: Utc::now(),
                                            ttl,
                                        },
                                    )
                                    .await;
                            }
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = future.downgrade() {
                        inflight.insert(fingerprint.clone(), weak);
                    }
                    future
                }
            }
        };
        shared.await
    }

    /// Hydrates the cache from recent completed executions whose text
    /// matches one of `statements`. Best effort; failures only log.
    pub async fn warm_cache(&self, statements: &[WarmupStatement]) {
        let executions = match self.inner.client.list_recent_executions().await {
            Ok(executions) => executions,
            Err(e) => {
                warn!("cache warmup skipped: {e:#}");
                return;
            }
        };
        for execution in executions {
            let Some(statement) = statements.iter().find(|s| s.sql == execution.query) else {
                continue;
            };
            if execution.status.state != QueryState::Succeeded {
                continue;
            }
            let Some(completed) = execution.status.completion_time else {
                continue;
            };
            let age = (Utc::now() - completed).to_std().unwrap_or_default();
            if age > statement.ttl {
                continue;
            }
            let key = fingerprint(&statement.sql);
            if self.inner.cache.contains_key(&key) {
                continue;
            }
            match fetch_all_rows(self.inner.client.as_ref(), &execution.id).await {
                Ok(rows) => {
                    info!("hydrated query cache from recent execution {}", execution.id);
                    self.inner
                        .cache
                        .insert(
                            key,
                            CachedQuery {
                                rows,
                                completed,
                                ttl: statement.ttl,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!(
                        "failed to hydrate cache from recent execution {}: {e:#}",
                        execution.id
                    );
                }
            }
        }
    }
}

fn backend_error(e: anyhow::Error) -> QueryError {
    QueryError::Backend(format!("{e:#}"))
}

/// Issues a best-effort remote cancel when the polling future is dropped
/// before the execution reaches a terminal state.
struct CancelGuard {
    client: Arc<dyn AthenaApi>,
    id: String,
    armed: bool,
}

impl CancelGuard {
    fn new(client: Arc<dyn AthenaApi>, id: String) -> Self {
        Self {
            client,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                debug!("cancelling abandoned query execution {id}");
                if let Err(e) = client.stop_query_execution(&id).await {
                    debug!("failed to stop query execution: {e:#}");
                }
            });
        }
    }
}

async fn execute_query(client: Arc<dyn AthenaApi>, sql: &str) -> Result<Rows, QueryError> {
    debug!("submitting query: {sql}");
    let id = client
        .start_query_execution(sql)
        .await
        .map_err(backend_error)?;

    let guard = CancelGuard::new(client.clone(), id.clone());
    let status = poll_until_terminal(client.as_ref(), &id).await?;
    guard.disarm();

    match status.state {
        QueryState::Succeeded => fetch_all_rows(client.as_ref(), &id).await,
        QueryState::Cancelled => Err(QueryError::Cancelled),
        _ => Err(QueryError::Failed(
            status
                .state_change_reason
                .unwrap_or_else(|| "query execution failed".into()),
        )),
    }
}

async fn poll_until_terminal(
    client: &dyn AthenaApi,
    id: &str,
) -> Result<crate::client::QueryStatus, QueryError> {
    // 100ms doubling up to a 2s ceiling
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(50)
        .max_delay(Duration::from_secs(2));
    Retry::spawn(strategy, || async {
        let status = client
            .get_query_execution(id)
            .await
            .map_err(|e| RetryError::permanent(backend_error(e)))?;
        if status.state.is_terminal() {
            Ok(status)
        } else {
            Err(RetryError::transient(QueryError::Backend(
                "query execution still in progress".into(),
            )))
        }
    })
    .await
}

async fn fetch_all_rows(client: &dyn AthenaApi, id: &str) -> Result<Rows, QueryError> {
    let mut rows = Vec::new();
    let mut next_token = None;
    let mut first_page = true;
    loop {
        let page = client
            .get_query_results(id, next_token)
            .await
            .map_err(backend_error)?;
        let mut page_rows = page.rows;
        if first_page && !page_rows.is_empty() {
            // the first row of the first page is the column header
            page_rows.remove(0);
        }
        first_page = false;
        rows.extend(page_rows);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }
    Ok(Arc::new(rows))
}
