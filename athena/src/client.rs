//! Narrow view of the Athena API used by the orchestrator.
//!
//! The trait keeps the polling and caching logic independent of the AWS
//! SDK types; tests drive it with scripted fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub state: QueryState,
    pub state_change_reason: Option<String>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// One page of a result set. Missing cells decode as empty strings.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub rows: Vec<Vec<String>>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryExecutionInfo {
    pub id: String,
    pub query: String,
    pub status: QueryStatus,
}

#[async_trait]
pub trait AthenaApi: Send + Sync + 'static {
    /// Submits the SQL and returns the execution id.
    async fn start_query_execution(&self, sql: &str) -> Result<String>;

    async fn get_query_execution(&self, id: &str) -> Result<QueryStatus>;

    async fn get_query_results(&self, id: &str, next_token: Option<String>)
        -> Result<ResultPage>;

    /// Recent executions in the configured workgroup, used for cache
    /// warmup at startup.
    async fn list_recent_executions(&self) -> Result<Vec<QueryExecutionInfo>>;

    /// Best-effort cancel of a running execution.
    async fn stop_query_execution(&self, id: &str) -> Result<()>;
}
