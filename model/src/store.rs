//! Contracts between the storage transport and the storage backends.
//!
//! The gRPC layer multiplexes these three interfaces; the write path and
//! the read path implement them independently.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::Span;
use crate::record::CodecError;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("span writer is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("trace {0} not found")]
    TraceNotFound(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A trace is the set of spans sharing a trace id.
pub type Trace = Vec<Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub span_kind: String,
}

#[derive(Debug, Clone, Default)]
pub struct OperationQuery {
    pub service_name: String,
    /// Empty matches any kind.
    pub span_kind: String,
}

#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    pub service_name: String,
    /// Empty matches any operation.
    pub operation_name: String,
    pub tags: Vec<(String, String)>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub start_time_max: Option<DateTime<Utc>>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    /// Maximum number of traces to return; 0 means the backend default.
    pub num_traces: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}

#[async_trait]
pub trait SpanWriter: Send + Sync {
    async fn write_span(&self, span: &Span) -> Result<(), WriteError>;
}

#[async_trait]
pub trait SpanReader: Send + Sync {
    async fn get_services(&self) -> Result<Vec<String>, ReadError>;

    async fn get_operations(&self, query: OperationQuery) -> Result<Vec<Operation>, ReadError>;

    /// Fails with [`ReadError::TraceNotFound`] when no span matches.
    async fn get_trace(&self, trace_id: &[u8]) -> Result<Trace, ReadError>;

    async fn find_traces(&self, query: TraceQuery) -> Result<Vec<Trace>, ReadError>;

    async fn find_trace_ids(&self, query: TraceQuery) -> Result<Vec<Vec<u8>>, ReadError>;
}

#[async_trait]
pub trait DependencyReader: Send + Sync {
    async fn get_dependencies(
        &self,
        end_ts: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>, ReadError>;
}
