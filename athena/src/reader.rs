//! The span reader facade: query-side contract operations rendered as
//! SQL and decoded back into domain objects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::warn;

use jaeger_athena_model::ids::{format_trace_id, parse_trace_id};
use jaeger_athena_model::model::Span;
use jaeger_athena_model::store::{
    DependencyLink, DependencyReader, Operation, OperationQuery, ReadError, SpanReader, Trace,
    TraceQuery,
};

use crate::client::AthenaApi;
use crate::config::AthenaConfig;
use crate::orchestrator::{QueryError, QueryOrchestrator, Rows, WarmupStatement};
use crate::sql;

impl From<QueryError> for ReadError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Failed(reason) => ReadError::QueryFailed(reason),
            QueryError::Cancelled => ReadError::Cancelled,
            QueryError::Backend(detail) => ReadError::Backend(detail),
        }
    }
}

#[derive(Clone)]
pub struct Reader {
    orchestrator: QueryOrchestrator,
    config: Arc<AthenaConfig>,
}

impl Reader {
    /// Builds the reader and hydrates the query cache from recent
    /// executions; optionally kicks off the dependencies prefetch.
    pub async fn new(client: Arc<dyn AthenaApi>, config: AthenaConfig) -> Self {
        let reader = Self {
            orchestrator: QueryOrchestrator::new(client),
            config: Arc::new(config),
        };
        let now = Utc::now();
        let statements = vec![
            WarmupStatement {
                sql: sql::services_query(&reader.config, now),
                ttl: reader.config.services_query_ttl,
            },
            WarmupStatement {
                sql: sql::dependencies_query(&reader.config, now, reader.config.max_span_age),
                ttl: reader.config.dependencies_query_ttl,
            },
        ];
        reader.orchestrator.warm_cache(&statements).await;

        if reader.config.dependencies_prefetch {
            let prefetch = reader.clone();
            tokio::spawn(async move {
                let lookback = prefetch.config.max_span_age;
                if let Err(e) = prefetch.get_dependencies(Utc::now(), lookback).await {
                    warn!("dependencies prefetch failed: {e}");
                }
            });
        }
        reader
    }

    async fn run(&self, sql: String, ttl: Duration) -> Result<Rows, ReadError> {
        Ok(self.orchestrator.run_query(&sql, ttl).await?)
    }
}

fn decode_payload_row(row: &[String]) -> Result<(String, Span), ReadError> {
    let trace_id = row.first().cloned().unwrap_or_default();
    let payload = row.get(1).map(String::as_str).unwrap_or_default();
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| ReadError::Backend(format!("invalid span payload encoding: {e}")))?;
    let span = Span::decode_payload(&bytes)
        .map_err(|e| ReadError::Backend(format!("invalid span payload: {e}")))?;
    Ok((trace_id, span))
}

/// Groups payload rows into traces, preserving first-seen trace order.
fn group_into_traces(rows: &[Vec<String>]) -> Result<Vec<Trace>, ReadError> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Trace> = HashMap::new();
    for row in rows {
        let (trace_id, span) = decode_payload_row(row)?;
        if !grouped.contains_key(&trace_id) {
            order.push(trace_id.clone());
        }
        grouped.entry(trace_id).or_default().push(span);
    }
    Ok(order
        .into_iter()
        .filter_map(|id| grouped.remove(&id))
        .collect())
}

#[async_trait]
impl SpanReader for Reader {
    async fn get_services(&self) -> Result<Vec<String>, ReadError> {
        let statement = sql::services_query(&self.config, Utc::now());
        let rows = self.run(statement, self.config.services_query_ttl).await?;
        Ok(rows
            .iter()
            .map(|row| row.first().cloned().unwrap_or_default())
            .collect())
    }

    async fn get_operations(&self, query: OperationQuery) -> Result<Vec<Operation>, ReadError> {
        let statement = sql::operations_query(
            &self.config,
            Utc::now(),
            &query.service_name,
            &query.span_kind,
        );
        let rows = self.run(statement, Duration::ZERO).await?;
        Ok(rows
            .iter()
            .map(|row| Operation {
                name: row.first().cloned().unwrap_or_default(),
                span_kind: row.get(1).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn get_trace(&self, trace_id: &[u8]) -> Result<Trace, ReadError> {
        let hex_id = format_trace_id(trace_id);
        let statement = sql::single_trace_query(&self.config, &hex_id, Utc::now());
        let rows = self.run(statement, Duration::ZERO).await?;
        if rows.is_empty() {
            return Err(ReadError::TraceNotFound(hex_id));
        }
        let mut spans = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let (_, span) = decode_payload_row(row)?;
            spans.push(span);
        }
        Ok(spans)
    }

    async fn find_traces(&self, query: TraceQuery) -> Result<Vec<Trace>, ReadError> {
        let now = Utc::now();
        let ids_statement = sql::trace_ids_query(&self.config, &query, now);
        let id_rows = self.run(ids_statement, Duration::ZERO).await?;
        let trace_ids: Vec<String> = id_rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        if trace_ids.is_empty() {
            return Ok(vec![]);
        }
        let (range_min, range_max) = sql::clamp_time_range(&self.config, &query, now);
        let payloads_statement =
            sql::trace_payloads_query(&self.config, &trace_ids, range_min, range_max);
        let payload_rows = self.run(payloads_statement, Duration::ZERO).await?;
        group_into_traces(&payload_rows)
    }

    async fn find_trace_ids(&self, query: TraceQuery) -> Result<Vec<Vec<u8>>, ReadError> {
        let statement = sql::trace_ids_query(&self.config, &query, Utc::now());
        let rows = self.run(statement, Duration::ZERO).await?;
        rows.iter()
            .filter_map(|row| row.first())
            .filter(|id| !id.is_empty())
            .map(|id| {
                parse_trace_id(id).map_err(|e| ReadError::Backend(format!("invalid trace id: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl DependencyReader for Reader {
    async fn get_dependencies(
        &self,
        end_ts: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>, ReadError> {
        let statement = sql::dependencies_query(&self.config, end_ts, lookback);
        let rows = self
            .run(statement, self.config.dependencies_query_ttl)
            .await?;
        rows.iter()
            .map(|row| {
                let call_count = row
                    .get(2)
                    .map(String::as_str)
                    .unwrap_or_default()
                    .parse()
                    .map_err(|e| ReadError::Backend(format!("invalid call count: {e}")))?;
                Ok(DependencyLink {
                    parent: row.first().cloned().unwrap_or_default(),
                    child: row.get(1).cloned().unwrap_or_default(),
                    call_count,
                })
            })
            .collect()
    }
}
