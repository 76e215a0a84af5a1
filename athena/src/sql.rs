//! SQL templates for the read operations.
//!
//! Table and database names come from configuration only; every
//! user-supplied string is escaped as a single-quoted literal. Time
//! predicates bound both the millisecond `start_time` column and the
//! `datehour` partition column derived from the object path.

use std::time::Duration;

use chrono::{DateTime, Utc};

use jaeger_athena_model::partition::partition_key;
use jaeger_athena_model::store::TraceQuery;

use crate::config::AthenaConfig;

pub const DEFAULT_NUM_TRACES: usize = 100;

/// Escapes a value for use inside a single-quoted SQL literal.
pub fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

fn table_ref(database: &str, table: &str) -> String {
    format!("\"{database}\".\"{table}\"")
}

fn minus(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_sub_signed(d))
        .unwrap_or(t)
}

fn plus(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(t)
}

/// Clamps the queried start-time range: the lower bound never reaches
/// past `max_span_age`, and an absent lower bound defaults to one
/// `max_trace_duration` below the upper bound.
pub fn clamp_time_range(
    config: &AthenaConfig,
    query: &TraceQuery,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let max = query.start_time_max.unwrap_or(now);
    let mut min = query
        .start_time_min
        .unwrap_or_else(|| minus(max, config.max_trace_duration));
    let floor = minus(now, config.max_span_age);
    if min < floor {
        min = floor;
    }
    if min > max {
        min = max;
    }
    (min, max)
}

pub fn services_query(config: &AthenaConfig, now: DateTime<Utc>) -> String {
    format!(
        "SELECT DISTINCT service_name FROM {} WHERE datehour >= '{}'",
        table_ref(&config.database_name, &config.operations_table_name),
        partition_key(minus(now, config.max_span_age)),
    )
}

pub fn operations_query(
    config: &AthenaConfig,
    now: DateTime<Utc>,
    service_name: &str,
    span_kind: &str,
) -> String {
    let mut conditions = vec![format!("service_name = '{}'", escape_string(service_name))];
    if !span_kind.is_empty() {
        conditions.push(format!("span_kind = '{}'", escape_string(span_kind)));
    }
    conditions.push(format!(
        "datehour >= '{}'",
        partition_key(minus(now, config.max_span_age))
    ));
    format!(
        "SELECT DISTINCT operation_name, span_kind FROM {} WHERE {}",
        table_ref(&config.database_name, &config.operations_table_name),
        conditions.join(" AND "),
    )
}

pub fn trace_ids_query(config: &AthenaConfig, query: &TraceQuery, now: DateTime<Utc>) -> String {
    let (min, max) = clamp_time_range(config, query, now);
    let mut conditions = Vec::new();
    if !query.service_name.is_empty() {
        conditions.push(format!(
            "service_name = '{}'",
            escape_string(&query.service_name)
        ));
    }
    if !query.operation_name.is_empty() {
        conditions.push(format!(
            "operation_name = '{}'",
            escape_string(&query.operation_name)
        ));
    }
    for (key, value) in &query.tags {
        conditions.push(format!(
            "tags['{}'] = '{}'",
            escape_string(key),
            escape_string(value)
        ));
    }
    conditions.push(format!(
        "start_time BETWEEN {} AND {}",
        min.timestamp_millis(),
        max.timestamp_millis()
    ));
    conditions.push(format!(
        "datehour BETWEEN '{}' AND '{}'",
        partition_key(min),
        partition_key(max)
    ));
    if let Some(duration_min) = query.duration_min {
        conditions.push(format!("duration >= {}", duration_min.as_nanos()));
    }
    if let Some(duration_max) = query.duration_max {
        conditions.push(format!("duration <= {}", duration_max.as_nanos()));
    }
    let limit = if query.num_traces == 0 {
        DEFAULT_NUM_TRACES
    } else {
        query.num_traces
    };
    format!(
        "SELECT trace_id FROM {} WHERE {} GROUP BY trace_id ORDER BY MAX(start_time) DESC LIMIT {}",
        table_ref(&config.database_name, &config.spans_table_name),
        conditions.join(" AND "),
        limit,
    )
}

/// Collects the payloads of whole traces. The partition window widens by
/// `max_trace_duration` on both sides so spans of a matched trace that
/// start outside the queried range are still picked up.
pub fn trace_payloads_query(
    config: &AthenaConfig,
    trace_ids: &[String],
    range_min: DateTime<Utc>,
    range_max: DateTime<Utc>,
) -> String {
    let ids = trace_ids
        .iter()
        .map(|id| format!("'{}'", escape_string(id)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT trace_id, to_base64(span_payload) AS span_payload FROM {} WHERE trace_id IN ({}) AND datehour BETWEEN '{}' AND '{}'",
        table_ref(&config.database_name, &config.spans_table_name),
        ids,
        partition_key(minus(range_min, config.max_trace_duration)),
        partition_key(plus(range_max, config.max_trace_duration)),
    )
}

pub fn single_trace_query(config: &AthenaConfig, trace_id: &str, now: DateTime<Utc>) -> String {
    let cutoff = minus(minus(now, config.max_span_age), config.max_trace_duration);
    format!(
        "SELECT trace_id, to_base64(span_payload) AS span_payload FROM {} WHERE trace_id = '{}' AND datehour >= '{}'",
        table_ref(&config.database_name, &config.spans_table_name),
        escape_string(trace_id),
        partition_key(cutoff),
    )
}

/// Parent/child call counts from the references column. Bounds are
/// hour-granular so the statement text is stable within an hour and can
/// be warmed from recent executions.
pub fn dependencies_query(
    config: &AthenaConfig,
    end_ts: DateTime<Utc>,
    lookback: Duration,
) -> String {
    let spans = table_ref(&config.database_name, &config.spans_table_name);
    let begin = minus(end_ts, lookback);
    format!(
        "SELECT parent.service_name AS parent, child.service_name AS child, COUNT(*) AS call_count \
         FROM {spans} AS child \
         CROSS JOIN UNNEST(child.\"references\") AS r (trace_id, span_id, ref_type) \
         JOIN {spans} AS parent ON parent.trace_id = r.trace_id AND parent.span_id = r.span_id \
         WHERE child.datehour BETWEEN '{}' AND '{}' AND parent.datehour BETWEEN '{}' AND '{}' \
         GROUP BY 1, 2",
        partition_key(begin),
        partition_key(end_ts),
        partition_key(minus(begin, config.max_trace_duration)),
        partition_key(end_ts),
    )
}
