use std::time::Duration;

use serde::Deserialize;

fn default_max_span_age() -> Duration {
    // two weeks
    Duration::from_secs(336 * 3600)
}

fn default_max_trace_duration() -> Duration {
    Duration::from_secs(3600)
}

fn default_services_query_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_dependencies_query_ttl() -> Duration {
    Duration::from_secs(6 * 3600)
}

/// Query engine targets and read-side bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AthenaConfig {
    pub database_name: String,
    pub spans_table_name: String,
    pub operations_table_name: String,
    #[serde(alias = "work_group")]
    pub workgroup: String,
    /// S3 location receiving Athena result sets.
    pub output_location: String,
    /// Lower bound on the time range of any read.
    #[serde(with = "humantime_serde", default = "default_max_span_age")]
    pub max_span_age: Duration,
    /// Upper bound on the duration of a single trace; widens partition
    /// scans when collecting the spans of matched traces.
    #[serde(with = "humantime_serde", default = "default_max_trace_duration")]
    pub max_trace_duration: Duration,
    #[serde(with = "humantime_serde", default = "default_services_query_ttl")]
    pub services_query_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_dependencies_query_ttl")]
    pub dependencies_query_ttl: Duration,
    /// Submit the dependencies query during startup warmup.
    #[serde(default)]
    pub dependencies_prefetch: bool,
}
