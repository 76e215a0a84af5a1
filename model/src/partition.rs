use chrono::{DateTime, Utc};

/// Hour-granular partition layout shared by the object keys on the write
/// side and the `datehour` predicates on the query side.
pub const PARTITION_FORMAT: &str = "%Y/%m/%d/%H";

/// Partition key for a span start time, UTC.
pub fn partition_key(start_time: DateTime<Utc>) -> String {
    start_time.format(PARTITION_FORMAT).to_string()
}
