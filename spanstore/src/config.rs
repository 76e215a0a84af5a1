use std::time::Duration;

use serde::Deserialize;

fn default_buffer_duration() -> Duration {
    Duration::from_secs(60)
}

/// Destination bucket settings for the write path.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub bucket_name: String,
    /// Key prefix inside the bucket, typically ending in `/`.
    #[serde(default)]
    pub prefix: String,
    /// Rotation interval; bounds both buffering memory and data loss on
    /// crash.
    #[serde(with = "humantime_serde", default = "default_buffer_duration")]
    pub buffer_duration: Duration,
    /// Deletes every object in the bucket before accepting writes.
    /// Intended for test and development setups only.
    #[serde(default)]
    pub empty_bucket: bool,
}
