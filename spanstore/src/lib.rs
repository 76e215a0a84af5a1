//! Write path of the storage plugin.
//!
//! Spans land in per-hour partitions; every partition accumulates rows in
//! columnar builders behind a randomly named object key and is finalized
//! into a Parquet object on the next rotation tick or on close.

pub mod bucket;
pub mod config;
pub mod partition;
pub mod tables;
pub mod writer;

pub use config::S3Config;
pub use writer::SpanStoreWriter;
