//! Read path of the storage plugin.
//!
//! The reader facade renders the query-side contract into SQL against the
//! external spans and operations tables; the orchestrator submits the SQL
//! to Athena, polls it to completion, pages the result set and keeps two
//! layers of protection against redundant work: a TTL result cache and an
//! in-flight table coalescing concurrent identical queries.

pub mod client;
pub mod config;
pub mod orchestrator;
pub mod reader;
pub mod sdk;
pub mod sql;

pub use client::AthenaApi;
pub use config::AthenaConfig;
pub use orchestrator::QueryOrchestrator;
pub use reader::Reader;
