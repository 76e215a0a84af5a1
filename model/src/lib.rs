//! Span model, record codec and storage contracts shared by the write and
//! read paths of the Athena-backed storage plugin.
//!
//! The wire model is protobuf; `span_payload` columns carry the prost
//! encoding of [`model::Span`] verbatim so traces can be reconstructed
//! without loss from the columnar projection.

/// Generated span model types.
pub mod model {
    include!(concat!(env!("OUT_DIR"), "/model.rs"));
}

/// Generated storage plugin contract (gRPC services + messages).
pub mod storage {
    include!(concat!(env!("OUT_DIR"), "/storage.rs"));
}

pub mod ids;
pub mod partition;
pub mod record;
pub mod store;

mod span;

pub use span::SPAN_KIND_TAG;
