//! Columnar record forms of spans and operations.
//!
//! A [`SpanRecord`] is the denormalized row persisted to the spans table:
//! ids rendered as fixed-width hex, tags flattened to strings, and the
//! original wire-format span carried along as `span_payload`. The payload
//! is the source of truth for trace reconstruction; the projected columns
//! only exist for filtering.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ids::{format_span_id, format_trace_id};
use crate::model::Span;

#[derive(Debug, Error)]
#[error("cannot encode span: {0}")]
pub struct CodecError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct SpanReference {
    pub trace_id: String,
    pub span_id: String,
    pub ref_type: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub operation_name: String,
    pub span_kind: String,
    pub service_name: String,
    /// Unix milliseconds.
    pub start_time: i64,
    /// Nanoseconds.
    pub duration: i64,
    pub tags: BTreeMap<String, String>,
    pub span_payload: Vec<u8>,
    pub references: Vec<SpanReference>,
}

impl SpanRecord {
    pub fn from_span(span: &Span) -> Result<Self, CodecError> {
        let start_time = span
            .start_time_unix_ms()
            .ok_or_else(|| CodecError("span has no start time".into()))?;

        let mut tags = BTreeMap::new();
        for tag in &span.tags {
            // last writer wins on duplicate keys
            tags.insert(tag.key.clone(), tag.value_string());
        }

        let references = span
            .references
            .iter()
            .map(|r| SpanReference {
                trace_id: format_trace_id(&r.trace_id),
                span_id: format_span_id(&r.span_id),
                ref_type: r.ref_type,
            })
            .collect();

        Ok(Self {
            trace_id: format_trace_id(&span.trace_id),
            span_id: format_span_id(&span.span_id),
            operation_name: span.operation_name.clone(),
            span_kind: span.span_kind(),
            service_name: span.service_name().to_string(),
            start_time,
            duration: span.duration_nanos(),
            tags,
            span_payload: span.encode_payload(),
            references,
        })
    }
}

/// Queryable properties of an operation, one row per written span. Rows
/// are not deduplicated at write time; `dedupe_key` is exposed for
/// optional upstream collapse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationRecord {
    pub operation_name: String,
    pub span_kind: String,
    pub service_name: String,
}

impl OperationRecord {
    pub fn from_span(span: &Span) -> Self {
        Self {
            operation_name: span.operation_name.clone(),
            span_kind: span.span_kind(),
            service_name: span.service_name().to_string(),
        }
    }

    pub fn dedupe_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.operation_name, self.span_kind, self.service_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyValue, Process, SpanRef, SpanRefType};

    fn test_span() -> Span {
        Span {
            trace_id: vec![0x11],
            span_id: vec![0x03],
            operation_name: "example-operation-1".into(),
            start_time: Some(prost_types::Timestamp {
                seconds: 1_485_449_191,
                nanos: 639_875_000,
            }),
            duration: Some(prost_types::Duration {
                seconds: 0,
                nanos: 100_000,
            }),
            process: Some(Process {
                service_name: "example-service-1".into(),
                tags: vec![],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn record_from_minimal_span() {
        let record = SpanRecord::from_span(&test_span()).unwrap();
        assert_eq!(record.trace_id, "00000000000000000000000000000011");
        assert_eq!(record.span_id, "0000000000000003");
        assert_eq!(record.operation_name, "example-operation-1");
        assert_eq!(record.service_name, "example-service-1");
        assert_eq!(record.span_kind, "");
        assert_eq!(record.start_time, 1_485_449_191_639);
        assert_eq!(record.duration, 100_000);
        assert!(record.tags.is_empty());
    }

    #[test]
    fn tags_are_flattened_by_type() {
        let mut span = test_span();
        span.tags = vec![
            KeyValue::string("sameplacetag1", "sameplacevalue"),
            KeyValue::int64("sameplacetag2", 123),
            KeyValue::float64("sameplacetag3", 72.5),
            KeyValue::boolean("sameplacetag4", true),
            KeyValue::binary("blob", vec![0x00, 0x00, 0x30, 0x39]),
        ];
        let record = SpanRecord::from_span(&span).unwrap();
        let expected: BTreeMap<String, String> = [
            ("sameplacetag1", "sameplacevalue"),
            ("sameplacetag2", "123"),
            ("sameplacetag3", "72.5"),
            ("sameplacetag4", "true"),
            ("blob", "00003039"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(record.tags, expected);
    }

    #[test]
    fn duplicate_tags_keep_the_last_value() {
        let mut span = test_span();
        span.tags = vec![
            KeyValue::string("key", "first"),
            KeyValue::string("key", "second"),
        ];
        let record = SpanRecord::from_span(&span).unwrap();
        assert_eq!(record.tags["key"], "second");
    }

    #[test]
    fn references_keep_order_and_kind() {
        let mut span = test_span();
        span.references = vec![
            SpanRef {
                trace_id: vec![0x11],
                span_id: vec![0x01],
                ref_type: SpanRefType::ChildOf as i32,
            },
            SpanRef {
                trace_id: vec![0x11],
                span_id: vec![0x02],
                ref_type: SpanRefType::FollowsFrom as i32,
            },
        ];
        let record = SpanRecord::from_span(&span).unwrap();
        assert_eq!(record.references.len(), 2);
        assert_eq!(record.references[0].span_id, "0000000000000001");
        assert_eq!(record.references[0].ref_type, 0);
        assert_eq!(record.references[1].ref_type, 1);
    }

    #[test]
    fn payload_reconstructs_the_span() {
        let span = test_span();
        let record = SpanRecord::from_span(&span).unwrap();
        assert_eq!(Span::decode_payload(&record.span_payload).unwrap(), span);
    }

    #[test]
    fn missing_start_time_is_a_codec_error() {
        let mut span = test_span();
        span.start_time = None;
        assert!(SpanRecord::from_span(&span).is_err());
    }

    #[test]
    fn operation_record_and_dedupe_key() {
        let mut span = test_span();
        span.tags.push(KeyValue::string("span.kind", "server"));
        let record = OperationRecord::from_span(&span);
        assert_eq!(
            record.dedupe_key(),
            "example-operation-1/server/example-service-1"
        );
    }
}
