use chrono::{DateTime, Utc};
use prost::Message;

use crate::model::{KeyValue, Span, ValueType};

/// Tag holding the span kind (client, server, producer, consumer, internal).
pub const SPAN_KIND_TAG: &str = "span.kind";

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            v_type: ValueType::String as i32,
            v_str: value.into(),
            ..Default::default()
        }
    }

    pub fn boolean(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            v_type: ValueType::Bool as i32,
            v_bool: value,
            ..Default::default()
        }
    }

    pub fn int64(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            v_type: ValueType::Int64 as i32,
            v_int64: value,
            ..Default::default()
        }
    }

    pub fn float64(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            v_type: ValueType::Float64 as i32,
            v_float64: value,
            ..Default::default()
        }
    }

    pub fn binary(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            v_type: ValueType::Binary as i32,
            v_binary: value,
            ..Default::default()
        }
    }

    /// Renders the typed value as a string: int64 decimal, float64 in its
    /// shortest round-trip form, bool lowercase, binary lowercase hex.
    pub fn value_string(&self) -> String {
        match self.v_type() {
            ValueType::String => self.v_str.clone(),
            ValueType::Bool => self.v_bool.to_string(),
            ValueType::Int64 => self.v_int64.to_string(),
            ValueType::Float64 => self.v_float64.to_string(),
            ValueType::Binary => hex::encode(&self.v_binary),
        }
    }
}

impl Span {
    /// Value of the `span.kind` tag, empty when the tag is absent.
    pub fn span_kind(&self) -> String {
        self.tags
            .iter()
            .find(|tag| tag.key == SPAN_KIND_TAG)
            .map(KeyValue::value_string)
            .unwrap_or_default()
    }

    pub fn service_name(&self) -> &str {
        self.process
            .as_ref()
            .map(|p| p.service_name.as_str())
            .unwrap_or("")
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        let ts = self.start_time.as_ref()?;
        DateTime::from_timestamp(ts.seconds, ts.nanos as u32)
    }

    /// Start time as Unix milliseconds. Sub-millisecond precision is
    /// dropped; the persisted column is millisecond-granular.
    pub fn start_time_unix_ms(&self) -> Option<i64> {
        let ts = self.start_time.as_ref()?;
        Some(ts.seconds * 1_000 + i64::from(ts.nanos) / 1_000_000)
    }

    pub fn duration_nanos(&self) -> i64 {
        self.duration
            .as_ref()
            .map(|d| d.seconds * 1_000_000_000 + i64::from(d.nanos))
            .unwrap_or(0)
    }

    /// Serializes the span into its wire form, the payload persisted next
    /// to the columnar projection.
    pub fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes a span from a persisted payload column.
    pub fn decode_payload(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Process;

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
    fn start_time_is_narrowed_to_millis() {
        assert_eq!(test_span().start_time_unix_ms(), Some(1_485_449_191_639));
    }

    #[test]
    fn duration_is_nanos() {
        assert_eq!(test_span().duration_nanos(), 100_000);
    }

    #[test]
    fn span_kind_comes_from_the_tag() {
        let mut span = test_span();
        assert_eq!(span.span_kind(), "");
        span.tags.push(KeyValue::string(SPAN_KIND_TAG, "server"));
        assert_eq!(span.span_kind(), "server");
    }

    #[test]
    fn payload_round_trips() {
        let span = test_span();
        let decoded = Span::decode_payload(&span.encode_payload()).unwrap();
        assert_eq!(decoded, span);
    }

    #[test]
    fn value_strings_follow_type_rules() {
        assert_eq!(KeyValue::string("k", "v").value_string(), "v");
        assert_eq!(KeyValue::int64("k", 123).value_string(), "123");
        assert_eq!(KeyValue::float64("k", 72.5).value_string(), "72.5");
        assert_eq!(KeyValue::boolean("k", true).value_string(), "true");
        assert_eq!(
            KeyValue::binary("k", vec![0x00, 0x00, 0x30, 0x39]).value_string(),
            "00003039"
        );
    }
}
