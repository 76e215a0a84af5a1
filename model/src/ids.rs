//! Fixed-width hex rendering of trace and span ids.
//!
//! Persisted ids are lowercase hex, zero-padded to the full id width, so
//! that string equality in SQL matches byte equality of the raw ids.

/// Width of a rendered trace id (16 bytes).
pub const TRACE_ID_WIDTH: usize = 32;

/// Width of a rendered span id (8 bytes).
pub const SPAN_ID_WIDTH: usize = 16;

/// Renders a raw trace id as lowercase hex, left-padded to 32 chars.
pub fn format_trace_id(raw: &[u8]) -> String {
    format!("{:0>width$}", hex::encode(raw), width = TRACE_ID_WIDTH)
}

/// Renders a raw span id as lowercase hex, left-padded to 16 chars.
pub fn format_span_id(raw: &[u8]) -> String {
    format!("{:0>width$}", hex::encode(raw), width = SPAN_ID_WIDTH)
}

/// Parses a hex trace id back into raw bytes.
pub fn parse_trace_id(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    if s.len() % 2 == 0 {
        hex::decode(s)
    } else {
        hex::decode(format!("0{s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_padded_lowercase_hex() {
        let formatted = format_trace_id(&[0x11]);
        assert_eq!(formatted, "00000000000000000000000000000011");
        assert_eq!(formatted.len(), TRACE_ID_WIDTH);
    }

    #[test]
    fn span_id_is_padded_lowercase_hex() {
        let formatted = format_span_id(&[0xAB, 0x03]);
        assert_eq!(formatted, "000000000000ab03");
        assert_eq!(formatted.len(), SPAN_ID_WIDTH);
    }

    #[test]
    fn full_width_ids_are_untouched() {
        let raw: Vec<u8> = (0..16).collect();
        assert_eq!(format_trace_id(&raw), hex::encode(&raw));
    }

    #[test]
    fn parse_round_trips() {
        let raw = vec![0x00, 0x00, 0x00, 0x11];
        let parsed = parse_trace_id(&format_trace_id(&raw)).unwrap();
        assert_eq!(parsed[parsed.len() - raw.len()..], raw[..]);
    }
}
