use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::DecodeError;
use lokiscope_types::LogRecord;

/// Decoder for lines printed by the store client
pub struct LineDecoder;

/// Shape of one line in the store's JSON-lines output
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    line: String,
    timestamp: String,
}

impl LineDecoder {
    /// Decode a line of the store's default output
    ///
    /// The line looks like `<timestamp> {<labels>} <payload>`. When the
    /// stream carries no labels the block is the empty marker `{}` or is
    /// missing altogether.
    pub fn decode(raw: &str, stream_has_labels: bool) -> Result<LogRecord, DecodeError> {
        let (token, timestamp, rest) = Self::split_timestamp(raw)?;

        let (labels, payload) = if stream_has_labels {
            Self::split_labels(rest)?
        } else {
            (BTreeMap::new(), rest.strip_prefix("{}").unwrap_or(rest))
        };

        let mut record = Self::decode_payload(payload, timestamp)?.with_timestamp_text(token);
        record.labels = labels;
        Ok(record)
    }

    /// Decode a line of the store's JSON-lines output
    ///
    /// The payload is itself a JSON document nested as a string under `line`.
    pub fn decode_envelope(raw: &str) -> Result<LogRecord, DecodeError> {
        let envelope: Envelope = serde_json::from_str(raw.trim()).map_err(DecodeError::Envelope)?;
        let timestamp = DateTime::parse_from_rfc3339(&envelope.timestamp)
            .map_err(|_| DecodeError::Timestamp(envelope.timestamp.clone()))?;

        let mut record =
            Self::decode_payload(&envelope.line, timestamp)?.with_timestamp_text(envelope.timestamp);
        record.labels = envelope.labels;
        Ok(record)
    }

    /// Split the leading RFC 3339 timestamp off a line
    fn split_timestamp(raw: &str) -> Result<(&str, DateTime<FixedOffset>, &str), DecodeError> {
        let line = raw.trim();
        let (token, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let timestamp = DateTime::parse_from_rfc3339(token)
            .map_err(|_| DecodeError::Timestamp(token.to_string()))?;
        Ok((token, timestamp, rest.trim_start()))
    }

    /// Parse a `{name="value", ...}` label block, returning the remainder
    fn split_labels(s: &str) -> Result<(BTreeMap<String, String>, &str), DecodeError> {
        let mut labels = BTreeMap::new();
        let mut chars = s.char_indices().peekable();

        match chars.next() {
            Some((_, '{')) => {}
            _ => return Err(DecodeError::Labels("expected `{`".to_string())),
        }

        loop {
            while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

            let Some((start, c)) = chars.next() else {
                return Err(DecodeError::Labels("unterminated label block".to_string()));
            };
            if c == '}' {
                return Ok((labels, s[start + 1..].trim_start()));
            }
            if !(c.is_ascii_alphanumeric() || c == '_') {
                return Err(DecodeError::Labels(format!("unexpected `{c}` in label name")));
            }

            let mut end = start + c.len_utf8();
            while let Some((i, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
            {
                end = i + c.len_utf8();
            }
            let name = &s[start..end];

            if chars.next().map(|(_, c)| c) != Some('=') {
                return Err(DecodeError::Labels(format!("expected `=` after `{name}`")));
            }
            if chars.next().map(|(_, c)| c) != Some('"') {
                return Err(DecodeError::Labels(format!("expected quoted value for `{name}`")));
            }

            let mut value = String::new();
            loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, other)) => value.push(other),
                        None => break,
                    },
                    Some((_, c)) => value.push(c),
                    None => {
                        return Err(DecodeError::Labels(format!(
                            "unterminated value for `{name}`"
                        )));
                    }
                }
            }
            labels.insert(name.to_string(), value);

            while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
            match chars.peek() {
                Some((_, ',')) => {
                    chars.next();
                }
                Some((_, '}')) => {}
                Some((_, c)) => {
                    return Err(DecodeError::Labels(format!("unexpected `{c}` after label value")));
                }
                None => return Err(DecodeError::Labels("unterminated label block".to_string())),
            }
        }
    }

    /// Parse the structured payload into a record
    fn decode_payload(
        payload: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<LogRecord, DecodeError> {
        // Producers occasionally embed raw control bytes that are invalid in JSON
        let cleaned: String = payload.chars().filter(|c| !c.is_control()).collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Err(DecodeError::MissingPayload);
        }

        let value: Value = serde_json::from_str(cleaned)?;
        let fields = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let mut record = LogRecord::new(timestamp);
        record.accelerator = Self::field(fields, "accelerator");
        record.origin = Self::field(fields, "origin");
        record.user = Self::field(fields, "user");
        record.facility = Self::field(fields, "facility");
        record.severity = Self::field(fields, "severity");
        record.text = Self::field(fields, "text");
        Ok(record)
    }

    /// Read a payload field as text; absent and null fields are empty
    fn field(fields: &Map<String, Value>, key: &str) -> String {
        match fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"accelerator": "linac", "origin": "bpm-ctl", "user": "ops", "facility": "diag", "severity": "WARN", "text": "orbit drift"}"#;

    #[test]
    fn test_decode_with_labels() {
        let line = format!(
            r#"2023-09-20T10:00:00Z {{host="cs01", job="accelerator-logs"}} {PAYLOAD}"#
        );
        let record = LineDecoder::decode(&line, true).unwrap();
        assert_eq!(record.timestamp.to_rfc3339(), "2023-09-20T10:00:00+00:00");
        assert_eq!(record.labels.get("job").map(String::as_str), Some("accelerator-logs"));
        assert_eq!(record.labels.get("host").map(String::as_str), Some("cs01"));
        assert_eq!(record.accelerator, "linac");
        assert_eq!(record.origin, "bpm-ctl");
        assert_eq!(record.user, "ops");
        assert_eq!(record.facility, "diag");
        assert_eq!(record.severity, "WARN");
        assert_eq!(record.text, "orbit drift");
    }

    #[test]
    fn test_decode_empty_label_marker() {
        let line = format!("2023-09-20T12:00:00+02:00 {{}} {PAYLOAD}");
        let record = LineDecoder::decode(&line, false).unwrap();
        assert!(record.labels.is_empty());
        assert_eq!(record.text, "orbit drift");
        assert_eq!(record.timestamp.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_decode_without_marker() {
        let line = format!("2023-09-20T10:00:00Z {PAYLOAD}");
        let record = LineDecoder::decode(&line, false).unwrap();
        assert_eq!(record.origin, "bpm-ctl");
    }

    #[test]
    fn test_label_values_with_braces_and_escapes() {
        let line = r#"2023-09-20T10:00:00Z {app="a}b, c", q="say \"hi\""} {"text": "x"}"#;
        let record = LineDecoder::decode(line, true).unwrap();
        assert_eq!(record.labels["app"], "a}b, c");
        assert_eq!(record.labels["q"], r#"say "hi""#);
        assert_eq!(record.text, "x");
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let record = LineDecoder::decode(r#"2023-09-20T10:00:00Z {} {"text": "only text", "extra": 1}"#, false)
            .unwrap();
        assert_eq!(record.text, "only text");
        assert_eq!(record.origin, "");
        assert_eq!(record.facility, "");
    }

    #[test]
    fn test_non_string_fields() {
        let record =
            LineDecoder::decode(r#"2023-09-20T10:00:00Z {} {"severity": 3, "user": null}"#, false).unwrap();
        assert_eq!(record.severity, "3");
        assert_eq!(record.user, "");
    }

    #[test]
    fn test_control_bytes_stripped() {
        let line = "2023-09-20T10:00:00Z {} {\"text\": \"bell\u{7}ring\"}";
        let record = LineDecoder::decode(line, false).unwrap();
        assert_eq!(record.text, "bellring");
    }

    #[test]
    fn test_missing_payload() {
        assert!(matches!(
            LineDecoder::decode("2023-09-20T10:00:00Z {}", false),
            Err(DecodeError::MissingPayload)
        ));
        assert!(matches!(
            LineDecoder::decode(r#"2023-09-20T10:00:00Z {job="x"}"#, true),
            Err(DecodeError::MissingPayload)
        ));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            LineDecoder::decode("2023-09-20T10:00:00Z {} not json", false),
            Err(DecodeError::Payload(_))
        ));
        assert!(matches!(
            LineDecoder::decode(r#"2023-09-20T10:00:00Z {} ["a"]"#, false),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_bad_timestamp() {
        assert!(matches!(
            LineDecoder::decode(&format!("yesterday {{}} {PAYLOAD}"), false),
            Err(DecodeError::Timestamp(t)) if t == "yesterday"
        ));
    }

    #[test]
    fn test_unterminated_labels() {
        assert!(matches!(
            LineDecoder::decode(r#"2023-09-20T10:00:00Z {job="x" {"text": "y"}"#, true),
            Err(DecodeError::Labels(_))
        ));
    }

    #[test]
    fn test_decode_envelope() {
        let line = r#"{"labels":{"job":"accelerator-logs"},"line":"{\"origin\": \"rf\", \"text\": \"trip\"}","timestamp":"2023-09-20T10:00:00.123456+00:00"}"#;
        let record = LineDecoder::decode_envelope(line).unwrap();
        assert_eq!(record.origin, "rf");
        assert_eq!(record.text, "trip");
        assert_eq!(record.labels["job"], "accelerator-logs");
        assert_eq!(record.timestamp.timestamp_subsec_micros(), 123456);
        assert_eq!(record.timestamp_text, "2023-09-20T10:00:00.123456+00:00");
    }

    #[test]
    fn test_timestamp_text_kept_verbatim() {
        let line = r#"2023-09-20T10:00:01.5+02:00 {} {"text": "x"}"#;
        let record = LineDecoder::decode(line, false).unwrap();
        assert_eq!(record.timestamp_text, "2023-09-20T10:00:01.5+02:00");

        let line = r#"{"line":"{\"text\": \"x\"}","timestamp":"2023-09-20T10:00:00.000000Z"}"#;
        let record = LineDecoder::decode_envelope(line).unwrap();
        assert_eq!(record.timestamp_text, "2023-09-20T10:00:00.000000Z");
    }

    #[test]
    fn test_envelope_without_line() {
        assert!(matches!(
            LineDecoder::decode_envelope(r#"{"timestamp":"2023-09-20T10:00:00Z"}"#),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn test_multibyte_payload_no_panic() {
        let line = "2023-09-20T10:00:00Z {} {\"text\": \"╭──╮ Strahl\"}";
        let record = LineDecoder::decode(line, false).unwrap();
        assert_eq!(record.text, "╭──╮ Strahl");
    }
}
