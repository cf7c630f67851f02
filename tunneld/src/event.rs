//! Wire event model and codec (spec component C1).
//!
//! Every frame on the wire is a single JSON object tagged with a
//! `type` discriminator. Decoding is deliberately two-pass: a cheap
//! outer pass reads only the discriminator, and a second pass
//! re-parses the same text into the concrete variant payload. This
//! mirrors the split between "is this a message I understand" and
//! "what does it actually contain", and lets unknown discriminators be
//! reported as [`ClientEvent::Unknown`] / [`ServerEvent::Unknown`]
//! instead of hard failures — transport-level strictness is layered on
//! top in `ws.rs`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed JSON envelope")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed payload for a recognized message type")]
    MalformedPayload(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    fn as_wire(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Severity::Debug),
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl Serialize for Severity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        Severity::from_wire(s).ok_or_else(|| serde::de::Error::custom(format!("unknown severity: {s}")))
    }
}

/// Closed set of log event kinds. Unrecognized emitter values collapse to
/// [`LogEventKind::CloudflaredCore`], the catch-all "uncategorized" kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEventKind {
    CloudflaredCore,
    Http,
    Tcp,
    Udp,
}

impl LogEventKind {
    fn as_wire(self) -> &'static str {
        match self {
            LogEventKind::CloudflaredCore => "cloudflared-core",
            LogEventKind::Http => "http",
            LogEventKind::Tcp => "tcp",
            LogEventKind::Udp => "udp",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "cloudflared-core" => Some(LogEventKind::CloudflaredCore),
            "http" => Some(LogEventKind::Http),
            "tcp" => Some(LogEventKind::Tcp),
            "udp" => Some(LogEventKind::Udp),
            _ => None,
        }
    }

    /// Maps the integer discriminator used by the in-process emitter.
    /// Any out-of-range code defaults to the core kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => LogEventKind::Http,
            2 => LogEventKind::Tcp,
            3 => LogEventKind::Udp,
            _ => LogEventKind::CloudflaredCore,
        }
    }
}

impl Serialize for LogEventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for LogEventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        LogEventKind::from_wire(s).ok_or_else(|| serde::de::Error::custom(format!("unknown event kind: {s}")))
    }
}

/// A single parsed log record. `fields` never contains the four
/// well-known keys (`time`, `level`, `message`, `event`) by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub time: String,
    pub level: Severity,
    pub event: LogEventKind,
    pub message: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("emitted log record is not a JSON object")]
    NotAnObject(#[source] serde_json::Error),
}

impl LogEvent {
    /// Parses one already-serialized emitter log record (spec.md §4.1).
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let mut obj: Map<String, Value> = serde_json::from_slice(raw).map_err(ParseError::NotAnObject)?;

        let time = obj
            .remove("time")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(now_rfc3339);

        let has_error_field = obj.contains_key("error");

        let declared_level = obj
            .remove("level")
            .and_then(|v| v.as_str().and_then(Severity::from_wire))
            .unwrap_or(Severity::Debug);
        let level = if has_error_field { Severity::Error } else { declared_level };

        let event = obj
            .remove("event")
            .and_then(|v| v.as_i64())
            .map(LogEventKind::from_code)
            .unwrap_or(LogEventKind::CloudflaredCore);

        let message = obj
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();

        Ok(LogEvent {
            time,
            level,
            event,
            message,
            fields: obj,
        })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Optional per-subscription filtering, decoded from `start_streaming`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<LogEventKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<f64>,
}

impl StreamingFilters {
    /// Clamps `sampling` into `[0, 1]`, per spec.md §3.
    pub fn clamped(mut self) -> Self {
        if let Some(p) = self.sampling {
            self.sampling = Some(p.clamp(0.0, 1.0));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StartStreaming { filters: Option<StreamingFilters> },
    StopStreaming,
    /// Decoded only when the discriminator is unrecognized. Never produced
    /// as something the dispatcher is allowed to act on.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Logs { logs: Vec<LogEvent> },
    Unknown,
}

#[derive(Deserialize)]
struct TypeTag<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct StartStreamingPayload {
    #[serde(default)]
    filters: Option<StreamingFilters>,
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, CodecError> {
    let tag: TypeTag<'_> = serde_json::from_str(text).map_err(CodecError::Envelope)?;
    match tag.kind {
        "start_streaming" => {
            let payload: StartStreamingPayload = serde_json::from_str(text).map_err(CodecError::MalformedPayload)?;
            Ok(ClientEvent::StartStreaming {
                filters: payload.filters.map(StreamingFilters::clamped),
            })
        }
        "stop_streaming" => Ok(ClientEvent::StopStreaming),
        _ => Ok(ClientEvent::Unknown),
    }
}

pub fn encode_client_event(event: &ClientEvent) -> String {
    let value = match event {
        ClientEvent::StartStreaming { filters } => {
            let mut obj = Map::new();
            obj.insert("type".to_owned(), json!("start_streaming"));
            if let Some(filters) = filters {
                obj.insert(
                    "filters".to_owned(),
                    serde_json::to_value(filters).unwrap_or(Value::Null),
                );
            }
            Value::Object(obj)
        }
        ClientEvent::StopStreaming => json!({ "type": "stop_streaming" }),
        ClientEvent::Unknown => unreachable!("Unknown is never encoded"),
    };
    value.to_string()
}

#[derive(Deserialize)]
struct LogsPayload {
    logs: Vec<LogEvent>,
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, CodecError> {
    let tag: TypeTag<'_> = serde_json::from_str(text).map_err(CodecError::Envelope)?;
    match tag.kind {
        "logs" => {
            let payload: LogsPayload = serde_json::from_str(text).map_err(CodecError::MalformedPayload)?;
            Ok(ServerEvent::Logs { logs: payload.logs })
        }
        _ => Ok(ServerEvent::Unknown),
    }
}

pub fn encode_server_event(event: &ServerEvent) -> String {
    // Re-serialize through a map-valued intermediate: a structured logging
    // library may hand us two entries with the same field name, and a raw
    // `serde_json::Map` dedups them (last write wins) before this point ever
    // sees them.
    let value = match event {
        ServerEvent::Logs { logs } => {
            let logs = logs
                .iter()
                .map(|event| serde_json::to_value(event).unwrap_or(Value::Null))
                .collect::<Vec<_>>();
            json!({ "type": "logs", "logs": logs })
        }
        ServerEvent::Unknown => unreachable!("Unknown is never encoded"),
    };
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest::proptest! {
        #[test]
        fn clamped_sampling_is_always_within_unit_interval(p in proptest::prelude::any::<f64>().prop_filter("finite", |p| p.is_finite())) {
            let filters = StreamingFilters { level: None, events: None, sampling: Some(p) }.clamped();
            let clamped = filters.sampling.expect("sampling stays Some through clamped()");
            proptest::prop_assert!((0.0..=1.0).contains(&clamped));
        }
    }

    #[test]
    fn client_event_round_trip_start_streaming() {
        let event = ClientEvent::StartStreaming {
            filters: Some(StreamingFilters {
                level: Some(Severity::Warn),
                events: Some(vec![LogEventKind::Http, LogEventKind::Tcp]),
                sampling: Some(0.5),
            }),
        };
        let text = encode_client_event(&event);
        assert_eq!(decode_client_event(&text).unwrap(), event);
    }

    #[test]
    fn client_event_round_trip_start_streaming_no_filters() {
        let event = ClientEvent::StartStreaming { filters: None };
        let text = encode_client_event(&event);
        assert_eq!(decode_client_event(&text).unwrap(), event);
    }

    #[test]
    fn client_event_round_trip_stop_streaming() {
        let event = ClientEvent::StopStreaming;
        let text = encode_client_event(&event);
        assert_eq!(decode_client_event(&text).unwrap(), event);
    }

    #[test]
    fn unrecognized_discriminator_decodes_to_unknown() {
        let decoded = decode_client_event(r#"{"type":"reticulate_splines"}"#).unwrap();
        assert_eq!(decoded, ClientEvent::Unknown);
    }

    #[test]
    fn malformed_start_streaming_is_its_own_error() {
        let err = decode_client_event(r#"{"type":"start_streaming","filters":"not-an-object"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }

    #[test]
    fn server_event_round_trip_logs() {
        let event = ServerEvent::Logs {
            logs: vec![LogEvent {
                time: "2006-01-02T15:04:05Z".to_owned(),
                level: Severity::Info,
                event: LogEventKind::Http,
                message: "hello".to_owned(),
                fields: Map::new(),
            }],
        };
        let text = encode_server_event(&event);
        assert_eq!(decode_server_event(&text).unwrap(), event);
    }

    #[test]
    fn log_event_parse_upgrades_severity_on_error_field() {
        let raw = br#"{"level":"info","error":"boom","event":1,"message":"oops"}"#;
        let parsed = LogEvent::parse(raw).unwrap();
        assert_eq!(parsed.level, Severity::Error);
        assert_eq!(parsed.event, LogEventKind::Http);
        assert!(parsed.fields.contains_key("error"));
        assert!(!parsed.fields.contains_key("level"));
        assert!(!parsed.fields.contains_key("event"));
        assert!(!parsed.fields.contains_key("message"));
    }

    #[test]
    fn log_event_parse_defaults_kind_and_level() {
        let raw = br#"{"message":"hi","extra":42}"#;
        let parsed = LogEvent::parse(raw).unwrap();
        assert_eq!(parsed.level, Severity::Debug);
        assert_eq!(parsed.event, LogEventKind::CloudflaredCore);
        assert_eq!(parsed.fields.get("extra").and_then(Value::as_i64), Some(42));
    }

    #[test]
    fn log_event_parse_preserves_caller_supplied_time() {
        let raw = br#"{"time":"2020-01-01T00:00:00Z","message":"hi"}"#;
        let parsed = LogEvent::parse(raw).unwrap();
        assert_eq!(parsed.time, "2020-01-01T00:00:00Z");
    }

    #[rstest::rstest]
    #[case(2.0, 1.0)]
    #[case(-1.0, 0.0)]
    #[case(0.9999999, 0.9999999)]
    #[case(0.0, 0.0)]
    #[case(1.0, 1.0)]
    fn filters_clamp_sampling_to_unit_interval(#[case] input: f64, #[case] expected: f64) {
        let filters = StreamingFilters {
            level: None,
            events: None,
            sampling: Some(input),
        }
        .clamped();
        assert_eq!(filters.sampling, Some(expected));
    }
}
