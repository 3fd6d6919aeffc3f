//! Wire envelope types and the JSON codec
//!
//! Every frame on the station socket is a JSON object carrying a `type`
//! discriminator, with two exceptions kept for wire compatibility: the
//! legacy array acknowledgement form `["OK", event_id, success, message?]`
//! and the plain-text `UPDATE:` notice, which is not JSON at all.
//!
//! Decoding never panics and never fails on an unknown discriminator:
//! unknown `type` values map to [`Envelope::Unrecognized`] so a
//! future-version frame cannot tear down the link.

use crate::node::SignedEvent;
use crate::UPDATE_NOTICE_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// An HTTP request tunneled from the station to this device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTunnelRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// The reply frame for a tunneled HTTP request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTunnelResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "responseHeaders")]
    pub response_headers: BTreeMap<String, String>,
    #[serde(rename = "responseBody")]
    pub response_body: String,
    #[serde(rename = "isBase64")]
    pub is_base64: bool,
}

/// Signaling frame discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SignalKind {
    #[default]
    Offer,
    Answer,
    Ice,
    Bye,
}

impl SignalKind {
    pub fn as_type_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "webrtc_offer",
            SignalKind::Answer => "webrtc_answer",
            SignalKind::Ice => "webrtc_ice",
            SignalKind::Bye => "webrtc_bye",
        }
    }

    fn from_type_str(kind: &str) -> Option<Self> {
        match kind {
            "webrtc_offer" => Some(SignalKind::Offer),
            "webrtc_answer" => Some(SignalKind::Answer),
            "webrtc_ice" => Some(SignalKind::Ice),
            "webrtc_bye" => Some(SignalKind::Bye),
            _ => None,
        }
    }
}

/// A real-time signaling frame relayed through the station.
///
/// The payload is opaque to the link; only the envelope fields and the
/// session id are ever inspected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalFrame {
    #[serde(skip)]
    pub kind: SignalKind,
    #[serde(rename = "fromId")]
    pub from_id: String,
    #[serde(rename = "toId")]
    pub to_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// A decoded station frame
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Outbound identity assertion
    Hello { event: SignedEvent },
    /// Outbound signed application event, acknowledged with an `OK` frame
    /// correlated by the event id
    Event { event: SignedEvent },
    /// Station's reply to the identity assertion
    HelloAck {
        success: bool,
        station_id: Option<String>,
        relay_hint: Option<String>,
        message: Option<String>,
    },
    Ping,
    Pong,
    /// Acknowledgement of a previously published event
    EventAck {
        event_id: String,
        success: bool,
        message: Option<String>,
    },
    HttpRequest(HttpTunnelRequest),
    HttpResponse(HttpTunnelResponse),
    Signal(SignalFrame),
    /// Out-of-band plain-text notice, parsed positionally after the prefix
    UpdateNotice { fields: Vec<String> },
    /// Well-formed JSON with a discriminator this version does not know
    Unrecognized { kind: String },
}

#[derive(Deserialize)]
struct HelloWire {
    event: SignedEvent,
}

#[derive(Deserialize)]
struct HelloAckWire {
    success: bool,
    #[serde(default)]
    station_id: Option<String>,
    #[serde(default)]
    relay_hint: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct EventAckWire {
    event_id: String,
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

impl Envelope {
    /// Short discriminator name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Hello { .. } => "hello",
            Envelope::Event { .. } => "EVENT",
            Envelope::HelloAck { .. } => "hello_ack",
            Envelope::Ping => "PING",
            Envelope::Pong => "PONG",
            Envelope::EventAck { .. } => "OK",
            Envelope::HttpRequest(_) => "HTTP_REQUEST",
            Envelope::HttpResponse(_) => "HTTP_RESPONSE",
            Envelope::Signal(frame) => frame.kind.as_type_str(),
            Envelope::UpdateNotice { .. } => "UPDATE",
            Envelope::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Decode a raw text frame.
    ///
    /// Returns `Err` only for frames that cannot be interpreted at all;
    /// unknown discriminators decode to [`Envelope::Unrecognized`].
    pub fn decode(raw: &str) -> Result<Envelope, ProtoError> {
        let trimmed = raw.trim();

        // Out-of-band notice: not JSON, parsed positionally as
        // `UPDATE:<version>:<url>`. The trailing field may itself contain
        // colons, so only the first separator splits.
        if let Some(rest) = trimmed.strip_prefix(UPDATE_NOTICE_PREFIX) {
            let fields = rest.splitn(2, ':').map(str::to_string).collect();
            return Ok(Envelope::UpdateNotice { fields });
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| ProtoError::Malformed(e.to_string()))?;

        match value {
            Value::Array(items) => Self::decode_legacy_array(items),
            Value::Object(_) => Self::decode_object(value),
            other => Err(ProtoError::Malformed(format!(
                "expected object or array, got {other}"
            ))),
        }
    }

    /// Legacy acknowledgement form: `["OK", event_id, success, message?]`
    fn decode_legacy_array(items: Vec<Value>) -> Result<Envelope, ProtoError> {
        let kind = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtoError::Malformed("array frame without leading tag".into()))?;

        if kind != "OK" {
            return Ok(Envelope::Unrecognized {
                kind: kind.to_string(),
            });
        }

        let event_id = items
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtoError::Malformed("legacy ack without event id".into()))?
            .to_string();
        let success = items
            .get(2)
            .and_then(Value::as_bool)
            .ok_or_else(|| ProtoError::Malformed("legacy ack without success flag".into()))?;
        let message = items.get(3).and_then(Value::as_str).map(str::to_string);

        Ok(Envelope::EventAck {
            event_id,
            success,
            message,
        })
    }

    fn decode_object(value: Value) -> Result<Envelope, ProtoError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtoError::Malformed("object frame without type field".into()))?
            .to_string();

        let malformed = |e: serde_json::Error| ProtoError::Malformed(e.to_string());

        match kind.as_str() {
            "hello" => {
                let wire: HelloWire = serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::Hello { event: wire.event })
            }
            "EVENT" => {
                let wire: HelloWire = serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::Event { event: wire.event })
            }
            "hello_ack" => {
                let wire: HelloAckWire = serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::HelloAck {
                    success: wire.success,
                    station_id: wire.station_id,
                    relay_hint: wire.relay_hint,
                    message: wire.message,
                })
            }
            "PING" => Ok(Envelope::Ping),
            "PONG" => Ok(Envelope::Pong),
            "OK" => {
                let wire: EventAckWire = serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::EventAck {
                    event_id: wire.event_id,
                    success: wire.success,
                    message: wire.message,
                })
            }
            "HTTP_REQUEST" => {
                let request: HttpTunnelRequest =
                    serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::HttpRequest(request))
            }
            "HTTP_RESPONSE" => {
                let response: HttpTunnelResponse =
                    serde_json::from_value(value).map_err(malformed)?;
                Ok(Envelope::HttpResponse(response))
            }
            _ => {
                if let Some(signal_kind) = SignalKind::from_type_str(&kind) {
                    let mut frame: SignalFrame =
                        serde_json::from_value(value).map_err(malformed)?;
                    frame.kind = signal_kind;
                    Ok(Envelope::Signal(frame))
                } else {
                    Ok(Envelope::Unrecognized { kind })
                }
            }
        }
    }

    /// Encode an envelope to its raw text form
    pub fn encode(&self) -> Result<String, ProtoError> {
        let encode_err = |e: serde_json::Error| ProtoError::Encode(e.to_string());

        let value = match self {
            Envelope::Hello { event } => serde_json::json!({
                "type": "hello",
                "event": event,
            }),
            Envelope::Event { event } => serde_json::json!({
                "type": "EVENT",
                "event": event,
            }),
            Envelope::HelloAck {
                success,
                station_id,
                relay_hint,
                message,
            } => serde_json::json!({
                "type": "hello_ack",
                "success": success,
                "station_id": station_id,
                "relay_hint": relay_hint,
                "message": message,
            }),
            Envelope::Ping => serde_json::json!({ "type": "PING" }),
            Envelope::Pong => serde_json::json!({ "type": "PONG" }),
            Envelope::EventAck {
                event_id,
                success,
                message,
            } => serde_json::json!({
                "type": "OK",
                "event_id": event_id,
                "success": success,
                "message": message,
            }),
            Envelope::HttpRequest(request) => {
                let mut value = serde_json::to_value(request).map_err(encode_err)?;
                tag(&mut value, "HTTP_REQUEST");
                value
            }
            Envelope::HttpResponse(response) => {
                let mut value = serde_json::to_value(response).map_err(encode_err)?;
                tag(&mut value, "HTTP_RESPONSE");
                value
            }
            Envelope::Signal(frame) => {
                let mut value = serde_json::to_value(frame).map_err(encode_err)?;
                tag(&mut value, frame.kind.as_type_str());
                value
            }
            Envelope::UpdateNotice { fields } => {
                return Ok(format!("{}{}", UPDATE_NOTICE_PREFIX, fields.join(":")));
            }
            Envelope::Unrecognized { kind } => {
                return Err(ProtoError::Encode(format!(
                    "refusing to encode unrecognized frame kind '{kind}'"
                )));
            }
        };

        serde_json::to_string(&value).map_err(encode_err)
    }
}

fn tag(value: &mut Value, kind: &str) {
    if let Value::Object(map) = value {
        map.insert("type".to_string(), Value::String(kind.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hello_ack() {
        let raw = r#"{"type":"hello_ack","success":true,"station_id":"X3AAAA"}"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(
            envelope,
            Envelope::HelloAck {
                success: true,
                station_id: Some("X3AAAA".to_string()),
                relay_hint: None,
                message: None,
            }
        );
    }

    #[test]
    fn test_decode_event_ack_object_and_legacy_array_agree() {
        let object = Envelope::decode(r#"{"type":"OK","event_id":"evt-1","success":true}"#);
        let array = Envelope::decode(r#"["OK","evt-1",true]"#);
        assert_eq!(object.unwrap(), array.unwrap());
    }

    #[test]
    fn test_decode_legacy_array_with_message() {
        let envelope = Envelope::decode(r#"["OK","evt-9",false,"rate limited"]"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::EventAck {
                event_id: "evt-9".to_string(),
                success: false,
                message: Some("rate limited".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(Envelope::decode(r#"{"type":"PING"}"#).unwrap(), Envelope::Ping);
        assert_eq!(Envelope::decode(r#"{"type":"PONG"}"#).unwrap(), Envelope::Pong);
    }

    #[test]
    fn test_decode_unknown_type_is_unrecognized_not_error() {
        let envelope = Envelope::decode(r#"{"type":"future_thing","x":1}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::Unrecognized {
                kind: "future_thing".to_string()
            }
        );
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(Envelope::decode("not json at all").is_err());
        assert!(Envelope::decode("42").is_err());
        assert!(Envelope::decode(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn test_decode_update_notice_positionally() {
        let envelope = Envelope::decode("UPDATE:1.4.2:https://example.org/dl").unwrap();
        assert_eq!(
            envelope,
            Envelope::UpdateNotice {
                fields: vec!["1.4.2".to_string(), "https://example.org/dl".to_string()],
            }
        );
    }

    #[test]
    fn test_http_request_decode() {
        let raw = r#"{"type":"HTTP_REQUEST","requestId":"r-1","method":"GET","path":"/api/items","headers":{"accept":"application/json"}}"#;
        match Envelope::decode(raw).unwrap() {
            Envelope::HttpRequest(request) => {
                assert_eq!(request.request_id, "r-1");
                assert_eq!(request.method, "GET");
                assert_eq!(request.path, "/api/items");
                assert_eq!(
                    request.headers.unwrap().get("accept").map(String::as_str),
                    Some("application/json")
                );
                assert!(request.body.is_none());
            }
            other => panic!("expected HttpRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_http_response_round_trip() {
        let response = HttpTunnelResponse {
            request_id: "r-7".to_string(),
            status_code: 200,
            response_headers: BTreeMap::from([(
                "content-type".to_string(),
                "text/plain".to_string(),
            )]),
            response_body: "hello".to_string(),
            is_base64: false,
        };
        let raw = Envelope::HttpResponse(response.clone()).encode().unwrap();
        assert_eq!(Envelope::decode(&raw).unwrap(), Envelope::HttpResponse(response));
    }

    #[test]
    fn test_signal_frame_round_trip_keeps_kind() {
        let frame = SignalFrame {
            kind: SignalKind::Answer,
            from_id: "node-a".to_string(),
            to_id: "node-b".to_string(),
            session_id: "sess-1".to_string(),
            payload: serde_json::json!({"sdp": "v=0"}),
        };
        let raw = Envelope::Signal(frame.clone()).encode().unwrap();
        assert!(raw.contains("webrtc_answer"));
        assert_eq!(Envelope::decode(&raw).unwrap(), Envelope::Signal(frame));
    }

    #[test]
    fn test_signal_payload_is_opaque() {
        let raw = r#"{"type":"webrtc_ice","fromId":"a","toId":"b","sessionId":"s","payload":{"candidate":"whatever","weird":[1,2]}}"#;
        match Envelope::decode(raw).unwrap() {
            Envelope::Signal(frame) => {
                assert_eq!(frame.kind, SignalKind::Ice);
                assert_eq!(frame.payload["weird"][1], 2);
            }
            other => panic!("expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_ping_matches_wire_shape() {
        assert_eq!(Envelope::Ping.encode().unwrap(), r#"{"type":"PING"}"#);
    }
}
