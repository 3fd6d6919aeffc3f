//! Signaling relay demultiplexing
//!
//! The link never interprets signaling payloads, only the envelope and the
//! session id. An answer matching a pending correlated request resolves
//! that request directly; every other frame is published for external
//! signaling consumers.

use crate::correlation::{AckResult, CorrelationTable};
use serde_json::Value;
use station_proto::{SignalFrame, SignalKind};
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub(crate) fn route_signal(
    frame: SignalFrame,
    pending: &mut CorrelationTable,
    signals_tx: &broadcast::Sender<SignalFrame>,
) {
    if frame.kind == SignalKind::Answer && pending.contains(&frame.session_id) {
        let session_id = frame.session_id.clone();
        let payload = frame_payload(&frame);
        pending.resolve(
            &session_id,
            AckResult {
                success: true,
                message: None,
                payload: Some(payload),
            },
        );
        return;
    }

    match signals_tx.send(frame) {
        Ok(receivers) => trace!(receivers, "signal published"),
        Err(_) => debug!("no signaling subscribers, dropping frame"),
    }
}

/// The full frame as JSON, with its wire discriminator restored
fn frame_payload(frame: &SignalFrame) -> Value {
    let mut value = serde_json::to_value(frame).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert(
            "type".to_string(),
            Value::String(frame.kind.as_type_str().to_string()),
        );
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn frame(kind: SignalKind, session_id: &str) -> SignalFrame {
        SignalFrame {
            kind,
            from_id: "peer-a".to_string(),
            to_id: "peer-b".to_string(),
            session_id: session_id.to_string(),
            payload: serde_json::json!({"sdp": "v=0"}),
        }
    }

    #[tokio::test]
    async fn test_answer_resolves_pending_session() {
        let mut pending = CorrelationTable::default();
        let (signals_tx, mut signals_rx) = broadcast::channel(8);
        let (tx, rx) = oneshot::channel();
        pending.register("sess-1", tx);

        route_signal(frame(SignalKind::Answer, "sess-1"), &mut pending, &signals_tx);

        let result = rx.await.unwrap();
        assert!(result.success);
        let payload = result.payload.unwrap();
        assert_eq!(payload["type"], "webrtc_answer");
        assert_eq!(payload["sessionId"], "sess-1");
        // Resolved directly, not broadcast.
        assert!(signals_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offer_is_broadcast() {
        let mut pending = CorrelationTable::default();
        let (signals_tx, mut signals_rx) = broadcast::channel(8);

        route_signal(frame(SignalKind::Offer, "sess-2"), &mut pending, &signals_tx);

        let published = signals_rx.try_recv().unwrap();
        assert_eq!(published.kind, SignalKind::Offer);
        assert_eq!(published.session_id, "sess-2");
    }

    #[tokio::test]
    async fn test_answer_without_pending_session_is_broadcast() {
        let mut pending = CorrelationTable::default();
        let (signals_tx, mut signals_rx) = broadcast::channel(8);

        route_signal(frame(SignalKind::Answer, "sess-3"), &mut pending, &signals_tx);

        assert_eq!(signals_rx.try_recv().unwrap().kind, SignalKind::Answer);
    }

    #[tokio::test]
    async fn test_no_subscribers_is_not_an_error() {
        let mut pending = CorrelationTable::default();
        let (signals_tx, _) = broadcast::channel::<SignalFrame>(8);
        route_signal(frame(SignalKind::Bye, "sess-4"), &mut pending, &signals_tx);
    }
}
