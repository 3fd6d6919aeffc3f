//! Tunnel router: inbound frame dispatch
//!
//! Classifies decoded envelopes and hands each to the right sub-handler:
//! event acks and signaling answers resolve the correlation table, tunnel
//! requests fan out to per-request tasks, heartbeats feed the liveness
//! sample, and anything unrecognized or malformed is logged and dropped —
//! a bad frame must never tear down the link.

use crate::correlation::AckResult;
use crate::http_tunnel;
use crate::link::LinkWorker;
use crate::signaling;
use crate::state::{LinkEvent, LinkState, StationIdentity};
use station_proto::{Envelope, HttpTunnelRequest};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

impl LinkWorker {
    pub(crate) async fn route_frame(&mut self, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        trace!(kind = envelope.kind(), "inbound frame");

        match envelope {
            Envelope::HelloAck {
                success,
                station_id,
                relay_hint,
                message,
            } => {
                self.on_hello_ack(success, station_id, relay_hint, message)
                    .await;
            }
            Envelope::Ping => self.on_station_ping().await,
            Envelope::Pong => {
                self.liveness.record_pong(Instant::now());
                self.diagnostics.mark_pong(self.liveness.consecutive_misses);
            }
            Envelope::EventAck {
                event_id,
                success,
                message,
            } => {
                self.pending.resolve(
                    &event_id,
                    AckResult {
                        success,
                        message,
                        payload: None,
                    },
                );
            }
            Envelope::HttpRequest(request) => self.on_tunnel_request(request),
            Envelope::HttpResponse(response) => {
                debug!(
                    request_id = %response.request_id,
                    "unexpected HTTP_RESPONSE frame, dropping"
                );
            }
            Envelope::Signal(frame) => {
                signaling::route_signal(frame, &mut self.pending, &self.signals_tx);
            }
            Envelope::UpdateNotice { fields } => {
                info!(notice = ?fields, "station update notice");
                let _ = self.events_tx.send(LinkEvent::UpdateNotice { fields });
            }
            Envelope::Hello { .. } | Envelope::Event { .. } => {
                debug!("unexpected outbound-only frame from station, dropping");
            }
            Envelope::Unrecognized { kind } => {
                warn!(kind = %kind, "unrecognized frame kind, dropping");
            }
        }
    }

    async fn on_hello_ack(
        &mut self,
        success: bool,
        station_id: Option<String>,
        relay_hint: Option<String>,
        message: Option<String>,
    ) {
        if !success {
            let reason = message.unwrap_or_else(|| "handshake rejected".to_string());
            error!(reason = %reason, "station rejected handshake");
            // A rejection requires operator action; the reconnect loop must
            // not hammer a station that actively refused us.
            self.maintain = false;
            self.grace_deadline = None;
            self.ack_deadline = None;
            if let Some(transport) = self.transport.take() {
                transport.close().await;
            }
            self.inbound = None;
            self.station = None;
            self.set_state(LinkState::Disconnected);
            if self.announced {
                self.announced = false;
                let _ = self.events_tx.send(LinkEvent::Disconnected);
            }
            return;
        }

        let Some(station_id) = station_id else {
            warn!("hello_ack without station_id, dropping");
            return;
        };

        self.ack_deadline = None;
        // Recovered inside the grace window: the pending disconnect
        // notification is cancelled and never observed.
        self.grace_deadline = None;
        self.station = Some(StationIdentity {
            station_id: station_id.clone(),
            relay_hint,
        });
        self.liveness.record_pong(Instant::now());
        self.reconnect_failures = 0;
        self.set_state(LinkState::Connected);

        if self.forced_reconnect {
            self.forced_reconnect = false;
            if let Some(hooks) = &self.collab.keepalive {
                hooks.on_external_service_restarted();
            }
        }

        if self.announced {
            debug!(station_id = %station_id, "duplicate handshake ack while connected, ignoring");
        } else {
            self.announced = true;
            info!(station_id = %station_id, "link connected");
            let _ = self.events_tx.send(LinkEvent::Connected { station_id });
        }
    }

    async fn on_station_ping(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        match Envelope::Pong.encode() {
            Ok(raw) => {
                if let Err(e) = transport.send(&raw).await {
                    warn!(error = %e, "pong send failed");
                }
            }
            Err(e) => error!(error = %e, "pong encode failed"),
        }
    }

    /// Fan a tunneled HTTP request out to its own task. The task sends
    /// exactly one response frame in every branch, so the station never
    /// sees a request vanish.
    fn on_tunnel_request(&mut self, request: HttpTunnelRequest) {
        let Some(transport) = self.transport.clone() else {
            warn!(
                request_id = %request.request_id,
                "tunnel request with no open transport, dropping"
            );
            return;
        };
        let handler = self.collab.http.clone();

        tokio::spawn(async move {
            let response = http_tunnel::run_request(handler.as_ref(), &request).await;
            let request_id = response.request_id.clone();
            match Envelope::HttpResponse(response).encode() {
                Ok(raw) => {
                    if let Err(e) = transport.send(&raw).await {
                        warn!(
                            request_id = %request_id,
                            error = %e,
                            "failed to send tunnel response"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        request_id = %request_id,
                        error = %e,
                        "failed to encode tunnel response"
                    );
                }
            }
        });
    }
}
