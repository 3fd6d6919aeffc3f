//! The station link: public handle and the state-owning worker
//!
//! One worker task owns all mutable link state (lifecycle state, liveness
//! sample, correlation table, the transport itself). Commands from
//! callers, inbound transport events, and the three timers are all
//! serialized through its `select!` loop, so no lock is ever held across a
//! suspension point. Callers interact through the cloneable [`StationLink`]
//! handle; `send_and_await` suspends only the calling task.

use crate::config::LinkConfig;
use crate::correlation::{AckResult, CorrelationTable};
use crate::diagnostics::DiagnosticsRecorder;
use crate::error::LinkError;
use crate::handshake;
use crate::http_tunnel::LocalHttpHandler;
use crate::keepalive::KeepAliveHooks;
use crate::liveness::LivenessSample;
use crate::signer::EventSigner;
use crate::state::{LinkEvent, LinkState, StationIdentity};
use station_proto::{Envelope, SignalFrame};
use station_transport::{Transport, TransportError, TransportEvent, TransportFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the command channel between handles and the worker
const COMMAND_BUFFER: usize = 64;

/// Capacity of the event and signaling broadcast channels
const BROADCAST_BUFFER: usize = 64;

/// External collaborators a link is constructed with.
///
/// Everything the link needs from the outside world is injected here;
/// there are no process-wide singletons, so multiple links can coexist
/// and tests can substitute any seam.
pub struct LinkCollaborators {
    pub transport: Arc<dyn TransportFactory>,
    pub signer: Arc<dyn EventSigner>,
    pub http: Arc<dyn LocalHttpHandler>,
    pub keepalive: Option<Arc<dyn KeepAliveHooks>>,
}

/// Point-in-time view of the link, for inspection and tests
#[derive(Debug, Clone)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub station: Option<StationIdentity>,
    pub outstanding_requests: usize,
    pub reconnect_failures: u64,
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<bool, LinkError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Register {
        correlation_id: String,
        envelope: Envelope,
        reply: oneshot::Sender<AckResult>,
    },
    Cancel {
        correlation_id: String,
    },
    Inspect {
        reply: oneshot::Sender<LinkSnapshot>,
    },
}

/// Cloneable handle to a running station link
#[derive(Clone)]
pub struct StationLink {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LinkEvent>,
    signals_tx: broadcast::Sender<SignalFrame>,
}

impl StationLink {
    /// Spawn a link worker with its collaborators. The link starts
    /// disconnected; call [`StationLink::connect`] to bring it up.
    pub fn spawn(config: LinkConfig, collaborators: LinkCollaborators) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, _) = broadcast::channel(BROADCAST_BUFFER);
        let (signals_tx, _) = broadcast::channel(BROADCAST_BUFFER);

        let diagnostics = DiagnosticsRecorder::new(config.diagnostics_path.clone());
        let worker = LinkWorker {
            config,
            collab: collaborators,
            cmd_rx,
            events_tx: events_tx.clone(),
            signals_tx: signals_tx.clone(),
            state: LinkState::Disconnected,
            station: None,
            transport: None,
            inbound: None,
            liveness: LivenessSample::default(),
            pending: CorrelationTable::default(),
            maintain: false,
            announced: false,
            grace_deadline: None,
            ack_deadline: None,
            reconnect_failures: 0,
            forced_reconnect: false,
            diagnostics,
        };
        tokio::spawn(worker.run());

        Self {
            cmd_tx,
            events_tx,
            signals_tx,
        }
    }

    /// Bring the link up. Returns once the identity assertion was accepted
    /// by the transport; the handshake ack arrives asynchronously and is
    /// observable via [`StationLink::subscribe`].
    pub async fn connect(&self) -> Result<bool, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { reply: tx })
            .await
            .map_err(|_| LinkError::LinkClosed)?;
        rx.await.map_err(|_| LinkError::LinkClosed)?
    }

    /// Tear the link down and disable reconnection until the next
    /// `connect()`. Outstanding correlated requests are left to their own
    /// timeouts.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { reply: tx })
            .await
            .map_err(|_| LinkError::LinkClosed)?;
        rx.await.map_err(|_| LinkError::LinkClosed)
    }

    /// Fire-and-forget send on the open transport
    pub async fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                envelope,
                reply: tx,
            })
            .await
            .map_err(|_| LinkError::LinkClosed)?;
        rx.await.map_err(|_| LinkError::LinkClosed)?
    }

    /// Send an envelope and suspend until a correlated reply arrives or
    /// the timeout elapses. The pending entry is registered before the
    /// envelope is transmitted and removed in both outcomes.
    pub async fn send_and_await(
        &self,
        envelope: Envelope,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<AckResult, LinkError> {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register {
                correlation_id: correlation_id.clone(),
                envelope,
                reply: tx,
            })
            .await
            .map_err(|_| LinkError::LinkClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(LinkError::LinkClosed),
            Err(_) => {
                let _ = self
                    .cmd_tx
                    .send(Command::Cancel {
                        correlation_id: correlation_id.clone(),
                    })
                    .await;
                Err(LinkError::CorrelationTimeout { correlation_id })
            }
        }
    }

    /// Publish a signed event and await the station's acknowledgement,
    /// correlated by the event id.
    pub async fn publish_event(
        &self,
        event: station_proto::SignedEvent,
        timeout: Duration,
    ) -> Result<AckResult, LinkError> {
        let correlation_id = event.id.clone();
        self.send_and_await(Envelope::Event { event }, correlation_id, timeout)
            .await
    }

    /// Subscribe to connection state transitions. At most one
    /// `Connected`/`Disconnected` event fires per real transition.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribe to relayed signaling frames (everything except answers
    /// that resolved a pending correlated request).
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SignalFrame> {
        self.signals_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Result<LinkSnapshot, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Inspect { reply: tx })
            .await
            .map_err(|_| LinkError::LinkClosed)?;
        rx.await.map_err(|_| LinkError::LinkClosed)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(
            self.snapshot().await,
            Ok(LinkSnapshot {
                state: LinkState::Connected,
                ..
            })
        )
    }
}

/// The state-owning worker behind a [`StationLink`]
pub(crate) struct LinkWorker {
    pub(crate) config: LinkConfig,
    pub(crate) collab: LinkCollaborators,
    pub(crate) cmd_rx: mpsc::Receiver<Command>,
    pub(crate) events_tx: broadcast::Sender<LinkEvent>,
    pub(crate) signals_tx: broadcast::Sender<SignalFrame>,
    pub(crate) state: LinkState,
    pub(crate) station: Option<StationIdentity>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) inbound: Option<mpsc::Receiver<TransportEvent>>,
    pub(crate) liveness: LivenessSample,
    pub(crate) pending: CorrelationTable,
    /// Whether the link should heal itself; cleared by explicit disconnect
    /// and by handshake rejection
    pub(crate) maintain: bool,
    /// Whether subscribers currently believe the link is connected
    pub(crate) announced: bool,
    pub(crate) grace_deadline: Option<Instant>,
    pub(crate) ack_deadline: Option<Instant>,
    pub(crate) reconnect_failures: u64,
    /// Set when the watchdog forced a closure, so a later successful
    /// handshake can notify the keep-alive boundary
    pub(crate) forced_reconnect: bool,
    pub(crate) diagnostics: DiagnosticsRecorder,
}

impl LinkWorker {
    pub(crate) async fn run(mut self) {
        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        let mut watchdog_timer = tokio::time::interval(self.config.watchdog_interval);
        let mut reconnect_timer = tokio::time::interval(self.config.reconnect_poll);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        watchdog_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reconnect_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ping_timer.tick().await;
        watchdog_timer.tick().await;
        reconnect_timer.tick().await;

        loop {
            let grace_at = self.grace_deadline;
            let ack_at = self.ack_deadline;

            tokio::select! {
                maybe_command = self.cmd_rx.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                maybe_event = next_transport_event(&mut self.inbound), if self.inbound.is_some() => {
                    match maybe_event {
                        Some(TransportEvent::Frame(raw)) => self.route_frame(&raw).await,
                        Some(TransportEvent::Closed { reason }) => {
                            self.on_transport_closed(reason).await;
                        }
                        None => {
                            self.on_transport_closed(Some("event stream ended".to_string()))
                                .await;
                        }
                    }
                }
                _ = ping_timer.tick() => self.on_ping_tick().await,
                _ = watchdog_timer.tick() => self.on_watchdog_tick().await,
                _ = reconnect_timer.tick() => self.on_reconnect_tick().await,
                _ = sleep_until_opt(grace_at), if grace_at.is_some() => self.on_grace_expired(),
                _ = sleep_until_opt(ack_at), if ack_at.is_some() => self.on_ack_timeout().await,
            }
        }

        // All handles dropped: release the transport. Pending correlated
        // requests resolve as closed channels on the caller side.
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        debug!("link worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = self.on_connect_requested().await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.on_disconnect_requested().await;
                let _ = reply.send(());
            }
            Command::Send { envelope, reply } => {
                let result = self.send_envelope(&envelope).await;
                let _ = reply.send(result);
            }
            Command::Register {
                correlation_id,
                envelope,
                reply,
            } => {
                // Register before transmitting so a reply racing the send
                // can never be lost.
                self.pending.register(&correlation_id, reply);
                if let Err(e) = self.send_envelope(&envelope).await {
                    // The entry stays; the caller's timeout governs it.
                    warn!(correlation_id = %correlation_id, error = %e, "correlated send failed");
                }
            }
            Command::Cancel { correlation_id } => self.pending.cancel(&correlation_id),
            Command::Inspect { reply } => {
                let _ = reply.send(LinkSnapshot {
                    state: self.state,
                    station: self.station.clone(),
                    outstanding_requests: self.pending.len(),
                    reconnect_failures: self.reconnect_failures,
                });
            }
        }
    }

    async fn on_connect_requested(&mut self) -> Result<bool, LinkError> {
        if matches!(
            self.state,
            LinkState::Connected | LinkState::Connecting | LinkState::AwaitingHandshakeAck
        ) {
            return Ok(true);
        }
        // Fail fast with zero side effects when no credential is loaded.
        if !self.collab.signer.has_credential() {
            return Err(LinkError::MissingCredential);
        }
        self.maintain = self.config.auto_reconnect;
        Ok(self.attempt_connect().await)
    }

    async fn on_disconnect_requested(&mut self) {
        info!("caller-initiated disconnect");
        self.maintain = false;
        self.grace_deadline = None;
        self.ack_deadline = None;
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.inbound = None;
        self.station = None;
        self.liveness = LivenessSample::default();
        self.set_state(LinkState::Disconnected);
        if self.announced {
            self.announced = false;
            let _ = self.events_tx.send(LinkEvent::Disconnected);
        }
        // Outstanding correlated requests are deliberately left to their
        // own timeouts.
    }

    /// One handshake attempt: open the transport, send the signed identity
    /// assertion, arm liveness and the ack deadline. Returns true once the
    /// transport accepted the send; the ack itself arrives asynchronously.
    pub(crate) async fn attempt_connect(&mut self) -> bool {
        let hello = match handshake::build_hello(&self.config, self.collab.signer.as_ref()) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(error = %e, "cannot build identity assertion");
                self.enter_idle();
                return false;
            }
        };
        let raw = match hello.encode() {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "identity assertion encode failed");
                self.enter_idle();
                return false;
            }
        };

        self.set_state(LinkState::Connecting);
        info!(url = %self.config.station_url, "connecting to station");

        let handle = match self.collab.transport.connect(&self.config.station_url).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "station connect failed");
                self.note_attempt_failure();
                self.enter_idle();
                return false;
            }
        };

        if let Err(e) = handle.transport.send(&raw).await {
            warn!(error = %e, "failed to send identity assertion");
            handle.transport.close().await;
            self.note_attempt_failure();
            self.enter_idle();
            return false;
        }

        let now = Instant::now();
        self.transport = Some(handle.transport);
        self.inbound = Some(handle.events);
        self.liveness.arm(now);
        self.ack_deadline = Some(now + self.config.ack_timeout);
        self.set_state(LinkState::AwaitingHandshakeAck);
        self.diagnostics.mark_hello();
        true
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), LinkError> {
        let raw = envelope.encode()?;
        match &self.transport {
            Some(transport) => transport.send(&raw).await.map_err(LinkError::from),
            None => Err(LinkError::Transport(TransportError::Closed)),
        }
    }

    pub(crate) async fn on_transport_closed(&mut self, reason: Option<String>) {
        if self.transport.is_none() && self.inbound.is_none() {
            return;
        }
        warn!(
            reason = reason.as_deref().unwrap_or("unknown"),
            "transport closed"
        );
        self.transport = None;
        self.inbound = None;
        self.station = None;
        self.ack_deadline = None;
        self.link_down();
    }

    /// Common path for losing the socket. With auto-reconnect on, a link
    /// that subscribers believe is up enters the grace window instead of
    /// announcing the loss; reconnecting inside the window means no
    /// disconnect notification is ever emitted.
    pub(crate) fn link_down(&mut self) {
        if self.maintain {
            if self.announced && self.grace_deadline.is_none() {
                self.grace_deadline = Some(Instant::now() + self.config.grace_period);
            }
            if self.grace_deadline.is_some() {
                self.set_state(LinkState::GracePeriod);
            } else {
                self.set_state(LinkState::Reconnecting);
            }
        } else {
            self.set_state(LinkState::Disconnected);
            if self.announced {
                self.announced = false;
                let _ = self.events_tx.send(LinkEvent::Disconnected);
            }
        }
    }

    async fn on_ping_tick(&mut self) {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        if !transport.is_open() {
            return;
        }
        match Envelope::Ping.encode() {
            Ok(raw) => match transport.send(&raw).await {
                Ok(()) => {
                    self.liveness.record_ping(Instant::now());
                    self.diagnostics.mark_ping();
                }
                // A transient send failure is tolerated; only the watchdog
                // miss count forces a reconnect.
                Err(e) => warn!(error = %e, "ping send failed"),
            },
            Err(e) => error!(error = %e, "ping encode failed"),
        }
    }

    async fn on_watchdog_tick(&mut self) {
        // Liveness never runs without an open socket.
        if self.transport.is_none() {
            return;
        }
        let misses_before = self.liveness.consecutive_misses;
        if self.liveness.evaluate(Instant::now(), &self.config) {
            warn!("heartbeat miss limit reached, forcing reconnect");
            self.forced_reconnect = true;
            if let Some(hooks) = &self.collab.keepalive {
                hooks.on_external_ping_requested();
            }
            if let Some(transport) = self.transport.take() {
                transport.close().await;
            }
            self.inbound = None;
            self.station = None;
            self.ack_deadline = None;
            self.diagnostics.set_misses(0);
            self.link_down();
        } else if self.liveness.consecutive_misses != misses_before {
            self.diagnostics.set_misses(self.liveness.consecutive_misses);
        }
    }

    async fn on_reconnect_tick(&mut self) {
        if !self.maintain || self.transport.is_some() {
            return;
        }
        if !matches!(self.state, LinkState::Reconnecting | LinkState::GracePeriod) {
            return;
        }
        if !self.collab.signer.has_credential() {
            debug!("skipping reconnect attempt: no usable credential");
            return;
        }
        debug!(failures = self.reconnect_failures, "reconnect attempt");
        self.attempt_connect().await;
    }

    fn on_grace_expired(&mut self) {
        self.grace_deadline = None;
        if self.state == LinkState::Connected {
            return;
        }
        info!("grace period expired without recovery");
        if self.announced {
            self.announced = false;
            let _ = self.events_tx.send(LinkEvent::Disconnected);
        }
        self.enter_idle();
    }

    async fn on_ack_timeout(&mut self) {
        self.ack_deadline = None;
        if self.state != LinkState::AwaitingHandshakeAck {
            return;
        }
        warn!("handshake ack timed out, abandoning attempt");
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.inbound = None;
        self.note_attempt_failure();
        self.enter_idle();
    }

    pub(crate) fn note_attempt_failure(&mut self) {
        self.reconnect_failures += 1;
        self.diagnostics.mark_reconnect(self.reconnect_failures);
    }

    /// Resting state for a link without a socket
    pub(crate) fn enter_idle(&mut self) {
        let next = if self.grace_deadline.is_some() {
            LinkState::GracePeriod
        } else if self.maintain {
            LinkState::Reconnecting
        } else {
            LinkState::Disconnected
        };
        self.set_state(next);
    }

    pub(crate) fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!(from = self.state.as_str(), to = next.as_str(), "link state transition");
            self.state = next;
            let station_id = self.station.as_ref().map(|s| s.station_id.clone());
            self.diagnostics.set_state(next, station_id.as_deref());
        }
    }
}

async fn next_transport_event(
    inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
