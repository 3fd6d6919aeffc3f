//! In-memory transport and collaborators for link behavior tests

use async_trait::async_trait;
use station_link::{
    HandlerError, LinkConfig, LocalHttpHandler, LocalResponse, NodeConfig,
};
use station_proto::Envelope;
use station_transport::{
    Transport, TransportError, TransportEvent, TransportFactory, TransportHandle,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Link config with timer values tuned so reconnection completes well
/// inside the grace window under paused time.
pub fn test_config() -> LinkConfig {
    LinkConfig {
        station_url: "mem://station".to_string(),
        node: NodeConfig {
            address_id: "addr-test".to_string(),
            label: "test-node".to_string(),
            location: None,
            platform: "test".to_string(),
        },
        auto_reconnect: true,
        ping_interval: Duration::from_secs(60),
        watchdog_interval: Duration::from_secs(10),
        pong_timeout: Duration::from_secs(120),
        ping_stale: Duration::from_secs(60),
        miss_limit: 3,
        grace_period: Duration::from_secs(30),
        reconnect_poll: Duration::from_secs(5),
        ack_timeout: Duration::from_secs(10),
        location_granularity: 0.01,
        diagnostics_path: None,
    }
}

struct MemoryTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent_tx
            .send(text.to_string())
            .map_err(|_| TransportError::SendFailed("station end gone".to_string()))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Test-side handle to one accepted connection
pub struct StationEnd {
    sent: mpsc::UnboundedReceiver<String>,
    inject: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl StationEnd {
    /// Next frame the link sent, decoded
    pub async fn recv_envelope(&mut self) -> Envelope {
        let raw = self.sent.recv().await.expect("link closed its send side");
        Envelope::decode(&raw).expect("link sent an undecodable frame")
    }

    /// Next non-heartbeat frame the link sent
    pub async fn recv_non_heartbeat(&mut self) -> Envelope {
        loop {
            match self.recv_envelope().await {
                Envelope::Ping | Envelope::Pong => continue,
                envelope => return envelope,
            }
        }
    }

    /// Inject a PING and read frames until the matching PONG comes back,
    /// proving the link has drained everything injected before it. Returns
    /// any non-heartbeat frames seen along the way.
    pub async fn sync(&mut self) -> Vec<Envelope> {
        self.inject_frame(r#"{"type":"PING"}"#).await;
        let mut skipped = Vec::new();
        loop {
            match self.recv_envelope().await {
                Envelope::Pong => return skipped,
                Envelope::Ping => continue,
                envelope => skipped.push(envelope),
            }
        }
    }

    pub async fn inject_frame(&self, raw: impl Into<String>) {
        self.inject
            .send(TransportEvent::Frame(raw.into()))
            .await
            .expect("link dropped its inbound stream");
    }

    pub async fn ack_hello(&self, station_id: &str) {
        self.inject_frame(format!(
            r#"{{"type":"hello_ack","success":true,"station_id":"{station_id}"}}"#
        ))
        .await;
    }

    pub async fn reject_hello(&self, message: &str) {
        self.inject_frame(format!(
            r#"{{"type":"hello_ack","success":false,"message":"{message}"}}"#
        ))
        .await;
    }

    /// Simulate the socket dropping out from under the link
    pub async fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self
            .inject
            .send(TransportEvent::Closed {
                reason: Some("dropped by test".to_string()),
            })
            .await;
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Transport factory producing in-memory connections, one [`StationEnd`]
/// per accepted connect call
pub struct MemoryFactory {
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
    conn_tx: mpsc::UnboundedSender<StationEnd>,
}

impl MemoryFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StationEnd>) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                conn_tx,
            }),
            conn_rx,
        )
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MemoryFactory {
    async fn connect(&self, _url: &str) -> Result<TransportHandle, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("refused by test".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let open = Arc::new(AtomicBool::new(true));

        self.conn_tx
            .send(StationEnd {
                sent: sent_rx,
                inject: event_tx,
                open: open.clone(),
            })
            .map_err(|_| TransportError::ConnectFailed("test harness gone".to_string()))?;

        Ok(TransportHandle {
            transport: Arc::new(MemoryTransport { sent_tx, open }),
            events: event_rx,
        })
    }
}

/// Local handler scripted by path:
/// `/ok` replies 200 text, `/bytes` replies 200 with a non-UTF-8 body,
/// `/missing` is unroutable, `/down` simulates an unreachable local
/// server, anything else fails internally.
pub struct ScriptedHandler;

#[async_trait]
impl LocalHttpHandler for ScriptedHandler {
    async fn handle(
        &self,
        _method: &str,
        path: &str,
        _headers: &BTreeMap<String, String>,
        _body: Option<&[u8]>,
    ) -> Result<LocalResponse, HandlerError> {
        match path {
            "/ok" => Ok(LocalResponse {
                status: 200,
                headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "text/plain".to_string(),
                )]),
                body: b"local says hi".to_vec(),
            }),
            "/bytes" => Ok(LocalResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: vec![0u8, 159, 146, 150],
            }),
            "/missing" => Err(HandlerError::NotFound(path.to_string())),
            "/down" => Err(HandlerError::Unreachable("connection refused".to_string())),
            other => Err(HandlerError::Internal(format!("exploded on {other}"))),
        }
    }
}
