//! WebSocket transport implementation using tokio-tungstenite
//!
//! One WebSocket connection per station link, text frames only. The
//! connection is split into a writer task fed by an mpsc channel and a
//! reader task that maps inbound messages onto [`TransportEvent`]s; the
//! link core never sees tungstenite types.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use station_transport::{Transport, TransportError, TransportEvent, TransportFactory, TransportHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use url::Url;

/// Capacity of the outbound frame channel
const OUTBOUND_BUFFER: usize = 256;

/// Capacity of the inbound event channel
const INBOUND_BUFFER: usize = 256;

/// WebSocket transport factory for station links
#[derive(Debug, Default)]
pub struct WsTransportFactory;

impl WsTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn connect(&self, url: &str) -> Result<TransportHandle, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::ConnectFailed(format!("invalid url '{url}': {e}")))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(parsed.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let connection_id = format!("ws-{}", uuid::Uuid::new_v4());
        debug!(connection_id = %connection_id, url = %parsed, "WebSocket connected");

        let (ws_sink, ws_source) = ws_stream.split();
        let (frame_tx, frame_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(INBOUND_BUFFER);
        let open = Arc::new(AtomicBool::new(true));

        let writer_open = open.clone();
        let writer_id = connection_id.clone();
        tokio::spawn(async move {
            writer_task(ws_sink, frame_rx, writer_open, writer_id).await;
        });

        let reader_open = open.clone();
        let reader_id = connection_id.clone();
        tokio::spawn(async move {
            reader_task(ws_source, event_tx, reader_open, reader_id).await;
        });

        let transport = Arc::new(WsTransport {
            connection_id,
            frame_tx,
            open,
        });

        Ok(TransportHandle {
            transport,
            events: event_rx,
        })
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

type WsSource = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
>;

/// Writer task - sends queued frames to the WebSocket
async fn writer_task(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<Message>,
    open: Arc<AtomicBool>,
    connection_id: String,
) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            error!(connection_id = %connection_id, error = %e, "WebSocket send error");
            break;
        }
        if is_close {
            break;
        }
    }

    debug!(connection_id = %connection_id, "WebSocket writer task ended");
    open.store(false, Ordering::SeqCst);
    let _ = sink.close().await;
}

/// Reader task - maps inbound WebSocket messages onto transport events
async fn reader_task(
    mut source: WsSource,
    event_tx: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
    connection_id: String,
) {
    let mut close_reason = None;

    while let Some(result) = source.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if event_tx.send(TransportEvent::Frame(text)).await.is_err() {
                    warn!(connection_id = %connection_id, "event receiver dropped, stopping reader");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                // The station protocol is text-only.
                warn!(connection_id = %connection_id, "dropping unexpected binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong replies are handled by tungstenite itself.
                trace!(connection_id = %connection_id, "websocket-level heartbeat");
            }
            Ok(Message::Close(frame)) => {
                close_reason = frame.map(|f| f.reason.to_string());
                debug!(connection_id = %connection_id, "WebSocket close received");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket read error");
                close_reason = Some(e.to_string());
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = event_tx
        .send(TransportEvent::Closed {
            reason: close_reason,
        })
        .await;
    debug!(connection_id = %connection_id, "WebSocket reader task ended");
}

/// An open WebSocket connection to the station
pub struct WsTransport {
    connection_id: String,
    frame_tx: mpsc::Sender<Message>,
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("connection_id", &self.connection_id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.frame_tx
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|_| TransportError::SendFailed("writer task gone".to_string()))
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(connection_id = %self.connection_id, "closing WebSocket");
            let _ = self.frame_tx.send(Message::Close(None)).await;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
