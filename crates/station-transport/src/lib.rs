//! Transport trait for station links
//!
//! The link core owns exactly one transport connection at a time and is the
//! only component that touches it. Implementations (WebSocket, in-memory
//! test doubles) live in their own crates and are injected through
//! [`TransportFactory`].

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events delivered by an open transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete inbound text frame
    Frame(String),
    /// The connection is gone; no further events will follow
    Closed { reason: Option<String> },
}

/// An open bidirectional connection to the station
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text frame
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection
    async fn close(&self);

    /// Whether the connection is still usable
    fn is_open(&self) -> bool;
}

/// An established connection plus its inbound event stream
pub struct TransportHandle {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transport connections to a station URL
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportHandle, TransportError>;
}
