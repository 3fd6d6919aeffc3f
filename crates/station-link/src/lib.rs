//! Station link - persistent, self-healing client link to a station relay
//!
//! One bidirectional socket carries the handshake, heartbeats, event
//! acknowledgements, tunneled HTTP requests, and real-time signaling. This
//! crate owns the connection lifecycle: it authenticates the link, detects
//! silent failure, reconnects without operator intervention, correlates
//! request/reply pairs over the unordered transport, and multiplexes the
//! three application protocols through the single connection.
//!
//! Collaborators (transport, signer, local HTTP handler, keep-alive hooks)
//! are injected per link instance; there are no process-wide singletons.

pub mod config;
pub mod correlation;
pub mod diagnostics;
pub mod error;
mod handshake;
pub mod http_tunnel;
pub mod keepalive;
pub mod link;
pub mod liveness;
mod router;
mod signaling;
pub mod signer;
pub mod state;

pub use config::{LinkConfig, LinkConfigBuilder, NodeConfig};
pub use correlation::AckResult;
pub use diagnostics::{DiagnosticsRecorder, LinkDiagnostics};
pub use error::LinkError;
pub use http_tunnel::{HandlerError, HttpForwarder, LocalHttpHandler, LocalResponse};
pub use keepalive::KeepAliveHooks;
pub use link::{LinkCollaborators, LinkSnapshot, StationLink};
pub use liveness::LivenessSample;
pub use signer::{BearerSigner, EventSigner, SignError};
pub use state::{LinkEvent, LinkState, StationIdentity};

pub use station_proto::{
    Envelope, GeoPoint, HttpTunnelRequest, HttpTunnelResponse, NodeDescriptor, SignalFrame,
    SignalKind, SignedEvent,
};
pub use station_transport::{
    Transport, TransportError, TransportEvent, TransportFactory, TransportHandle,
};
