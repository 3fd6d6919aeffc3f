//! Link error taxonomy

use station_proto::ProtoError;
use station_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the station link.
///
/// Failures local to one correlated call or one tunneled request stay with
/// that caller; only transport and liveness failures escalate to the
/// reconnection machinery.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No usable signing credential; fatal to a connect attempt, never retried
    #[error("no usable signing credential")]
    MissingCredential,

    /// Signer had a credential but could not produce an identity assertion
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Station refused the identity assertion; requires operator action
    #[error("handshake rejected by station: {0}")]
    HandshakeRejected(String),

    /// Returned only to the caller whose request timed out; the link stays up
    #[error("request '{correlation_id}' timed out waiting for a reply")]
    CorrelationTimeout { correlation_id: String },

    #[error("codec error: {0}")]
    Codec(#[from] ProtoError),

    /// The link worker has shut down
    #[error("link is closed")]
    LinkClosed,
}
