//! Station Protocol Definitions
//!
//! This crate defines the wire envelopes exchanged between a device and its
//! station relay, plus the JSON codec that maps raw socket frames onto them.

pub mod envelope;
pub mod node;

pub use envelope::{
    Envelope, HttpTunnelRequest, HttpTunnelResponse, ProtoError, SignalFrame, SignalKind,
};
pub use node::{GeoPoint, NodeDescriptor, SignedEvent};

/// Protocol version advertised in the identity assertion
pub const PROTOCOL_VERSION: u32 = 1;

/// Prefix for the out-of-band plain-text update notice
pub const UPDATE_NOTICE_PREFIX: &str = "UPDATE:";
