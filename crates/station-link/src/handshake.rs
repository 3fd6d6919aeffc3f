//! Handshake negotiation
//!
//! Builds the identity assertion sent as the first frame on a fresh
//! transport. The caller must hold a usable signing credential; without one
//! the attempt fails fast and performs no side effects.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::signer::{EventSigner, SignError};
use station_proto::{Envelope, NodeDescriptor};

/// Assemble the node descriptor advertised to the station, with the
/// location snapped to the configured granularity.
pub(crate) fn build_descriptor(config: &LinkConfig) -> NodeDescriptor {
    NodeDescriptor {
        address_id: config.node.address_id.clone(),
        label: config.node.label.clone(),
        location: config
            .node
            .location
            .map(|point| point.rounded(config.location_granularity)),
        platform: config.node.platform.clone(),
    }
}

/// Build the signed hello envelope, or fail fast without side effects
pub(crate) fn build_hello(
    config: &LinkConfig,
    signer: &dyn EventSigner,
) -> Result<Envelope, LinkError> {
    if !signer.has_credential() {
        return Err(LinkError::MissingCredential);
    }

    let descriptor = build_descriptor(config);
    let event = signer.sign(&descriptor).map_err(|e| match e {
        SignError::MissingCredential => LinkError::MissingCredential,
        SignError::Failed(message) => LinkError::Signing(message),
    })?;

    Ok(Envelope::Hello { event })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::BearerSigner;
    use station_proto::GeoPoint;

    fn config_with_location() -> LinkConfig {
        let mut config = LinkConfig::builder()
            .station_url("wss://station.example.org/link")
            .address_id("addr-1")
            .label("bench")
            .build()
            .unwrap();
        config.node.location = Some(GeoPoint {
            lat: 52.520008,
            lon: 13.404954,
        });
        config
    }

    #[test]
    fn test_descriptor_location_is_rounded() {
        let descriptor = build_descriptor(&config_with_location());
        let location = descriptor.location.unwrap();
        assert!((location.lat - 52.52).abs() < 1e-9);
        assert!((location.lon - 13.40).abs() < 1e-9);
    }

    #[test]
    fn test_hello_fails_fast_without_credential() {
        let signer = BearerSigner::new("");
        let result = build_hello(&config_with_location(), &signer);
        assert!(matches!(result, Err(LinkError::MissingCredential)));
    }

    #[test]
    fn test_hello_carries_signed_descriptor() {
        let signer = BearerSigner::new("tok");
        match build_hello(&config_with_location(), &signer).unwrap() {
            Envelope::Hello { event } => {
                assert_eq!(event.content["address_id"], "addr-1");
                assert_eq!(event.content["label"], "bench");
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }
}
