//! Node identity types carried in the handshake

use serde::{Deserialize, Serialize};

/// Approximate geographic position advertised by a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Snap both coordinates to the given granularity (e.g. 0.01 degrees).
    /// A non-positive granularity leaves the point unchanged.
    pub fn rounded(self, granularity: f64) -> Self {
        if granularity <= 0.0 {
            return self;
        }
        Self {
            lat: (self.lat / granularity).round() * granularity,
            lon: (self.lon / granularity).round() * granularity,
        }
    }
}

/// Self-describing node descriptor sent inside the identity assertion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDescriptor {
    /// Stable address identifier of this device
    pub address_id: String,
    /// Human-readable display label
    pub label: String,
    /// Optional coarse location (already rounded by the sender)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Platform tag, e.g. "linux", "macos", "android"
    pub platform: String,
}

impl Default for NodeDescriptor {
    fn default() -> Self {
        Self {
            address_id: String::new(),
            label: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            location: None,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// A signed identity-assertion event, produced by an external signer.
///
/// The signature scheme is opaque to this crate; `sig` is whatever the
/// signer collaborator emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedEvent {
    pub id: String,
    pub created_at: i64,
    pub content: serde_json::Value,
    pub sig: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_rounding() {
        let point = GeoPoint {
            lat: 52.520008,
            lon: 13.404954,
        };
        let rounded = point.rounded(0.01);
        assert!((rounded.lat - 52.52).abs() < 1e-9);
        assert!((rounded.lon - 13.40).abs() < 1e-9);
    }

    #[test]
    fn test_geo_point_zero_granularity_is_identity() {
        let point = GeoPoint {
            lat: 1.23456,
            lon: -7.891,
        };
        assert_eq!(point.rounded(0.0), point);
        assert_eq!(point.rounded(-1.0), point);
    }

    #[test]
    fn test_descriptor_default_has_platform() {
        let descriptor = NodeDescriptor::default();
        assert!(!descriptor.platform.is_empty());
        assert!(descriptor.location.is_none());
    }
}
