//! Event signer collaborator
//!
//! Signature schemes are out of scope for the link core; it only needs to
//! know whether a usable credential exists and to obtain a signed identity
//! assertion. Real deployments inject their own implementation.

use station_proto::{NodeDescriptor, SignedEvent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("no usable signing credential")]
    MissingCredential,

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Signs identity-assertion events on behalf of the link
pub trait EventSigner: Send + Sync {
    /// Whether a usable credential is loaded. `connect()` fails fast when
    /// this is false and must not create a new identity as a side effect.
    fn has_credential(&self) -> bool;

    fn sign(&self, descriptor: &NodeDescriptor) -> Result<SignedEvent, SignError>;
}

/// Bearer-token signer: attaches an opaque pre-shared token as the
/// signature. Suitable wherever the station authenticates by token rather
/// than by verifiable signature.
pub struct BearerSigner {
    token: String,
}

impl BearerSigner {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl EventSigner for BearerSigner {
    fn has_credential(&self) -> bool {
        !self.token.is_empty()
    }

    fn sign(&self, descriptor: &NodeDescriptor) -> Result<SignedEvent, SignError> {
        if self.token.is_empty() {
            return Err(SignError::MissingCredential);
        }
        let content = serde_json::to_value(descriptor)
            .map_err(|e| SignError::Failed(e.to_string()))?;
        Ok(SignedEvent {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            content,
            sig: self.token.clone(),
        })
    }
}
