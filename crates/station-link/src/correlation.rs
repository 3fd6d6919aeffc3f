//! Correlation table for request/reply pairing
//!
//! Outbound requests are registered here before the envelope is ever
//! transmitted, so a reply racing the registration can never be lost. Each
//! entry is removed exactly once: either by a matching inbound frame or by
//! the caller's timeout. Disconnection does not touch outstanding entries;
//! their timeouts alone govern their lifetime.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result delivered to a waiting caller
#[derive(Debug, Clone, PartialEq)]
pub struct AckResult {
    pub success: bool,
    pub message: Option<String>,
    /// Full reply payload for frames that carry one (e.g. signaling answers)
    pub payload: Option<Value>,
}

impl AckResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            payload: None,
        }
    }
}

/// Pending request map, owned exclusively by the link worker
#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<String, oneshot::Sender<AckResult>>,
}

impl CorrelationTable {
    /// Register a waiter. An id already outstanding is replaced; the
    /// superseded caller observes its reply channel closing.
    pub(crate) fn register(&mut self, correlation_id: &str, tx: oneshot::Sender<AckResult>) {
        if self.pending.insert(correlation_id.to_string(), tx).is_some() {
            warn!(
                correlation_id = %correlation_id,
                "correlation id registered twice, superseding the outstanding request"
            );
        }
    }

    /// Resolve a waiter. A reply with no matching entry (late or duplicate)
    /// is discarded; that is never an error to any caller.
    pub(crate) fn resolve(&mut self, correlation_id: &str, result: AckResult) -> bool {
        match self.pending.remove(correlation_id) {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!(
                        correlation_id = %correlation_id,
                        "caller gone before reply arrived"
                    );
                }
                true
            }
            None => {
                debug!(
                    correlation_id = %correlation_id,
                    "reply without pending entry, discarding"
                );
                false
            }
        }
    }

    /// Remove a waiter after its timeout elapsed
    pub(crate) fn cancel(&mut self, correlation_id: &str) {
        if self.pending.remove(correlation_id).is_some() {
            debug!(correlation_id = %correlation_id, "pending request cancelled");
        }
    }

    pub(crate) fn contains(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let mut table = CorrelationTable::default();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        table.register("a", tx_a);
        table.register("b", tx_b);

        assert!(table.resolve(
            "b",
            AckResult {
                success: true,
                message: Some("second first".to_string()),
                payload: None,
            }
        ));
        assert!(table.resolve("a", AckResult::ok()));

        let b = rx_b.await.unwrap();
        let a = rx_a.await.unwrap();
        assert_eq!(b.message.as_deref(), Some("second first"));
        assert!(a.success);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_a_no_op() {
        let mut table = CorrelationTable::default();
        assert!(!table.resolve("ghost", AckResult::ok()));
    }

    #[tokio::test]
    async fn test_cancel_removes_entry_and_closes_channel() {
        let mut table = CorrelationTable::default();
        let (tx, rx) = oneshot::channel();
        table.register("evt-1", tx);
        table.cancel("evt-1");

        assert!(!table.contains("evt-1"));
        assert!(rx.await.is_err());
        // A late reply after cancellation is discarded silently.
        assert!(!table.resolve("evt-1", AckResult::ok()));
    }
}
