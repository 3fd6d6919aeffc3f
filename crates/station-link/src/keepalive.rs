//! Platform keep-alive boundary
//!
//! Some platforms run a foreground service that must be nudged when the
//! link needs the process kept alive through a reconnect. The link core
//! only calls into this seam; it never contains platform logic itself.

/// Optional collaborator invoked by the liveness and reconnection paths
pub trait KeepAliveHooks: Send + Sync {
    /// The watchdog gave up on the current socket; the platform layer may
    /// want to wake or re-pin the hosting process while the link recovers.
    fn on_external_ping_requested(&self) {}

    /// The link re-established and acknowledged a handshake after a forced
    /// closure.
    fn on_external_service_restarted(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        pings: AtomicUsize,
    }

    impl KeepAliveHooks for Counting {
        fn on_external_ping_requested(&self) {
            self.pings.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_default_methods_are_no_ops() {
        struct Silent;
        impl KeepAliveHooks for Silent {}
        Silent.on_external_ping_requested();
        Silent.on_external_service_restarted();
    }

    #[test]
    fn test_hooks_are_invokable_through_dyn() {
        let hooks = Counting::default();
        let as_dyn: &dyn KeepAliveHooks = &hooks;
        as_dyn.on_external_ping_requested();
        assert_eq!(hooks.pings.load(Ordering::SeqCst), 1);
    }
}
