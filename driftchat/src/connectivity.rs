//! Online/offline signal shared across the delivery layer.
//!
//! Wraps a [`tokio::sync::watch`] channel: the platform's reachability
//! callback drives [`ConnectivityMonitor::set_online`], and consumers hold
//! a [`watch::Receiver`] to read the current state or await transitions.

use tokio::sync::watch;

/// Source of truth for the client's connectivity state.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Updates the connectivity state. No-op notifications are suppressed
    /// so flapping callbacks do not trigger spurious replays.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                tracing::debug!(online, "connectivity changed");
                *current = online;
                true
            }
        });
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver for observing state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Waits until the receiver reports an online state.
///
/// Returns `false` if the monitor was dropped while still offline.
pub async fn wait_until_online(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|online| *online).await.is_ok()
}
