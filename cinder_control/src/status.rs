//! Connection status observation and fan-out.
//!
//! The platform is the source of truth for the underlying tunnel state:
//! every raw notification is accepted, normalized onto a reduced state set
//! and cached. A single subscriber receives the cached value immediately on
//! subscription, then each normalized transition in notification order.

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::subscriber::{SubscriberSlot, SubscriptionHandle};

/// Raw platform connection status for the active profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}

/// Normalized connection state visible to external consumers.
///
/// `Invalid` collapses to `Disconnected` and `Reasserting` to `Connecting`,
/// so downstream consumers see idle / transitioning / active instead of
/// every platform nuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Wire string pushed to the app-facing status stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RawStatus> for ConnectionState {
    fn from(raw: RawStatus) -> Self {
        match raw {
            RawStatus::Connected => ConnectionState::Connected,
            RawStatus::Connecting | RawStatus::Reasserting => ConnectionState::Connecting,
            RawStatus::Disconnecting => ConnectionState::Disconnecting,
            RawStatus::Disconnected | RawStatus::Invalid => ConnectionState::Disconnected,
        }
    }
}

/// Subscribes to platform status notifications for the active profile,
/// normalizes them and fans the result out to the current subscriber.
pub struct StatusObserver {
    current: Arc<Mutex<ConnectionState>>,
    slot: SubscriberSlot<ConnectionState>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl StatusObserver {
    pub fn new() -> Self {
        StatusObserver {
            current: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            slot: SubscriberSlot::new(),
            feed: Mutex::new(None),
        }
    }

    /// The cached current state. Readable from any thread; never fails.
    pub fn current(&self) -> ConnectionState {
        *self.current.lock().unwrap()
    }

    /// Replace the notification feed for a (new) active profile.
    ///
    /// The previous feed task is cancelled first, so a stale profile can
    /// never keep reporting status or deliver duplicates.
    pub fn attach(&self, mut notifications: mpsc::UnboundedReceiver<RawStatus>) {
        let current = Arc::clone(&self.current);
        let slot = self.slot.clone();

        let mut feed = self.feed.lock().unwrap();
        if let Some(old) = feed.take() {
            old.abort();
        }
        *feed = Some(tokio::spawn(async move {
            while let Some(raw) = notifications.recv().await {
                let state = ConnectionState::from(raw);
                // Cache write and push happen under the cache lock, the
                // same lock `subscribe` holds while reading the seed and
                // installing the slot; a seed can therefore never lag a
                // pushed transition.
                let mut cached = current.lock().unwrap();
                *cached = state;
                debug!(?raw, %state, "tunnel status changed");
                slot.push(state);
            }
        }));
    }

    /// Install the status subscriber (most recent subscription wins). The
    /// cached current value is pushed immediately, so a newly attached UI
    /// observes the correct status without waiting for a transition.
    pub fn subscribe(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<ConnectionState>) {
        // Held across the install so the feed task cannot update the cache
        // and push between reading the seed and installing the slot.
        let current = self.current.lock().unwrap();
        self.slot.replace(Some(*current))
    }

    /// Clear the subscriber slot if `handle` still identifies it.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.slot.clear(handle);
    }
}

impl Default for StatusObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StatusObserver {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.lock().unwrap().take() {
            feed.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_normalization() {
        assert_eq!(
            ConnectionState::from(RawStatus::Reasserting),
            ConnectionState::Connecting
        );
        assert_eq!(
            ConnectionState::from(RawStatus::Invalid),
            ConnectionState::Disconnected
        );
        assert_eq!(
            ConnectionState::from(RawStatus::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            ConnectionState::from(RawStatus::Disconnecting),
            ConnectionState::Disconnecting
        );
    }

    #[tokio::test]
    async fn test_cache_is_last_write_wins() {
        let observer = StatusObserver::new();
        let (tx, rx) = mpsc::unbounded_channel();
        observer.attach(rx);

        for raw in [
            RawStatus::Connecting,
            RawStatus::Connected,
            RawStatus::Reasserting,
            RawStatus::Invalid,
            RawStatus::Connecting,
        ] {
            tx.send(raw).unwrap();
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(observer.current(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_subscribe_pushes_cached_value_first() {
        let observer = StatusObserver::new();
        let (tx, rx) = mpsc::unbounded_channel();
        observer.attach(rx);

        tx.send(RawStatus::Connected).unwrap();
        sleep(Duration::from_millis(50)).await;

        let (_handle, mut status_rx) = observer.subscribe();
        assert_eq!(status_rx.try_recv().unwrap(), ConnectionState::Connected);

        tx.send(RawStatus::Disconnecting).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(
            status_rx.try_recv().unwrap(),
            ConnectionState::Disconnecting
        );
    }

    #[tokio::test]
    async fn test_transitions_are_delivered_in_order() {
        let observer = StatusObserver::new();
        let (tx, rx) = mpsc::unbounded_channel();
        observer.attach(rx);

        let (_handle, mut status_rx) = observer.subscribe();
        assert_eq!(status_rx.recv().await.unwrap(), ConnectionState::Disconnected);

        for raw in [RawStatus::Connecting, RawStatus::Connected, RawStatus::Disconnecting] {
            tx.send(raw).unwrap();
        }

        assert_eq!(status_rx.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(status_rx.recv().await.unwrap(), ConnectionState::Connected);
        assert_eq!(
            status_rx.recv().await.unwrap(),
            ConnectionState::Disconnecting
        );
    }

    #[tokio::test]
    async fn test_attach_cancels_previous_feed() {
        let observer = StatusObserver::new();

        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        observer.attach(stale_rx);

        let (fresh_tx, fresh_rx) = mpsc::unbounded_channel();
        observer.attach(fresh_rx);
        sleep(Duration::from_millis(20)).await;

        // The stale profile's notifications no longer reach the cache.
        stale_tx.send(RawStatus::Connected).ok();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(observer.current(), ConnectionState::Disconnected);

        fresh_tx.send(RawStatus::Connecting).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(observer.current(), ConnectionState::Connecting);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_never_misses_a_concurrent_transition() {
        for _ in 0..200 {
            let observer = StatusObserver::new();
            let (tx, rx) = mpsc::unbounded_channel();
            observer.attach(rx);

            let feed = tokio::spawn(async move {
                tx.send(RawStatus::Connected).unwrap();
            });

            let (_handle, mut status_rx) = observer.subscribe();

            // Either the seed already carries the transition or the push
            // follows it; the transition is never lost.
            let mut last = status_rx.recv().await.unwrap();
            while last != ConnectionState::Connected {
                last = tokio::time::timeout(Duration::from_secs(1), status_rx.recv())
                    .await
                    .expect("transition delivered")
                    .unwrap();
            }
            feed.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_slot() {
        let observer = StatusObserver::new();
        let (handle, mut status_rx) = observer.subscribe();
        assert_eq!(status_rx.try_recv().unwrap(), ConnectionState::Disconnected);

        observer.unsubscribe(&handle);

        let (tx, rx) = mpsc::unbounded_channel();
        observer.attach(rx);
        tx.send(RawStatus::Connected).unwrap();
        sleep(Duration::from_millis(50)).await;

        // Cached, not pushed: the slot is empty.
        assert_eq!(observer.current(), ConnectionState::Connected);
        assert!(status_rx.try_recv().is_err());
    }
}
