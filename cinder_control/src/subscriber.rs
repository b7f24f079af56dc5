//! Single-slot subscriber support.
//!
//! Both the status observer and the log relay fan out to at most one
//! subscriber per facade instance: the most recent subscription wins, and
//! unsubscribing clears the slot only when the handle still matches.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle identifying one subscription. Unsubscribing with a stale handle
/// is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    fn new() -> Self {
        SubscriptionHandle(Uuid::new_v4())
    }
}

/// The zero-or-one subscriber slot.
pub(crate) struct SubscriberSlot<T> {
    inner: Arc<Mutex<Option<(SubscriptionHandle, mpsc::UnboundedSender<T>)>>>,
}

impl<T> Clone for SubscriberSlot<T> {
    fn clone(&self) -> Self {
        SubscriberSlot {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SubscriberSlot<T> {
    pub(crate) fn new() -> Self {
        SubscriberSlot {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a new subscriber, replacing any previous one. When `seed` is
    /// given it is pushed before the slot becomes visible, so the new
    /// subscriber observes the seed ahead of any later value.
    pub(crate) fn replace(
        &self,
        seed: Option<T>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();

        let mut slot = self.inner.lock().unwrap();
        if let Some(value) = seed {
            let _ = tx.send(value);
        }
        *slot = Some((handle.clone(), tx));

        (handle, rx)
    }

    /// Clear the slot if `handle` still identifies the active subscriber.
    pub(crate) fn clear(&self, handle: &SubscriptionHandle) -> bool {
        let mut slot = self.inner.lock().unwrap();
        match slot.as_ref() {
            Some((current, _)) if current == handle => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a subscriber is currently attached.
    pub(crate) fn is_attached(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Push one value to the subscriber, if any. A closed receiver clears
    /// the slot. Returns whether the value was delivered.
    pub(crate) fn push(&self, value: T) -> bool {
        let mut slot = self.inner.lock().unwrap();
        match slot.as_ref() {
            Some((_, tx)) => {
                if tx.send(value).is_ok() {
                    true
                } else {
                    *slot = None;
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_subscription_wins() {
        let slot: SubscriberSlot<u32> = SubscriberSlot::new();

        let (first_handle, mut first_rx) = slot.replace(None);
        let (_second_handle, mut second_rx) = slot.replace(None);

        assert!(slot.push(7));
        assert_eq!(second_rx.try_recv().unwrap(), 7);
        assert!(first_rx.try_recv().is_err());

        // Stale handle cannot clear the new subscriber.
        assert!(!slot.clear(&first_handle));
        assert!(slot.is_attached());
    }

    #[test]
    fn test_seed_is_delivered_first() {
        let slot: SubscriberSlot<u32> = SubscriberSlot::new();
        let (_handle, mut rx) = slot.replace(Some(1));
        slot.push(2);

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_dropped_receiver_clears_slot() {
        let slot: SubscriberSlot<u32> = SubscriberSlot::new();
        let (_handle, rx) = slot.replace(None);
        drop(rx);

        assert!(!slot.push(1));
        assert!(!slot.is_attached());
    }
}
