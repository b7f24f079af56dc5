//! Diagnostic log relay.
//!
//! The tunnel worker cannot call back into the foreground process, so it
//! appends diagnostic lines to a bounded shared buffer; a poller here
//! periodically drains the buffer and forwards each line, in arrival
//! order, to the subscriber. This channel carries diagnostics only, never
//! control data: once the bound is reached, the oldest entries are
//! dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::subscriber::{SubscriberSlot, SubscriptionHandle};

/// Default bound on buffered diagnostic lines.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Default poll interval for the drain tick.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded, append-only buffer shared between the worker-side producer and
/// the foreground poller. Implementations stand in for whatever transport
/// crosses the process boundary.
pub trait LogBuffer: Send + Sync {
    /// Append one diagnostic line. Safe to call concurrently with a drain.
    fn append(&self, line: String);

    /// Read and remove all buffered lines in one atomic step, preserving
    /// arrival order. Lines appended concurrently stay for the next drain.
    fn drain(&self) -> Vec<String>;

    /// Number of buffered lines.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`LogBuffer`] guarded by one coarse lock, so append and
/// read+trim are each a single atomic step.
pub struct BoundedLogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl BoundedLogBuffer {
    pub fn new(capacity: usize) -> Self {
        BoundedLogBuffer {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl LogBuffer for BoundedLogBuffer {
    fn append(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == self.capacity {
            // Lossy by design at the bound; always keep the most recent.
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn drain(&self) -> Vec<String> {
        self.lines.lock().unwrap().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

/// Foreground poller that moves buffered lines to the subscriber.
pub struct LogRelay {
    buffer: Arc<dyn LogBuffer>,
    slot: SubscriberSlot<String>,
    poller: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl LogRelay {
    pub fn new(buffer: Arc<dyn LogBuffer>, interval: Duration) -> Self {
        LogRelay {
            buffer,
            slot: SubscriberSlot::new(),
            poller: Mutex::new(None),
            interval,
        }
    }

    /// Producer-side handle to the shared buffer.
    pub fn buffer(&self) -> Arc<dyn LogBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Start the periodic drain tick, replacing any previous poller.
    pub fn start(&self) {
        let buffer = Arc::clone(&self.buffer);
        let slot = self.slot.clone();
        let interval = self.interval;

        let mut poller = self.poller.lock().unwrap();
        if let Some(old) = poller.take() {
            old.abort();
        }
        *poller = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                drain_into(&buffer, &slot);
            }
        }));
    }

    /// Stop the poller. Buffered lines keep accumulating up to the bound.
    pub fn stop(&self) {
        if let Some(poller) = self.poller.lock().unwrap().take() {
            poller.abort();
        }
    }

    /// Run one drain cycle immediately, without waiting for the poller
    /// tick. Test seam.
    #[cfg(test)]
    fn drain_cycle(&self) {
        drain_into(&self.buffer, &self.slot);
    }

    /// Install the log subscriber (most recent subscription wins). No
    /// replay: delivery starts with the next drained line.
    pub fn subscribe(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<String>) {
        self.slot.replace(None)
    }

    /// Clear the subscriber slot if `handle` still identifies it.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.slot.clear(handle);
    }
}

impl Drop for LogRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain only while a subscriber is attached; otherwise entries accumulate
/// in the buffer, bounded by its capacity.
fn drain_into(buffer: &Arc<dyn LogBuffer>, slot: &SubscriberSlot<String>) {
    if !slot.is_attached() {
        return;
    }
    for line in buffer.drain() {
        if !slot.push(line) {
            // Subscriber went away mid-drain; the rest of this batch is
            // lost, which is acceptable for diagnostics.
            break;
        }
    }
}
