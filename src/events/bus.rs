//! Ordered fan-out of voice events
//!
//! Every subscriber owns an unbounded queue, so a slow consumer never causes
//! another consumer to miss events. Publishing holds the subscriber lock for
//! the whole batch, which keeps delivery order identical to commit order
//! across concurrent publishers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::VoiceEvent;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<VoiceEvent>)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multi-subscriber event bus
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: VoiceEvent) {
        let mut registry = lock(&self.registry);
        trace!(%event, subscribers = registry.subscribers.len(), "publishing event");
        registry
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Subscribe from this point onward; no history is replayed
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push((id, tx));
        debug!(id, "event subscriber added");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe with a callback, invoked once per event on a spawned task
    ///
    /// Must be called from within a tokio runtime. Calling
    /// [`Unsubscribe::unsubscribe`] from inside the callback stops delivery
    /// of the remaining events of the current batch.
    pub fn subscribe_fn<F>(&self, mut callback: F) -> Unsubscribe
    where
        F: FnMut(&VoiceEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                callback(&event);
            }
        });

        Unsubscribe {
            active,
            task: Arc::new(DeliveryTask(task)),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

/// Stream-style subscription; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<VoiceEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<VoiceEvent> {
        self.rx.recv().await
    }

    /// Take the next already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<VoiceEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; undelivered events are discarded
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.retain(|(id, _)| *id != self.id);
            debug!(id = self.id, "event subscriber removed");
        }
    }
}

/// Aborts the callback task once the last handle is dropped
struct DeliveryTask(JoinHandle<()>);

impl Drop for DeliveryTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle returned by [`EventBus::subscribe_fn`]
///
/// Dropping the last clone unsubscribes, like dropping a [`Subscription`].
#[derive(Clone)]
pub struct Unsubscribe {
    active: Arc<AtomicBool>,
    task: Arc<DeliveryTask>,
}

impl Unsubscribe {
    /// Stop invoking the callback
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.0.abort();
    }

    /// Whether the callback is still registered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
