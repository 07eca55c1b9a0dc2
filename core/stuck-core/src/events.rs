//! Fan-out of engine events to subscribers.
//!
//! Delivery is synchronous and per subscriber: each callback runs inside its
//! own panic guard, errors and panics are logged, and the next subscriber is
//! called regardless. The subscriber list lock is never held while a
//! callback runs, so callbacks may subscribe, unsubscribe or query the engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use stuck_protocol::{EventKind, StuckEvent};
use tracing::{debug, warn};

use crate::error::Result;

pub type SubscriberFn = dyn Fn(&StuckEvent) -> Result<()> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Sink {
    Callback(Arc<SubscriberFn>),
    Channel(Sender<StuckEvent>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    sink: Sink,
}

impl Subscriber {
    fn wants(&self, event: &StuckEvent) -> bool {
        self.kind.map(|kind| kind == event.kind()).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StuckEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.add(None, Sink::Callback(Arc::new(callback)))
    }

    /// Receives only events of `kind`.
    pub fn subscribe_kind<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&StuckEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.add(Some(kind), Sink::Callback(Arc::new(callback)))
    }

    /// Receives every event on a channel. Dropping the receiver unsubscribes
    /// on the next publish.
    pub fn subscribe_channel(&self) -> Receiver<StuckEvent> {
        let (tx, rx) = mpsc::channel();
        self.add(None, Sink::Channel(tx));
        rx
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn publish(&self, event: &StuckEvent) {
        let targets: Vec<Subscriber> = self
            .lock()
            .iter()
            .filter(|subscriber| subscriber.wants(event))
            .cloned()
            .collect();

        let mut disconnected = Vec::new();
        for subscriber in targets {
            match &subscriber.sink {
                Sink::Callback(callback) => deliver(subscriber.id, callback.as_ref(), event),
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        disconnected.push(subscriber.id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            debug!(count = disconnected.len(), "Pruning disconnected event channels");
            self.lock()
                .retain(|subscriber| !disconnected.contains(&subscriber.id));
        }
    }

    fn add(&self, kind: Option<EventKind>, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber { id, kind, sink });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn deliver(id: SubscriptionId, callback: &SubscriberFn, event: &StuckEvent) {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(subscription = id.0, event = ?event.kind(), error = %err, "Event subscriber failed");
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(subscription = id.0, event = ?event.kind(), panic = %message, "Event subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StuckError;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use stuck_protocol::StuckStatus;

    fn status_event() -> StuckEvent {
        StuckEvent::StatusUpdated {
            status: StuckStatus {
                total_stuck_count: 0,
                waiting_input_count: 0,
                failed_count: 0,
                qa_blocked_count: 0,
                alerts: Vec::new(),
                highest_severity: None,
                last_updated: Utc::now(),
            },
        }
    }

    #[test]
    fn failing_subscribers_do_not_block_others() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| Err(StuckError::Subscriber("socket closed".to_string())));
        bus.subscribe(|_| panic!("renderer exploded"));
        let counter = Arc::clone(&delivered);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&status_event());
        bus.publish(&status_event());

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 3);
    }

    #[test]
    fn kind_filter_limits_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        bus.subscribe_kind(EventKind::Detected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&status_event());
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let id = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&status_event());
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_channels_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe_channel();
        let dropped = bus.subscribe_channel();
        drop(dropped);

        bus.publish(&status_event());

        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn callbacks_may_subscribe_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(move |_| {
            inner.subscribe(|_| Ok(()));
            Ok(())
        });

        bus.publish(&status_event());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
