//! # Event Emitter
//!
//! Explicit publish/subscribe registry owned by one server or client instance.
//! Listeners subscribe to an event kind (or to every kind) and are invoked
//! synchronously, in subscription order, on the emitting task.
//!
//! - **Version**: 1.1.0
//! - **Since**: 2.0.0
//!
//! ## Changelog
//! - 1.1.0: Channel subscriptions are dropped with their receiver
//! - 1.0.0: Per-instance publish/subscribe

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Events carry a cheap discriminant used for routing
pub trait EmitterEvent {
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Returns `false` once the listener can never receive again
type Listener<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

struct Subscription<E: EmitterEvent> {
    id: ListenerId,
    /// `None` receives every kind
    kind: Option<E::Kind>,
    listener: Listener<E>,
}

pub struct EventEmitter<E: EmitterEvent> {
    subscriptions: Mutex<Vec<Subscription<E>>>,
    next_id: AtomicU64,
}

impl<E: EmitterEvent> EventEmitter<E> {
    pub fn new() -> Self {
        EventEmitter {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription<E>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self, kind: Option<E::Kind>, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscription { id, kind, listener });
        id
    }

    /// Subscribe to one event kind
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(
            Some(kind),
            Arc::new(move |event: &E| {
                listener(event);
                true
            }),
        )
    }

    /// Subscribe to every event kind
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(
            None,
            Arc::new(move |event: &E| {
                listener(event);
                true
            }),
        )
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Dispatch to every matching listener, returning how many are still subscribed.
    ///
    /// The registry is not locked while listeners run, so a listener may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let listeners: Vec<(ListenerId, Listener<E>)> = self
            .lock()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| (s.id, Arc::clone(&s.listener)))
            .collect();

        let mut finished = Vec::new();
        for (id, listener) in &listeners {
            if !listener(event) {
                finished.push(*id);
            }
        }

        if !finished.is_empty() {
            self.lock().retain(|s| !finished.contains(&s.id));
        }
        listeners.len() - finished.len()
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .count()
    }
}

impl<E> EventEmitter<E>
where
    E: EmitterEvent + Clone + Send + 'static,
{
    /// Forward every event into a channel for async consumers.
    ///
    /// The subscription is dropped at the first emit after the receiver is gone.
    pub fn events(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(
            None,
            Arc::new(move |event: &E| tx.send(event.clone()).is_ok()),
        );
        rx
    }
}

impl<E: EmitterEvent> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
