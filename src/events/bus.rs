//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (registry, scheduler,
//! recovery engine, runtime), plus a table of synchronous per-kind listeners.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                     Consumers:
//!   Registry  ──┐                        ┌─► listeners[kind] (inline, in order)
//!   Scheduler ──┼──► Bus::publish(ev) ───┤
//!   Recovery  ──┤                        └─► broadcast ──► subscriber_listener ──► SubscriberSet
//!   Runtime   ──┘
//! ```
//!
//! ## Rules
//! - **Listeners first**: synchronous listeners for `ev.kind` run before the broadcast send.
//! - **Listener isolation**: a panicking listener is logged and skipped.
//! - **Non-blocking publish**: the broadcast half never blocks.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: broadcast events are lost if there are no active receivers.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::{Event, EventKind};
use super::listeners::{Listener, ListenerTable};

/// Broadcast channel and listener table for runtime events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns as soon as listeners ran and the send was queued.
/// - **Fire-and-forget**: no delivery or durability guarantees for broadcast receivers.
/// - **Cloneable**: cheap to clone; clones share the channel and the listener table.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    listeners: Arc<ListenerTable>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    ///
    /// ### Notes
    /// - Capacity is **shared** across all receivers (not per-subscriber).
    /// - The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self {
            tx,
            listeners: Arc::new(ListenerTable::default()),
        }
    }

    /// Publishes an event to the listeners of its kind, then to all broadcast receivers.
    pub fn publish(&self, ev: Event) {
        self.listeners.dispatch(&ev);
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    ///
    /// - Each call creates an **independent** receiver.
    /// - A receiver only gets events **sent after** it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Registers a synchronous callback for one event kind.
    ///
    /// The callback runs on the publishing task; keep it short.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use taskwarden::{Bus, Event, EventKind};
    ///
    /// let bus = Bus::new(16);
    /// let seen = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&seen);
    /// let listener = bus.add_listener(EventKind::TaskAdded, move |_ev| {
    ///     counter.fetch_add(1, Ordering::SeqCst);
    /// });
    ///
    /// bus.publish(Event::new(EventKind::TaskAdded));
    /// listener.unsubscribe();
    /// bus.publish(Event::new(EventKind::TaskAdded));
    /// assert_eq!(seen.load(Ordering::SeqCst), 1);
    /// ```
    pub fn add_listener<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners.insert(kind, Arc::new(f))
    }

    /// Drops every synchronous listener.
    pub fn remove_all_listeners(&self) {
        self.listeners.clear();
    }
}
