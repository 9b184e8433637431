//! # Synchronous per-kind listeners.
//!
//! Listeners run inline on the publisher, in registration order, before the
//! event reaches the broadcast channel. A panicking listener is caught and
//! logged; remaining listeners still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use super::event::{Event, EventKind};

pub(crate) type ListenerFn = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Listener storage keyed by event kind.
#[derive(Default)]
pub(crate) struct ListenerTable {
    next_id: AtomicU64,
    by_kind: Mutex<HashMap<EventKind, Vec<(u64, ListenerFn)>>>,
}

impl ListenerTable {
    pub(crate) fn insert(self: &Arc<Self>, kind: EventKind, f: ListenerFn) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(kind).or_default().push((id, f));
        Listener {
            id,
            kind,
            table: Arc::downgrade(self),
        }
    }

    fn remove(&self, kind: EventKind, id: u64) -> bool {
        let mut map = self.lock();
        let Some(list) = map.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&kind);
        }
        removed
    }

    fn contains(&self, kind: EventKind, id: u64) -> bool {
        self.lock()
            .get(&kind)
            .is_some_and(|list| list.iter().any(|(lid, _)| *lid == id))
    }

    /// Calls every listener registered for `ev.kind`.
    ///
    /// The list is cloned first so listeners may (un)register while being called.
    pub(crate) fn dispatch(&self, ev: &Event) {
        let snapshot: Vec<ListenerFn> = match self.lock().get(&ev.kind) {
            Some(list) => list.iter().map(|(_, f)| Arc::clone(f)).collect(),
            None => return,
        };

        for f in snapshot {
            if catch_unwind(AssertUnwindSafe(|| f(ev))).is_err() {
                warn!(kind = ?ev.kind, seq = ev.seq, "event listener panicked");
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<(u64, ListenerFn)>>> {
        self.by_kind.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Registration handle returned by [`Bus::add_listener`](crate::events::Bus::add_listener).
///
/// Dropping the handle keeps the listener installed; call
/// [`unsubscribe`](Listener::unsubscribe) to remove it. Clones refer to the
/// same registration.
#[derive(Debug, Clone)]
pub struct Listener {
    id: u64,
    kind: EventKind,
    table: Weak<ListenerTable>,
}

impl Listener {
    /// The event kind this listener was registered for.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the registration is still installed.
    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.contains(self.kind, self.id))
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.remove(self.kind, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTable").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let table = Arc::new(ListenerTable::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let _boom = table.insert(EventKind::TaskAdded, Arc::new(|_| panic!("listener boom")));
        let h = Arc::clone(&hits);
        let _ok = table.insert(
            EventKind::TaskAdded,
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        table.dispatch(&Event::new(EventKind::TaskAdded));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let table = Arc::new(ListenerTable::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let first = table.insert(
            EventKind::TaskRemoved,
            Arc::new(move |_| {
                h1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let h2 = Arc::clone(&hits);
        let _second = table.insert(
            EventKind::TaskRemoved,
            Arc::new(move |_| {
                h2.fetch_add(10, Ordering::SeqCst);
            }),
        );

        let copy = first.clone();
        assert!(first.unsubscribe());
        assert!(!copy.is_active());
        assert!(!copy.unsubscribe());
        table.dispatch(&Event::new(EventKind::TaskRemoved));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn other_kinds_are_not_called() {
        let table = Arc::new(ListenerTable::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _l = table.insert(
            EventKind::TaskPaused,
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        table.dispatch(&Event::new(EventKind::TaskResumed));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
