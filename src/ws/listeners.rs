//! Typed observer registry for [`FeedEvent`]s.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::ws::{EventKind, FeedEvent};

/// A registered callback. Invoked synchronously on the event loop.
pub type Listener = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners per event kind, invoked in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut map = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = map.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind.
    ///
    /// The list is copied before invoking so listeners may register or remove
    /// listeners without deadlocking. A panicking listener is logged and skipped.
    pub fn emit(&self, event: &FeedEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("Listener for {:?} panicked; continuing", event.kind());
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = map.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

/// Every [`FeedEvent`] as an async stream. Unregisters itself on drop.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
    registry: Arc<ListenerRegistry>,
    ids: Vec<ListenerId>,
}

impl EventStream {
    pub(crate) fn attach(registry: Arc<ListenerRegistry>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ids = EventKind::ALL
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                registry.on(
                    *kind,
                    Arc::new(move |event: &FeedEvent| {
                        let _ = tx.send(event.clone());
                    }),
                )
            })
            .collect();
        Self { rx, registry, ids }
    }
}

impl Stream for EventStream {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for (kind, id) in EventKind::ALL.iter().zip(&self.ids) {
            self.registry.off(*kind, *id);
        }
    }
}
