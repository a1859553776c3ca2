//! Pub/sub transport abstraction shared by the websocket and loopback clients.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connected,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Error(String),
    Disconnected,
}

impl ConnectionEvent {
    pub fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Connected => ConnectionEventKind::Connected,
            ConnectionEvent::Error(_) => ConnectionEventKind::Error,
            ConnectionEvent::Disconnected => ConnectionEventKind::Disconnected,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ConnectionHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("channel authorization failed: {0}")]
    Authorization(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport is closed")]
    Closed,
}

pub trait Transport: Send + Sync {
    /// Subscribes to `channel` as a private channel. Authorization happens in
    /// the background; failures are reported through `Error` connection events.
    fn subscribe_private(&self, channel: &str) -> Result<Arc<dyn Subscription>, TransportError>;

    fn on_connection_event(&self, kind: ConnectionEventKind, handler: ConnectionHandler)
        -> Disposer;
}

pub trait Subscription: Send + Sync {
    /// Full channel name as the server knows it.
    fn channel(&self) -> &str;

    fn on(&self, event: &str, handler: EventHandler) -> Disposer;

    /// Leaves the channel. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Undoes one registration. Runs at most once, either via `dispose` or on drop.
#[must_use = "dropping a Disposer detaches the handler immediately"]
pub struct Disposer {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A disposer with nothing to undo.
    pub fn noop() -> Self {
        Self { action: None }
    }

    pub fn dispose(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action.is_none()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Keyed handler list whose entries are removed through disposers.
pub(crate) struct HandlerRegistry<K, H> {
    entries: Mutex<RegistryEntries<K, H>>,
}

struct RegistryEntries<K, H> {
    next_id: u64,
    handlers: Vec<(u64, K, H)>,
}

impl<K, H> HandlerRegistry<K, H>
where
    K: PartialEq + Send + 'static,
    H: Clone + Send + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(RegistryEntries {
                next_id: 0,
                handlers: Vec::new(),
            }),
        })
    }

    pub(crate) fn register(self: &Arc<Self>, key: K, handler: H) -> Disposer
    where
        Self: Send + Sync,
    {
        let id = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let id = entries.next_id;
            entries.next_id += 1;
            entries.handlers.push((id, key, handler));
            id
        };
        let registry: Weak<Self> = Arc::downgrade(self);
        Disposer::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .handlers
                    .retain(|(entry_id, _, _)| *entry_id != id);
            }
        })
    }

    /// Handlers registered under `key`, cloned so they can run without the lock.
    pub(crate) fn handlers_for(&self, key: &K) -> Vec<H> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .filter(|(_, entry_key, _)| entry_key == key)
            .map(|(_, _, handler)| handler.clone())
            .collect()
    }

    pub(crate) fn count(&self, key: &K) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .filter(|(_, entry_key, _)| entry_key == key)
            .count()
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .clear();
    }
}

impl HandlerRegistry<ConnectionEventKind, ConnectionHandler> {
    pub(crate) fn fire(&self, event: &ConnectionEvent) {
        for handler in self.handlers_for(&event.kind()) {
            handler(event);
        }
    }
}

impl HandlerRegistry<String, EventHandler> {
    pub(crate) fn deliver(&self, event: &str, payload: &Value) {
        for handler in self.handlers_for(&event.to_string()) {
            handler(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn disposer_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut disposer = Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        disposer.dispose();
        disposer.dispose();
        drop(disposer);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_dispatches_by_key_until_disposed() {
        let registry: Arc<HandlerRegistry<ConnectionEventKind, ConnectionHandler>> =
            HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let mut disposer = registry.register(
            ConnectionEventKind::Error,
            Arc::new(move |event: &ConnectionEvent| sink.lock().unwrap().push(event.clone())),
        );

        registry.fire(&ConnectionEvent::Connected);
        registry.fire(&ConnectionEvent::Error("boom".to_string()));
        assert_eq!(registry.count(&ConnectionEventKind::Error), 1);

        disposer.dispose();
        registry.fire(&ConnectionEvent::Error("late".to_string()));

        assert_eq!(registry.count(&ConnectionEventKind::Error), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionEvent::Error("boom".to_string())]
        );
    }
}
