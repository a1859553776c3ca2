use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use beacon_logging::beacon_debug;
use serde_json::Value;

use crate::transport::HandlerRegistry;
use crate::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandler, Disposer, EventHandler, Subscription,
    Transport, TransportError,
};

/// In-process transport: whatever is published is delivered synchronously to
/// the open subscriptions of that channel. Used offline and in tests.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

struct LoopbackInner {
    subscriptions: Mutex<Vec<Arc<LoopbackSubscription>>>,
    connection: Arc<HandlerRegistry<ConnectionEventKind, ConnectionHandler>>,
    unsubscribes: AtomicUsize,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                subscriptions: Mutex::new(Vec::new()),
                connection: HandlerRegistry::new(),
                unsubscribes: AtomicUsize::new(0),
            }),
        }
    }

    /// Delivers `payload` as `event` on the private channel `channel`.
    /// Returns how many subscriptions received it.
    pub fn publish(&self, channel: &str, event: &str, payload: Value) -> usize {
        let full_name = private_name(channel);
        let targets: Vec<_> = self
            .open_subscriptions()
            .into_iter()
            .filter(|subscription| subscription.channel == full_name)
            .collect();
        for subscription in &targets {
            subscription.handlers.deliver(event, &payload);
        }
        targets.len()
    }

    /// Fires the connection handlers registered for the event's kind.
    pub fn emit(&self, event: ConnectionEvent) {
        beacon_debug!("loopback connection event {:?}", event);
        self.inner.connection.fire(&event);
    }

    pub fn subscription_count(&self) -> usize {
        self.open_subscriptions().len()
    }

    pub fn event_handler_count(&self, channel: &str, event: &str) -> usize {
        let full_name = private_name(channel);
        self.open_subscriptions()
            .iter()
            .filter(|subscription| subscription.channel == full_name)
            .map(|subscription| subscription.handlers.count(&event.to_string()))
            .sum()
    }

    pub fn connection_handler_count(&self, kind: ConnectionEventKind) -> usize {
        self.inner.connection.count(&kind)
    }

    /// Number of subscriptions that have been closed so far.
    pub fn unsubscribe_count(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }

    fn open_subscriptions(&self) -> Vec<Arc<LoopbackSubscription>> {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.retain(|subscription| !subscription.is_closed());
        subscriptions.clone()
    }
}

impl Transport for LoopbackTransport {
    fn subscribe_private(&self, channel: &str) -> Result<Arc<dyn Subscription>, TransportError> {
        let subscription = Arc::new(LoopbackSubscription {
            channel: private_name(channel),
            handlers: HandlerRegistry::new(),
            closed: AtomicBool::new(false),
            transport: Arc::downgrade(&self.inner),
        });
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription.clone());
        Ok(subscription)
    }

    fn on_connection_event(
        &self,
        kind: ConnectionEventKind,
        handler: ConnectionHandler,
    ) -> Disposer {
        self.inner.connection.register(kind, handler)
    }
}

pub struct LoopbackSubscription {
    channel: String,
    handlers: Arc<HandlerRegistry<String, EventHandler>>,
    closed: AtomicBool,
    transport: Weak<LoopbackInner>,
}

impl Subscription for LoopbackSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn on(&self, event: &str, handler: EventHandler) -> Disposer {
        if self.is_closed() {
            return Disposer::noop();
        }
        self.handlers.register(event.to_string(), handler)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handlers.clear();
        if let Some(transport) = self.transport.upgrade() {
            transport.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn private_name(channel: &str) -> String {
    format!("private-{channel}")
}
