use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beacon_core::{
    update_feed, ConnectionStatus, FeedEffect, FeedMsg, FeedView, Notification, NotificationFeed,
};
use beacon_logging::{beacon_debug, beacon_error, beacon_info};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    ConnectionEvent, ConnectionEventKind, Disposer, Subscription, Transport, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberSettings {
    /// Prepended to the subscriber id to form the channel name.
    pub channel_prefix: String,
    pub event_name: String,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            channel_prefix: "App.Models.User.".to_string(),
            event_name: "notification.created".to_string(),
        }
    }
}

impl SubscriberSettings {
    pub fn channel_for(&self, subscriber_id: &str) -> String {
        format!("{}{}", self.channel_prefix, subscriber_id)
    }
}

struct FeedCell {
    feed: Mutex<NotificationFeed>,
    view_tx: watch::Sender<FeedView>,
}

impl FeedCell {
    fn apply(&self, msg: FeedMsg) {
        let effects = {
            let mut feed = self.lock();
            let (mut next, effects) = update_feed(std::mem::take(&mut *feed), msg);
            if next.consume_dirty() {
                self.view_tx.send_replace(next.view());
            }
            *feed = next;
            effects
        };
        for effect in effects {
            match effect {
                FeedEffect::LogTransportError(detail) => {
                    beacon_error!("notification transport error: {}", detail);
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationFeed> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps the notifications pushed to one subscriber's private channel while
/// mounted, newest first, together with the connection indicator.
pub struct NotificationSubscriber {
    cell: Arc<FeedCell>,
    channel: String,
    subscription: Option<Arc<dyn Subscription>>,
    disposers: Vec<Disposer>,
}

impl NotificationSubscriber {
    pub fn mount(
        transport: &dyn Transport,
        subscriber_id: &str,
        settings: &SubscriberSettings,
    ) -> Result<Self, TransportError> {
        let channel = settings.channel_for(subscriber_id);
        let feed = NotificationFeed::new();
        let (view_tx, _) = watch::channel(feed.view());
        let cell = Arc::new(FeedCell {
            feed: Mutex::new(feed),
            view_tx,
        });

        let subscription = transport.subscribe_private(&channel)?;

        let on_event = cell.clone();
        let on_connected = cell.clone();
        let on_error = cell.clone();
        let on_disconnected = cell.clone();
        let disposers = vec![
            subscription.on(
                &settings.event_name,
                Arc::new(move |payload: &Value| {
                    on_event.apply(FeedMsg::Received(build_notification(payload)));
                }),
            ),
            transport.on_connection_event(
                ConnectionEventKind::Connected,
                Arc::new(move |_: &ConnectionEvent| on_connected.apply(FeedMsg::Connected)),
            ),
            transport.on_connection_event(
                ConnectionEventKind::Error,
                Arc::new(move |event: &ConnectionEvent| {
                    let detail = match event {
                        ConnectionEvent::Error(detail) => detail.clone(),
                        other => format!("{other:?}"),
                    };
                    on_error.apply(FeedMsg::TransportError(detail));
                }),
            ),
            transport.on_connection_event(
                ConnectionEventKind::Disconnected,
                Arc::new(move |_: &ConnectionEvent| on_disconnected.apply(FeedMsg::Disconnected)),
            ),
        ];

        beacon_info!(
            "listening for {} on {}",
            settings.event_name,
            subscription.channel()
        );

        Ok(Self {
            cell,
            channel,
            subscription: Some(subscription),
            disposers,
        })
    }

    /// Channel name before the transport adds its private prefix.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.cell.lock().notifications().cloned().collect()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.cell.lock().status()
    }

    pub fn view(&self) -> FeedView {
        self.cell.lock().view()
    }

    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.cell.view_tx.subscribe()
    }

    /// Leaves the channel and detaches every handler. Idempotent.
    pub fn unmount(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        subscription.close();
        for mut disposer in self.disposers.drain(..) {
            disposer.dispose();
        }
        self.cell.apply(FeedMsg::Teardown);
        beacon_debug!("unmounted notification subscriber for {}", self.channel);
    }
}

impl Drop for NotificationSubscriber {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn build_notification(payload: &Value) -> Notification {
    Notification {
        id: Uuid::new_v4().to_string(),
        message: message_from(payload),
        timestamp: Utc::now(),
    }
}

fn message_from(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}
