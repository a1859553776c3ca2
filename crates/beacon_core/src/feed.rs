use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::view_model::{FeedView, NotificationRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMsg {
    /// A notification event arrived on the subscribed channel.
    Received(Notification),
    /// Transport reported a live connection.
    Connected,
    /// Transport reported an explicit disconnect.
    Disconnected,
    /// Transport reported an error; the detail is logged, never shown.
    TransportError(String),
    /// The subscriber was unmounted.
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEffect {
    LogTransportError(String),
}

/// Notifications received since mount, newest first, plus the connection
/// indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationFeed {
    notifications: VecDeque<Notification>,
    status: ConnectionStatus,
    torn_down: bool,
    dirty: bool,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            status: self.status,
            status_label: self.status.label().to_string(),
            rows: self
                .notifications
                .iter()
                .map(|notification| NotificationRow {
                    id: notification.id.clone(),
                    message: notification.message.clone(),
                    time_label: notification.timestamp.format("%H:%M:%S").to_string(),
                })
                .collect(),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.dirty = true;
        }
    }
}

/// Pure update function for the notification feed.
pub fn update_feed(mut feed: NotificationFeed, msg: FeedMsg) -> (NotificationFeed, Vec<FeedEffect>) {
    if feed.torn_down {
        return (feed, Vec::new());
    }

    let effects = match msg {
        FeedMsg::Received(notification) => {
            feed.notifications.push_front(notification);
            feed.dirty = true;
            Vec::new()
        }
        FeedMsg::Connected => {
            feed.set_status(ConnectionStatus::Connected);
            Vec::new()
        }
        FeedMsg::Disconnected => {
            feed.set_status(ConnectionStatus::Disconnected);
            Vec::new()
        }
        FeedMsg::TransportError(detail) => {
            feed.set_status(ConnectionStatus::Disconnected);
            vec![FeedEffect::LogTransportError(detail)]
        }
        FeedMsg::Teardown => {
            feed.notifications.clear();
            feed.status = ConnectionStatus::Disconnected;
            feed.torn_down = true;
            feed.dirty = true;
            Vec::new()
        }
    };

    (feed, effects)
}
