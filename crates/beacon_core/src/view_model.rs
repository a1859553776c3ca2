use crate::ConnectionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedView {
    pub status: ConnectionStatus,
    pub status_label: String,
    pub rows: Vec<NotificationRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRow {
    pub id: String,
    pub message: String,
    /// `HH:MM:SS` in UTC.
    pub time_label: String,
}
