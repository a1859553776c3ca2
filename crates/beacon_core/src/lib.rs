//! Beacon core: pure fetch and feed state machines plus view-model helpers.
mod effect;
mod feed;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::{FetchEffect, Misuse};
pub use feed::{update_feed, ConnectionStatus, FeedEffect, FeedMsg, Notification, NotificationFeed};
pub use msg::{CancellationAware, FetchMsg, Settlement};
pub use state::{
    FetchMachine, FetchPhase, FetchState, Method, RequestConfig, RequestId, RequestTarget,
};
pub use update::update;
pub use view_model::{FeedView, NotificationRow};
