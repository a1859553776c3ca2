//! Beacon engine: HTTP requests, realtime transports, and the runtime drivers
//! for the core state machines.
mod config;
mod fetcher;
mod http;
mod loopback;
mod pusher;
mod subscriber;
mod transport;
mod types;

pub use config::TransportConfig;
pub use fetcher::{CancelHandle, DataFetcher};
pub use http::{HttpClient, HttpSettings, ReqwestClient};
pub use loopback::{LoopbackSubscription, LoopbackTransport};
pub use pusher::{PusherSubscription, PusherTransport};
pub use subscriber::{NotificationSubscriber, SubscriberSettings};
pub use transport::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandler, Disposer, EventHandler, Subscription,
    Transport, TransportError,
};
pub use types::{FailureKind, HttpResponse, RequestError};
