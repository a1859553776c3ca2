//! Websocket transport speaking the Pusher channels protocol (v7).
//!
//! One background task owns the socket. Subscriptions to private channels are
//! authorized over HTTP once the server has assigned a socket id, and are
//! (re)sent whenever a connection is established. The transport never
//! reconnects on its own; it reports `Error`/`Disconnected` and stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use beacon_logging::{beacon_debug, beacon_error, beacon_info, beacon_trace, beacon_warn};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::loopback::private_name;
use crate::transport::HandlerRegistry;
use crate::{
    ConnectionEvent, ConnectionEventKind, ConnectionHandler, Disposer, EventHandler, Subscription,
    Transport, TransportConfig, TransportError,
};

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Frame {
    /// Pusher sends `data` as a JSON-encoded string; unwrap it when possible.
    fn payload(&self) -> Value {
        match &self.data {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| self.data.clone()),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: String,
}

struct Shared {
    config: TransportConfig,
    http: reqwest::Client,
    runtime: Handle,
    outbound: mpsc::UnboundedSender<String>,
    socket_id: Mutex<Option<String>>,
    subscriptions: Mutex<HashMap<String, Arc<PusherSubscription>>>,
    connection: Arc<HandlerRegistry<ConnectionEventKind, ConnectionHandler>>,
    shutdown: CancellationToken,
    /// Set once the socket task has stopped for any reason.
    ended: AtomicBool,
}

impl Shared {
    fn send(&self, frame: Value) {
        beacon_trace!("-> {}", frame);
        let _ = self.outbound.send(frame.to_string());
    }

    fn socket_id(&self) -> Option<String> {
        lock(&self.socket_id).clone()
    }

    fn subscription(&self, channel: &str) -> Option<Arc<PusherSubscription>> {
        lock(&self.subscriptions).get(channel).cloned()
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.ended.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.ended.store(true, Ordering::SeqCst);
        lock(&self.socket_id).take();
        self.connection.fire(&ConnectionEvent::Disconnected);
    }
}

/// Explicitly owned connection to a Pusher-compatible server.
///
/// Created with [`PusherTransport::connect`] at start-up and closed with
/// [`PusherTransport::disconnect`] (or by dropping it) at shutdown.
pub struct PusherTransport {
    shared: Arc<Shared>,
}

impl PusherTransport {
    /// Starts connecting in the background and returns immediately.
    pub fn connect(config: TransportConfig, runtime: Handle) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            config,
            http,
            runtime: runtime.clone(),
            outbound,
            socket_id: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            connection: HandlerRegistry::new(),
            shutdown: CancellationToken::new(),
            ended: AtomicBool::new(false),
        });

        runtime.spawn(run_connection(shared.clone(), outbound_rx));
        Ok(Self { shared })
    }

    /// Socket id assigned by the server, once connected.
    pub fn socket_id(&self) -> Option<String> {
        self.shared.socket_id()
    }

    pub fn is_connected(&self) -> bool {
        self.socket_id().is_some()
    }

    /// Closes the socket. Subscriptions stop receiving events.
    pub fn disconnect(&self) {
        if !self.shared.shutdown.is_cancelled() {
            beacon_info!("disconnecting from {}", self.shared.config.host);
            self.shared.shutdown.cancel();
        }
    }
}

impl Drop for PusherTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Transport for PusherTransport {
    fn subscribe_private(&self, channel: &str) -> Result<Arc<dyn Subscription>, TransportError> {
        if self.shared.is_closed() {
            return Err(TransportError::Closed);
        }

        let name = private_name(channel);
        let subscription = Arc::new(PusherSubscription {
            channel: name.clone(),
            handlers: HandlerRegistry::new(),
            closed: AtomicBool::new(false),
            transport: Arc::downgrade(&self.shared),
        });
        // The socket id is read under the subscriptions lock so that either this
        // call or the connection handshake authorizes the channel, never both.
        let (replaced, connected) = {
            let mut subscriptions = lock(&self.shared.subscriptions);
            let replaced = subscriptions.insert(name.clone(), subscription.clone());
            (replaced, self.shared.socket_id().is_some())
        };
        if let Some(previous) = replaced {
            beacon_warn!("replacing existing subscription to {}", name);
            previous.closed.store(true, Ordering::SeqCst);
            previous.handlers.clear();
        }

        if connected {
            authorize(&self.shared, name);
        }
        Ok(subscription)
    }

    fn on_connection_event(
        &self,
        kind: ConnectionEventKind,
        handler: ConnectionHandler,
    ) -> Disposer {
        self.shared.connection.register(kind, handler)
    }
}

pub struct PusherSubscription {
    channel: String,
    handlers: Arc<HandlerRegistry<String, EventHandler>>,
    closed: AtomicBool,
    transport: Weak<Shared>,
}

impl Subscription for PusherSubscription {
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
        let Some(shared) = self.transport.upgrade() else {
            return;
        };
        {
            let mut subscriptions = lock(&shared.subscriptions);
            let is_current = subscriptions
                .get(&self.channel)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self));
            if is_current {
                subscriptions.remove(&self.channel);
            }
        }
        if shared.socket_id().is_some() {
            beacon_debug!("unsubscribing from {}", self.channel);
            shared.send(json!({
                "event": "pusher:unsubscribe",
                "data": { "channel": self.channel },
            }));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn run_connection(shared: Arc<Shared>, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
    let url = shared.config.socket_url();
    beacon_info!(
        "connecting to {}://{}:{}",
        shared.config.scheme,
        shared.config.host,
        shared.config.port
    );

    let connected = tokio::select! {
        _ = shared.shutdown.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let socket = match connected {
        Ok((socket, _)) => socket,
        Err(err) => {
            beacon_error!("websocket connect failed: {}", err);
            shared
                .connection
                .fire(&ConnectionEvent::Error(TransportError::Connect(err.to_string()).to_string()));
            shared.finish();
            return;
        }
    };

    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(err) = write.send(Message::Text(text.into())).await {
                    shared.connection.fire(&ConnectionEvent::Error(err.to_string()));
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_frame(&shared, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                // Control frames are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    beacon_error!("websocket read failed: {}", err);
                    shared.connection.fire(&ConnectionEvent::Error(err.to_string()));
                    break;
                }
            },
        }
    }

    beacon_info!("websocket closed");
    shared.finish();
}

fn handle_frame(shared: &Arc<Shared>, text: &str) {
    beacon_trace!("<- {}", text);
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            beacon_warn!("ignoring malformed frame: {}", err);
            return;
        }
    };

    match frame.event.as_str() {
        "pusher:connection_established" => {
            let payload = frame.payload();
            let Some(socket_id) = payload.get("socket_id").and_then(Value::as_str) else {
                let err = TransportError::Protocol("connection established without socket id".into());
                shared.connection.fire(&ConnectionEvent::Error(err.to_string()));
                return;
            };
            beacon_info!("connected with socket id {}", socket_id);
            let channels: Vec<String> = {
                let subscriptions = lock(&shared.subscriptions);
                *lock(&shared.socket_id) = Some(socket_id.to_string());
                subscriptions.keys().cloned().collect()
            };
            shared.connection.fire(&ConnectionEvent::Connected);

            for channel in channels {
                authorize(shared, channel);
            }
        }
        "pusher:ping" => shared.send(json!({ "event": "pusher:pong", "data": {} })),
        "pusher:pong" => {}
        "pusher:error" => {
            let payload = frame.payload();
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            let code = payload.get("code").and_then(Value::as_u64);
            let detail = match code {
                Some(code) => format!("{message} (code {code})"),
                None => message.to_string(),
            };
            shared.connection.fire(&ConnectionEvent::Error(detail));
        }
        "pusher_internal:subscription_succeeded" => {
            beacon_debug!("subscribed to {}", frame.channel.as_deref().unwrap_or("?"));
        }
        "pusher:subscription_error" => {
            let channel = frame.channel.clone().unwrap_or_default();
            let err = TransportError::Authorization(format!("{channel}: {}", frame.payload()));
            shared.connection.fire(&ConnectionEvent::Error(err.to_string()));
        }
        event => {
            let Some(channel) = frame.channel.as_deref() else {
                beacon_debug!("ignoring {} without channel", event);
                return;
            };
            match shared.subscription(channel) {
                Some(subscription) if !subscription.is_closed() => {
                    subscription.handlers.deliver(event, &frame.payload());
                }
                _ => beacon_trace!("no subscription for {} on {}", event, channel),
            }
        }
    }
}

fn authorize(shared: &Arc<Shared>, channel: String) {
    let task_shared = shared.clone();
    shared.runtime.spawn(async move {
        let shared = task_shared;
        match request_auth(&shared, &channel).await {
            Ok(auth) => {
                let still_wanted = shared
                    .subscription(&channel)
                    .is_some_and(|subscription| !subscription.is_closed());
                if still_wanted {
                    beacon_debug!("subscribing to {}", channel);
                    shared.send(json!({
                        "event": "pusher:subscribe",
                        "data": { "channel": channel, "auth": auth },
                    }));
                }
            }
            Err(err) => {
                beacon_error!("authorization for {} failed: {}", channel, err);
                shared.connection.fire(&ConnectionEvent::Error(err.to_string()));
            }
        }
    });
}

async fn request_auth(shared: &Shared, channel: &str) -> Result<String, TransportError> {
    let socket_id = shared.socket_id().ok_or(TransportError::Closed)?;
    let url = shared
        .config
        .auth_url()
        .map_err(|err| TransportError::Authorization(err.to_string()))?;
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("socket_id", &socket_id)
        .append_pair("channel_name", channel)
        .finish();

    let mut request = shared
        .http
        .post(url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body);
    if let Some(token) = &shared.config.auth_token {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }

    let response = request
        .send()
        .await
        .map_err(|err| TransportError::Authorization(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Authorization(status.to_string()));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| TransportError::Authorization(err.to_string()))?;
    let parsed: AuthResponse = serde_json::from_slice(&bytes)
        .map_err(|err| TransportError::Authorization(err.to_string()))?;
    Ok(parsed.auth)
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
