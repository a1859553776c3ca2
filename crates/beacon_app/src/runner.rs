use std::sync::Arc;

use anyhow::Context;
use beacon_core::{ConnectionStatus, FeedView, FetchState, RequestTarget};
use beacon_engine::{
    DataFetcher, HttpSettings, LoopbackTransport, NotificationSubscriber, PusherTransport,
    ReqwestClient, RequestError, Transport,
};
use beacon_logging::{beacon_info, beacon_warn};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AppConfig;

/// The transport the process owns for its whole lifetime.
enum Link {
    Pusher(PusherTransport),
    Loopback(LoopbackTransport),
}

impl Link {
    fn open(config: &AppConfig, runtime: Handle) -> anyhow::Result<Self> {
        match &config.transport {
            Some(transport) => {
                let pusher = PusherTransport::connect(transport.clone(), runtime)
                    .context("starting websocket transport")?;
                Ok(Link::Pusher(pusher))
            }
            None => {
                beacon_warn!("BEACON_WS_HOST is not set; using the loopback transport");
                Ok(Link::Loopback(LoopbackTransport::new()))
            }
        }
    }

    fn transport(&self) -> &dyn Transport {
        match self {
            Link::Pusher(pusher) => pusher,
            Link::Loopback(loopback) => loopback,
        }
    }

    fn close(&self) {
        if let Link::Pusher(pusher) = self {
            pusher.disconnect();
        }
    }
}

pub fn run(config: AppConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let handle = runtime.handle().clone();
    runtime.block_on(serve(config, handle))
}

async fn serve(config: AppConfig, runtime: Handle) -> anyhow::Result<()> {
    let link = Link::open(&config, runtime.clone())?;

    let mut subscriber =
        NotificationSubscriber::mount(link.transport(), &config.subscriber_id, &config.subscriber)
            .context("subscribing to notifications")?;
    beacon_info!("listening on {}", subscriber.channel());
    let feed_logger = spawn_feed_logger(subscriber.watch());

    let fetcher = match &config.fetch_locator {
        Some(locator) => Some(start_fetch(&config, locator, runtime)?),
        None => None,
    };
    let fetch_logger = fetcher.as_ref().map(|fetcher| spawn_fetch_logger(fetcher.watch()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    beacon_info!("shutting down");

    subscriber.unmount();
    feed_logger.abort();
    if let Some(fetcher) = &fetcher {
        fetcher.teardown();
    }
    if let Some(task) = fetch_logger {
        task.abort();
    }
    link.close();
    Ok(())
}

fn start_fetch(
    config: &AppConfig,
    locator: &str,
    runtime: Handle,
) -> anyhow::Result<DataFetcher<Value>> {
    let mut settings = HttpSettings::default();
    if let Some(base) = &config.api_base {
        settings = settings.with_base_url(base.clone());
    }
    let client = ReqwestClient::new(settings).context("building HTTP client")?;
    let fetcher = DataFetcher::new(Arc::new(client), runtime, RequestTarget::new(locator));
    let _handle = fetcher.execute();
    Ok(fetcher)
}

fn spawn_feed_logger(mut views: watch::Receiver<FeedView>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut status = ConnectionStatus::Disconnected;
        let mut seen = 0;
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            if view.status != status {
                status = view.status;
                beacon_info!("notification link: {}", view.status_label);
            }
            let fresh = view.rows.len().saturating_sub(seen);
            for row in view.rows.iter().take(fresh).rev() {
                beacon_info!("[{}] {}", row.time_label, row.message);
            }
            seen = view.rows.len();
        }
    })
}

fn spawn_fetch_logger(mut states: watch::Receiver<FetchState<Value, RequestError>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if state.loading {
                beacon_info!("fetch in progress");
            } else if let Some(err) = &state.error {
                beacon_warn!("fetch failed: {}", err);
            } else if let Some(data) = &state.data {
                beacon_info!("fetch succeeded: {}", data);
            }
        }
    })
}
