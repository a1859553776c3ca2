//! Runtime driver for the fetch state machine.
//!
//! `DataFetcher` owns a [`FetchMachine`], feeds it messages from its public
//! methods and from settling requests, and runs the resulting effects: issuing
//! requests on the tokio runtime and cancelling superseded ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use beacon_core::{
    update, FetchEffect, FetchMachine, FetchMsg, FetchPhase, FetchState, RequestConfig, RequestId,
    RequestTarget, Settlement,
};
use beacon_logging::{beacon_debug, beacon_trace, beacon_warn};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{HttpClient, RequestError};

/// Cancels the request issued by the call that returned it.
///
/// Inert when that call issued nothing (no locator).
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    request_id: Option<RequestId>,
    token: Option<CancellationToken>,
}

impl CancelHandle {
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

struct Inner<T> {
    machine: Mutex<FetchMachine<T, RequestError>>,
    tokens: Mutex<HashMap<RequestId, CancellationToken>>,
    state_tx: watch::Sender<FetchState<T, RequestError>>,
    client: Arc<dyn HttpClient>,
    runtime: Handle,
}

/// Fetches JSON resources of type `T` and tracks `{data, loading, error}`.
///
/// Every method is synchronous: requests run on `runtime` and report back
/// through the state machine, which discards settlements of superseded
/// requests. Dropping the fetcher tears it down.
pub struct DataFetcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> DataFetcher<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates an idle fetcher. Nothing is requested until `execute` or a setter runs.
    pub fn new(client: Arc<dyn HttpClient>, runtime: Handle, target: RequestTarget) -> Self {
        let (state_tx, _) = watch::channel(FetchState::default());
        Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(FetchMachine::with_target(target)),
                tokens: Mutex::new(HashMap::new()),
                state_tx,
                client,
                runtime,
            }),
        }
    }

    pub fn execute(&self) -> CancelHandle {
        dispatch(&self.inner, FetchMsg::Execute)
    }

    /// Re-issues the current target; warns and does nothing without a locator.
    pub fn refetch(&self) -> CancelHandle {
        dispatch(&self.inner, FetchMsg::Refetch)
    }

    pub fn set_locator(&self, locator: impl Into<String>) -> CancelHandle {
        dispatch(&self.inner, FetchMsg::SetLocator(Some(locator.into())))
    }

    /// Drops the locator, cancelling any request and resetting to idle.
    pub fn clear_locator(&self) {
        dispatch(&self.inner, FetchMsg::SetLocator(None));
    }

    pub fn set_config(&self, config: RequestConfig) -> CancelHandle {
        dispatch(&self.inner, FetchMsg::SetConfig(config))
    }

    pub fn set_target(&self, target: RequestTarget) -> CancelHandle {
        dispatch(&self.inner, FetchMsg::SetTarget(target))
    }

    pub fn state(&self) -> FetchState<T, RequestError> {
        self.inner.state_tx.borrow().clone()
    }

    pub fn phase(&self) -> FetchPhase {
        self.inner.state_tx.borrow().phase()
    }

    pub fn target(&self) -> RequestTarget {
        lock(&self.inner.machine).target().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<FetchState<T, RequestError>> {
        self.inner.state_tx.subscribe()
    }

    /// Waits until no request is loading and returns the state at that point.
    pub async fn settled(&self) -> FetchState<T, RequestError> {
        let mut rx = self.watch();
        // The sender lives in `inner`, so the channel cannot close while `self` exists.
        let result = rx.wait_for(|state| !state.loading).await.map(|state| state.clone());
        result.unwrap_or_else(|_| self.state())
    }

    /// Cancels any in-flight request; every later call is ignored.
    pub fn teardown(&self) {
        dispatch(&self.inner, FetchMsg::Teardown);
    }
}

impl<T> Drop for DataFetcher<T> {
    fn drop(&mut self) {
        let mut machine = lock(&self.inner.machine);
        if machine.is_torn_down() {
            return;
        }
        let (next, effects) = update(std::mem::take(&mut *machine), FetchMsg::Teardown);
        *machine = next;
        drop(machine);
        for effect in effects {
            if let FetchEffect::Cancel { request_id } = effect {
                cancel_token(&self.inner, request_id);
            }
        }
    }
}

fn dispatch<T>(inner: &Arc<Inner<T>>, msg: FetchMsg<T, RequestError>) -> CancelHandle
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let effects = {
        let mut machine = lock(&inner.machine);
        let (mut next, effects) = update(std::mem::take(&mut *machine), msg);
        if next.consume_dirty() {
            inner.state_tx.send_replace(next.state().clone());
        }
        *machine = next;
        effects
    };
    run_effects(inner, effects)
}

fn run_effects<T>(inner: &Arc<Inner<T>>, effects: Vec<FetchEffect>) -> CancelHandle
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut handle = CancelHandle::default();
    for effect in effects {
        match effect {
            FetchEffect::Cancel { request_id } => {
                beacon_debug!("cancelling request {}", request_id);
                cancel_token(inner, request_id);
            }
            FetchEffect::Issue {
                request_id,
                locator,
                config,
            } => {
                beacon_debug!("issuing request {} for {}", request_id, locator);
                let token = CancellationToken::new();
                lock(&inner.tokens).insert(request_id, token.clone());
                spawn_request(inner, request_id, locator, config, token.clone());
                handle = CancelHandle {
                    request_id: Some(request_id),
                    token: Some(token),
                };
            }
            FetchEffect::Warn(misuse) => beacon_warn!("{}", misuse),
        }
    }
    handle
}

fn spawn_request<T>(
    inner: &Arc<Inner<T>>,
    request_id: RequestId,
    locator: String,
    config: RequestConfig,
    token: CancellationToken,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let client = inner.client.clone();
    let weak: Weak<Inner<T>> = Arc::downgrade(inner);
    inner.runtime.spawn(async move {
        let result = client
            .request(&locator, &config, token.clone())
            .await
            .and_then(|response| response.json::<T>());
        // A response that arrives after cancellation counts as cancelled.
        let result = if token.is_cancelled() {
            Err(RequestError::cancelled())
        } else {
            result
        };

        let Some(inner) = weak.upgrade() else {
            beacon_trace!("request {} settled after its fetcher was dropped", request_id);
            return;
        };
        lock(&inner.tokens).remove(&request_id);
        match &result {
            Ok(_) => beacon_debug!("request {} succeeded", request_id),
            Err(err) if err.is_cancelled() => beacon_debug!("request {} cancelled", request_id),
            Err(err) => beacon_debug!("request {} failed: {}", request_id, err),
        }
        dispatch(
            &inner,
            FetchMsg::Settled {
                request_id,
                settlement: Settlement::from(result),
            },
        );
    });
}

fn cancel_token<T>(inner: &Inner<T>, request_id: RequestId) {
    if let Some(token) = lock(&inner.tokens).remove(&request_id) {
        token.cancel();
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
