use std::collections::BTreeMap;
use std::time::Duration;

/// Identifier the machine assigns to every request it issues.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Request options passed through to the HTTP client untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestConfig {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestTarget {
    pub locator: Option<String>,
    pub config: RequestConfig,
}

impl RequestTarget {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: Some(locator.into()),
            config: RequestConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }
}

/// Observable result of a fetcher: data and error never coexist, and error is
/// always cleared while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchState<T, E> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<E>,
}

impl<T, E> Default for FetchState<T, E> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

impl<T, E> FetchState<T, E> {
    pub fn phase(&self) -> FetchPhase {
        if self.loading {
            FetchPhase::Loading
        } else if self.error.is_some() {
            FetchPhase::Failed
        } else if self.data.is_some() {
            FetchPhase::Succeeded
        } else {
            FetchPhase::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPhase {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// Complete state of one fetcher instance: the current target, the observable
/// result, and the id of the request whose settlement is still awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMachine<T, E> {
    target: RequestTarget,
    state: FetchState<T, E>,
    in_flight: Option<RequestId>,
    next_request_id: RequestId,
    torn_down: bool,
    dirty: bool,
}

impl<T, E> Default for FetchMachine<T, E> {
    fn default() -> Self {
        Self {
            target: RequestTarget::default(),
            state: FetchState::default(),
            in_flight: None,
            next_request_id: 1,
            torn_down: false,
            dirty: false,
        }
    }
}

impl<T, E> FetchMachine<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(target: RequestTarget) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    pub fn state(&self) -> &FetchState<T, E> {
        &self.state
    }

    pub fn phase(&self) -> FetchPhase {
        self.state.phase()
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Returns whether the observable state changed since the last call, and
    /// clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn set_locator(&mut self, locator: Option<String>) {
        self.target.locator = locator;
    }

    pub(crate) fn set_config(&mut self, config: RequestConfig) {
        self.target.config = config;
    }

    pub(crate) fn set_target(&mut self, target: RequestTarget) {
        self.target = target;
    }

    pub(crate) fn take_in_flight(&mut self) -> Option<RequestId> {
        self.in_flight.take()
    }

    pub(crate) fn begin_request(&mut self) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.in_flight = Some(request_id);
        self.state.loading = true;
        self.state.error = None;
        self.dirty = true;
        request_id
    }

    pub(crate) fn reset(&mut self) {
        self.state = FetchState::default();
        self.dirty = true;
    }

    pub(crate) fn succeed(&mut self, data: T) {
        self.state = FetchState {
            data: Some(data),
            loading: false,
            error: None,
        };
        self.dirty = true;
    }

    pub(crate) fn fail(&mut self, error: E) {
        self.state = FetchState {
            data: None,
            loading: false,
            error: Some(error),
        };
        self.dirty = true;
    }

    pub(crate) fn stop_loading(&mut self) {
        if self.state.loading {
            self.state.loading = false;
            self.dirty = true;
        }
    }

    pub(crate) fn tear_down(&mut self) {
        self.torn_down = true;
    }
}
