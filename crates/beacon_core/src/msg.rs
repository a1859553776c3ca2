use crate::{RequestConfig, RequestId, RequestTarget};

/// Lets the core tell a cancelled request apart from a failed one without
/// knowing the concrete error type.
pub trait CancellationAware {
    fn is_cancellation(&self) -> bool;
}

/// How an issued request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    Success(T),
    Cancelled,
    Failed(E),
}

impl<T, E: CancellationAware> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Settlement::Success(data),
            Err(err) if err.is_cancellation() => Settlement::Cancelled,
            Err(err) => Settlement::Failed(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMsg<T, E> {
    /// Issue a request for the current target.
    Execute,
    /// Re-issue the request for the current target; warns when no locator is set.
    Refetch,
    /// Replace the locator and re-execute.
    SetLocator(Option<String>),
    /// Replace the request options and re-execute.
    SetConfig(RequestConfig),
    /// Replace locator and options together and re-execute.
    SetTarget(RequestTarget),
    /// An issued request finished.
    Settled {
        request_id: RequestId,
        settlement: Settlement<T, E>,
    },
    /// The consumer is gone; cancel whatever is running and ignore the rest.
    Teardown,
}
