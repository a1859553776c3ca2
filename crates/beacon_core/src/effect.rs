use std::fmt;

use crate::{RequestConfig, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEffect {
    Issue {
        request_id: RequestId,
        locator: String,
        config: RequestConfig,
    },
    Cancel {
        request_id: RequestId,
    },
    Warn(Misuse),
}

/// Calls that are accepted but cannot do anything useful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    RefetchWithoutLocator,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Misuse::RefetchWithoutLocator => write!(f, "refetch called without a locator"),
        }
    }
}
