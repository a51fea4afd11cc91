//! Error types shared across the restart collector

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while processing a pod restart
///
/// Reconciliation errors are returned unchanged to the controller, which
/// alone decides whether to retry or drop the key.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not exists in pod index")]
    PodNotFound(String),

    #[error("invalid pod key {0:?}, expected namespace/name")]
    InvalidKey(String),

    #[error("pod {0} is not scheduled to a node")]
    NotScheduled(String),

    #[error("failed to get node {node:?}, probably deleted: {source}")]
    NodeLookup {
        node: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to list events in namespace {namespace}: {source}")]
    EventList {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to get previous logs of {pod}/{container}: {source}")]
    LogFetch {
        pod: String,
        container: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to send notification: {0}")]
    Notify(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for collaborator failures that may succeed on a later attempt.
    ///
    /// Informational only: the retry budget is applied to every error.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::PodNotFound(_)
                | Error::InvalidKey(_)
                | Error::NotScheduled(_)
                | Error::Config(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Notify(err.to_string())
    }
}
