//! Error types for taskman.

use crate::model::Status;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Connecting, selecting the database, authenticating or the first PING failed.
    #[error("store handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("pushing a task onto {queue} failed: {source}")]
    Push {
        queue: String,
        #[source]
        source: Box<Error>,
    },

    #[error("pulling task data from {queue} failed: {source}")]
    Pull {
        queue: String,
        #[source]
        source: Box<Error>,
    },

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("cannot parse {what}: {value:?}")]
    Parse { what: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures raised by an individual store operation (push, pull,
    /// record write) rather than while building the worker.
    pub fn is_operation(&self) -> bool {
        matches!(self, Error::Push { .. } | Error::Pull { .. } | Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
