use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnError;

/// Failures that end a worker run. Handler failures are not in here: they
/// only cause a NACK of the affected message.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: ConnError,
    },
    #[error("unable to subscribe to {destination}: {source}")]
    Subscribe {
        destination: String,
        #[source]
        source: ConnError,
    },
    #[error("no message received within {0:?}")]
    ReceiveTimeout(Duration),
    #[error("connection lost while waiting for a message: {0}")]
    Receive(#[source] ConnError),
}
