mod inline;
mod process;

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::protocol::{ResultMessage, StartMessage};

pub use inline::{InlineIsolation, INLINE_THREAD_NAME};
pub use process::{ProcessIsolation, WORKER_BIN, WORKER_ENV};

/// Why an isolated execution produced no result message.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// The mechanism could not be set up at all; another may be tried.
    #[error("isolation unavailable: {0}")]
    Unavailable(String),

    /// The context overran its budget and was terminated.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The context died or spoke out of protocol.
    #[error("{0}")]
    Failed(String),
}

/// An isolation primitive: one start message in, one result message out.
pub trait Isolation: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run a start message, terminating the context if `timeout` elapses.
    fn run(
        &self,
        msg: StartMessage,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ResultMessage, IsolationError>>;
}
