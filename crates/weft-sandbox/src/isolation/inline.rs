use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::warn;

use super::{Isolation, IsolationError};
use crate::protocol::{ResultMessage, StartMessage};
use crate::script;

/// Name of the evaluation threads.
pub const INLINE_THREAD_NAME: &str = "weft-sandbox";

/// Evaluates snippets in a fresh embedded JS context on a dedicated thread.
///
/// On timeout (or when the returned future is dropped) the thread is told to
/// stop and abandons the script at the engine's next yield point. Runaway
/// code inside a native callback cannot yield; there only the loop-iteration
/// and recursion limits bound it. Use [`ProcessIsolation`](super::ProcessIsolation)
/// when a hard kill is required.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineIsolation;

impl InlineIsolation {
    pub fn new() -> Self {
        Self
    }
}

impl Isolation for InlineIsolation {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(
        &self,
        msg: StartMessage,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ResultMessage, IsolationError>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            // Completes when `stop` is sent or dropped
            let (stop, stopped) = oneshot::channel::<()>();
            let package = msg.package_name.clone();

            std::thread::Builder::new()
                .name(INLINE_THREAD_NAME.into())
                .spawn(move || {
                    let result = script::evaluate_until(&msg, stopped);
                    // Receiver is gone after a timeout
                    let _ = tx.send(result);
                })
                .map_err(|e| IsolationError::Unavailable(e.to_string()))?;

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(_)) => Err(IsolationError::Failed(
                    "sandbox thread exited without a result".into(),
                )),
                Err(_) => {
                    warn!(%package, timeout_ms = timeout.as_millis() as u64, "Inline snippet overran its timeout, interrupting");
                    let _ = stop.send(());
                    Err(IsolationError::Timeout(timeout))
                }
            }
        })
    }
}
