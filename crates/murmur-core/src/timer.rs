//! Cancelable scheduled tasks.
//!
//! Used for the call ringing timeout and typing-indicator expiry. A task
//! runs its callback once after a delay unless it is cancelled first.
//! Cancelling is idempotent: cancelling a task that already fired or was
//! already cancelled does nothing.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Handle to a callback scheduled on the tokio runtime.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Run `callback` after `delay` unless cancelled before then.
    ///
    /// Once the delay has elapsed the callback runs to completion;
    /// cancellation only prevents it from starting.
    pub fn after<F>(delay: Duration, callback: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(delay) => callback.await,
            }
        });
        Self { token }
    }

    /// Cancel the task. No-op if it already fired or was cancelled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
