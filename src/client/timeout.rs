//! Deadline tasks for connects and calls.
//!
//! A deadline is a spawned task holding a weak reference to the connection.
//! When it fires it marks the connection timed out and closes it, which in
//! turn makes the receive loop resolve every pending call with `TimedOut`.
//! Dropping the returned guard cancels the deadline; a deadline whose
//! connection has already been released is a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

use crate::client::control::Control;

/// Cancels its deadline task when dropped.
#[derive(Debug, Default)]
pub(crate) struct TimeoutGuard {
    handle: Option<AbortHandle>,
}

impl TimeoutGuard {
    /// A guard with no deadline attached (zero duration disables the timer).
    pub(crate) fn disarmed() -> Self {
        Self { handle: None }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Arm a deadline that closes the connection when it elapses.
pub(crate) fn schedule(
    control: &Arc<Control>,
    duration: Duration,
    reason: &'static str,
) -> TimeoutGuard {
    if duration.is_zero() {
        return TimeoutGuard::disarmed();
    }
    let watcher = Arc::downgrade(control);
    let task = control.executor().spawn(async move {
        tokio::time::sleep(duration).await;
        let Some(control) = watcher.upgrade() else {
            return;
        };
        debug!(
            client_id = control.client_id(),
            reason, "deadline elapsed, closing connection"
        );
        control.mark_timed_out();
        control.close();
    });
    TimeoutGuard {
        handle: Some(task.abort_handle()),
    }
}
