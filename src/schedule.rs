use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Owns a spawned task and cancels it when cancelled or dropped.
///
/// Every piece of scheduled work in a session (phase timer, animator, winner
/// read, channel listener) is held through one of these, so tearing the
/// session down can never leave work firing into a dead session.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            handle: tokio::spawn(fut),
        }
    }

    /// Run `f` once `delay` has elapsed, unless cancelled first.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        TaskHandle::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
